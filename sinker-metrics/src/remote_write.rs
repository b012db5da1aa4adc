//! Prometheus remote-write encoding.
//!
//! Remote-write receivers accept a protobuf `WriteRequest` compressed with the snappy block
//! format. Receivers require the labels of every series to be sorted by name, so [`encode`] sorts
//! them while the canonical [`TimeSeries`](crate::TimeSeries) keeps its insertion order.

use prost::Message;

use crate::TimeSeries;

/// Value of the `Content-Encoding` header of remote-write requests.
pub const CONTENT_ENCODING: &str = "snappy";
/// Value of the `Content-Type` header of remote-write requests.
pub const CONTENT_TYPE: &str = "application/x-protobuf";
/// Name of the remote-write version header.
pub const VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
/// The implemented version of the remote-write protocol.
pub const VERSION: &str = "0.1.0";

/// Protobuf messages of the remote-write protocol.
pub mod proto {
    /// A batch of series sent in one request.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// The series in this request.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A labelled series of samples.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Labels, sorted by name.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Samples, sorted by timestamp.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A label of a series.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        /// The label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// The label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single sample.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Milliseconds since the UNIX epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

/// An error returned when a remote-write body cannot be encoded or decoded.
#[derive(Debug, thiserror::Error)]
pub enum RemoteWriteError {
    /// Snappy compression or decompression failed.
    #[error("snappy compression failed")]
    Snappy(#[from] snap::Error),
    /// The decompressed body is not a valid `WriteRequest`.
    #[error("invalid write request")]
    Protobuf(#[from] prost::DecodeError),
}

/// Builds the protobuf request for a batch of series.
pub fn write_request(series: &[TimeSeries]) -> proto::WriteRequest {
    let timeseries = series
        .iter()
        .map(|series| {
            let mut labels: Vec<_> = series
                .labels
                .iter()
                .map(|label| proto::Label {
                    name: label.name.clone(),
                    value: label.value.clone(),
                })
                .collect();
            labels.sort_by(|a, b| a.name.cmp(&b.name));

            proto::TimeSeries {
                labels,
                samples: vec![proto::Sample {
                    value: series.datapoint.value,
                    timestamp: series.datapoint.timestamp,
                }],
            }
        })
        .collect();

    proto::WriteRequest { timeseries }
}

/// Encodes a batch of series into a snappy compressed remote-write body.
pub fn encode(series: &[TimeSeries]) -> Result<Vec<u8>, RemoteWriteError> {
    let request = write_request(series).encode_to_vec();
    Ok(snap::raw::Encoder::new().compress_vec(&request)?)
}

/// Decodes a snappy compressed remote-write body.
pub fn decode(body: &[u8]) -> Result<proto::WriteRequest, RemoteWriteError> {
    let request = snap::raw::Decoder::new().decompress_vec(body)?;
    Ok(proto::WriteRequest::decode(request.as_slice())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Datapoint, Label};

    #[test]
    fn test_labels_sorted_on_the_wire() {
        let series = TimeSeries {
            labels: vec![
                Label::new("__name__", "dns_wire_packets_total"),
                Label::new("instance", "edge-01"),
                Label::new("agent_id", "a1"),
            ],
            datapoint: Datapoint {
                value: 9.0,
                timestamp: 1_700_000_000_000,
            },
        };

        let body = encode(std::slice::from_ref(&series)).unwrap();
        let request = decode(&body).unwrap();

        let names: Vec<_> = request.timeseries[0]
            .labels
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(names, ["__name__", "agent_id", "instance"]);
        assert_eq!(
            request.timeseries[0].samples,
            [proto::Sample {
                value: 9.0,
                timestamp: 1_700_000_000_000,
            }]
        );

        // The canonical series keeps its order.
        assert_eq!(series.labels[1].name, "instance");
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(b"definitely not snappy"),
            Err(RemoteWriteError::Snappy(_))
        ));
    }
}
