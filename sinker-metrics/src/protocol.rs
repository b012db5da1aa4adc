use std::collections::BTreeMap;
use std::fmt;

use data_encoding::BASE64;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ErrorBoundary;

/// The only RPC schema version understood by this crate.
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// The RPC function name of agent metrics envelopes.
pub const AGENT_METRICS_FUNC: &str = "agent_metrics_rpc";

/// Identity of the agent that published a metrics envelope.
///
/// Resolved from the fleet directory by the message bus channel of the agent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentIdentity {
    /// Unique id of the agent.
    #[serde(alias = "id")]
    pub thing_id: String,
    /// The tenant owning the agent.
    pub owner_id: String,
    /// Human readable agent name.
    pub name: String,
    /// Tags assigned to the agent through its fleet configuration.
    pub orb_tags: BTreeMap<String, String>,
    /// Tags reported by the agent itself.
    pub agent_tags: BTreeMap<String, String>,
}

/// Version and function of an RPC envelope, decoded before the typed payload.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcHeader {
    /// Schema version of the envelope.
    pub schema_version: u64,
    /// The RPC function discriminating the payload type.
    pub func: String,
}

/// RPC envelope carrying metrics of one or more policies.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MetricsEnvelope {
    /// Schema version of the envelope.
    pub schema_version: u64,
    /// The RPC function, [`AGENT_METRICS_FUNC`] for this envelope.
    pub func: String,
    /// Metrics per policy.
    ///
    /// An entry that does not decode is kept as an error so its siblings can still be handled.
    #[serde(default)]
    pub payload: Vec<ErrorBoundary<PolicyMetrics>>,
}

/// Metrics produced by a single policy on an agent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PolicyMetrics {
    /// Unique id of the policy.
    pub policy_id: String,
    /// Human readable name of the policy.
    #[serde(default)]
    pub policy_name: String,
    /// Datasets that route this policy's metrics to sinks.
    #[serde(default)]
    pub datasets: Vec<String>,
    /// Encoding of `data`, only `json` is understood.
    #[serde(default)]
    pub format: String,
    /// Version of the backend that produced the metrics.
    #[serde(default)]
    pub backend_version: String,
    /// Raw metrics in the backend's own format.
    ///
    /// Accepts either a base64 string or an array of bytes.
    #[serde(default, with = "payload_data")]
    pub data: Vec<u8>,
}

mod payload_data {
    use super::*;

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DataVisitor;

        impl<'de> Visitor<'de> for DataVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a base64 string or a byte array")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BASE64.decode(v.as_bytes()).map_err(E::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_vec())
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Vec::new())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut data = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    data.push(byte);
                }
                Ok(data)
            }
        }

        deserializer.deserialize_any(DataVisitor)
    }
}
