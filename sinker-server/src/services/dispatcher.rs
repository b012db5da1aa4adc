use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use data_encoding::BASE64;
use reqwest::StatusCode;
use reqwest::header;
use sinker_metrics::{TimeSeries, remote_write};
use sinker_stats::metric;

use crate::services::collaborators::{CollaboratorError, SinkRegistry};
use crate::services::sink_cache::{HealthUpdate, SinkCache, SinkConfig, SinkState};
use crate::statsd::{SinkerCounters, SinkerHistograms, SinkerTimers};

/// Maximum number of bytes of a response body kept in the error message of a sink.
const MAX_ERROR_BODY: usize = 256;

/// Errors delivering a batch to a sink.
///
/// The display string of transport and status errors is recorded as the message of the sink.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request could not be sent.
    #[error("{0}")]
    Transport(#[source] reqwest::Error),
    /// The sink responded with a status outside of `2xx`.
    #[error("{code}: {body}")]
    Status {
        /// The response status.
        code: StatusCode,
        /// The beginning of the response body.
        body: String,
    },
    /// The series could not be encoded.
    #[error("failed to encode remote-write request")]
    Encode(#[from] remote_write::RemoteWriteError),
    /// The configuration of the sink could not be fetched.
    #[error("failed to look up sink configuration")]
    Lookup(#[source] CollaboratorError),
}

/// Agent and policy a delivery is made for. Used to tag metrics.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryContext<'a> {
    /// Name of the agent that published the metrics.
    pub agent: &'a str,
    /// Name of the policy that produced the metrics.
    pub policy: &'a str,
}

/// Sends remote-write requests and records their outcome in the [`SinkCache`].
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    cache: Arc<SinkCache>,
    sinks: Arc<dyn SinkRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher learning unknown sinks from the given registry.
    pub fn new(client: reqwest::Client, cache: Arc<SinkCache>, sinks: Arc<dyn SinkRegistry>) -> Self {
        Self {
            client,
            cache,
            sinks,
        }
    }

    /// Encodes a batch of series into a remote-write body.
    ///
    /// The body can be delivered to any number of sinks.
    pub fn encode(series: &[TimeSeries]) -> Result<Bytes, DeliveryError> {
        Ok(Bytes::from(remote_write::encode(series)?))
    }

    /// Delivers an encoded batch to one sink.
    ///
    /// Sinks missing from the cache are fetched from the sinks service and cached first. The
    /// state of the sink is only written when it changes, so repeating the same error does not
    /// publish new events.
    pub async fn deliver(
        &self,
        context: &DeliveryContext<'_>,
        body: Bytes,
        owner_id: &str,
        sink_id: &str,
    ) -> Result<(), DeliveryError> {
        let config = self.sink_config(owner_id, sink_id).await?;

        let size = body.len();
        let start = Instant::now();
        let result = self.send(&config, body).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };

        metric!(
            timer(SinkerTimers::RemoteWriteDuration) = start.elapsed(),
            outcome = outcome
        );
        metric!(
            counter(SinkerCounters::RemoteWriteRequests) += 1,
            agent = context.agent,
            policy = context.policy,
            sink = sink_id,
            owner = owner_id,
            outcome = outcome,
        );
        metric!(
            histogram(SinkerHistograms::RemoteWriteBytes) = size,
            agent = context.agent,
            policy = context.policy,
            sink = sink_id,
            owner = owner_id,
        );

        self.record(owner_id, sink_id, &result);
        result
    }

    async fn sink_config(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, DeliveryError> {
        if let Ok(config) = self.cache.get(owner_id, sink_id) {
            return Ok(config);
        }

        let config = self
            .sinks
            .sink(owner_id, sink_id)
            .await
            .map_err(DeliveryError::Lookup)?;

        sinker_log::debug!(owner_id, sink_id, "caching sink configuration");
        Ok(self.cache.add_if_absent(config))
    }

    async fn send(&self, config: &SinkConfig, body: Bytes) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&config.url)
            .header(header::CONTENT_ENCODING, remote_write::CONTENT_ENCODING)
            .header(header::CONTENT_TYPE, remote_write::CONTENT_TYPE)
            .header(remote_write::VERSION_HEADER, remote_write::VERSION)
            .body(body);

        if !config.username.is_empty() || !config.password.is_empty() {
            request = request.header(
                header::AUTHORIZATION,
                basic_auth(&config.username, &config.password),
            );
        }

        let response = request.send().await.map_err(DeliveryError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            code: status,
            body: truncate_body(body),
        })
    }

    /// Writes the outcome to the cached entry, which may have changed during the request.
    fn record(&self, owner_id: &str, sink_id: &str, result: &Result<(), DeliveryError>) {
        let (state, msg) = match result {
            Ok(()) => (SinkState::Active, String::new()),
            Err(error) => (SinkState::Error, error.to_string()),
        };

        let update = self
            .cache
            .set_health(owner_id, sink_id, state, msg, Utc::now());

        match update {
            HealthUpdate::Changed if state == SinkState::Active => {
                sinker_log::info!(owner_id, sink_id, "sink is active");
            }
            HealthUpdate::Missing => {
                sinker_log::debug!(owner_id, sink_id, "sink was removed during delivery");
            }
            _ => (),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn basic_auth(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    format!("Basic {}", BASE64.encode(credentials.as_bytes()))
}

/// Trims a response body to [`MAX_ERROR_BODY`] bytes on a character boundary.
fn truncate_body(body: String) -> String {
    let mut body = body.trim_end().to_owned();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
