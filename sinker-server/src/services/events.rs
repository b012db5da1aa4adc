//! Redis streams replicating sink state.
//!
//! Two streams connect this service with the sinks service and with other replicas:
//!
//!  - The sinks stream carries `sinks.create`, `sinks.update` and `sinks.remove` events from the
//!    sinks service. It is read through a consumer group by the [`EventConsumerService`] and
//!    applied to the [`SinkCache`].
//!  - The sinker stream receives a state change event for every mutation of the cache. It is
//!    written by the [`EventProducerService`].

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sinker_config::Config;
use sinker_redis::redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use sinker_redis::redis::{self, AsyncCommands};
use sinker_redis::{AsyncRedisPool, RedisError};
use sinker_stats::metric;
use sinker_system::{Controller, FromMessage, Interface, NoResponse, Receiver, Service};

use crate::services::collaborators::RemoteWriteConfig;
use crate::services::sink_cache::{SinkCache, SinkConfig, SinkState};
use crate::statsd::{SinkerCounters, SinkerGauges};

/// Delay before retrying after the sinks stream could not be read.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors reading or writing an event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Redis could not be reached or rejected a command.
    #[error(transparent)]
    Redis(#[from] RedisError),
    /// A stream entry is missing fields or holds invalid values.
    #[error("malformed stream entry: {0}")]
    Parse(String),
}

impl From<redis::RedisError> for StreamError {
    fn from(error: redis::RedisError) -> Self {
        Self::Redis(RedisError::Redis(error))
    }
}

/// A state change of a sink, published to the sinker stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkStateChanged {
    /// Id of the sink.
    pub sink_id: String,
    /// Owner of the sink.
    pub owner_id: String,
    /// The new state.
    pub state: SinkState,
    /// The error message of a failed delivery, empty otherwise.
    pub msg: String,
    /// Time of the change.
    pub timestamp: DateTime<Utc>,
}

impl SinkStateChanged {
    /// Returns the stream entry fields of this event.
    pub fn fields(&self) -> [(&'static str, String); 5] {
        [
            ("sink_id", self.sink_id.clone()),
            ("owner", self.owner_id.clone()),
            ("state", self.state.to_string()),
            ("msg", self.msg.clone()),
            (
                "timestamp",
                self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ]
    }
}

impl From<&SinkConfig> for SinkStateChanged {
    fn from(config: &SinkConfig) -> Self {
        Self {
            sink_id: config.sink_id.clone(),
            owner_id: config.owner_id.clone(),
            state: config.state,
            msg: config.msg.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Service interface of the [`EventProducerService`].
#[derive(Debug)]
pub struct EventProducer(pub SinkStateChanged);

impl Interface for EventProducer {}

impl FromMessage<SinkStateChanged> for EventProducer {
    type Response = NoResponse;

    fn from_message(message: SinkStateChanged, _: ()) -> Self {
        Self(message)
    }
}

/// Publishes sink state changes to the sinker stream.
///
/// The stream is capped at roughly `streams.max_len` entries.
#[derive(Debug)]
pub struct EventProducerService {
    pool: AsyncRedisPool,
    stream: String,
    max_len: usize,
}

impl EventProducerService {
    /// Creates a new producer writing to the configured sinker stream.
    pub fn new(config: &Config, pool: AsyncRedisPool) -> Self {
        Self {
            pool,
            stream: config.sinker_stream().to_owned(),
            max_len: config.stream_max_len(),
        }
    }

    async fn publish(&self, event: &SinkStateChanged) -> Result<(), StreamError> {
        let mut connection = self.pool.get_connection().await?;
        let _: String = connection
            .xadd_maxlen(
                &self.stream,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &event.fields()[..],
            )
            .await?;
        Ok(())
    }
}

impl Service for EventProducerService {
    type Interface = EventProducer;

    async fn run(self, mut rx: Receiver<Self::Interface>) {
        sinker_log::info!(stream = self.stream, "sink event producer started");

        while let Some(EventProducer(event)) = rx.recv().await {
            match self.publish(&event).await {
                Ok(()) => {
                    metric!(counter(SinkerCounters::EventsProduced) += 1, outcome = "success");
                }
                Err(error) => {
                    metric!(counter(SinkerCounters::EventsProduced) += 1, outcome = "failure");
                    sinker_log::error!(
                        error = &error as &dyn Error,
                        sink_id = event.sink_id,
                        state = event.state.as_str(),
                        "failed to publish sink state"
                    );
                }
            }
        }

        sinker_log::info!("sink event producer stopped");
    }
}

/// A change to a sink's configuration announced by the sinks service.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    /// A sink was created.
    Create(SinkConfig),
    /// The endpoint or credentials of a sink changed.
    Update(SinkConfig),
    /// A sink was deleted.
    Remove {
        /// Owner of the sink.
        owner_id: String,
        /// Id of the sink.
        sink_id: String,
    },
}

impl SinkEvent {
    /// Parses an event from the fields of a sinks stream entry.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, StreamError> {
        let operation = required(fields, "operation")?;
        let owner_id = required(fields, "owner")?.to_owned();
        let sink_id = required(fields, "sink_id")?.to_owned();

        let parse_config = || -> Result<SinkConfig, StreamError> {
            let config: RemoteWriteConfig = serde_json::from_str(required(fields, "config")?)
                .map_err(|error| StreamError::Parse(format!("invalid sink config: {error}")))?;
            Ok(config.into_sink_config(&owner_id, &sink_id))
        };

        match operation {
            "sinks.create" => Ok(Self::Create(parse_config()?)),
            "sinks.update" => Ok(Self::Update(parse_config()?)),
            "sinks.remove" => Ok(Self::Remove { owner_id, sink_id }),
            other => Err(StreamError::Parse(format!("unknown operation {other:?}"))),
        }
    }

    /// Returns the name of the operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "sinks.create",
            Self::Update(_) => "sinks.update",
            Self::Remove { .. } => "sinks.remove",
        }
    }

    /// Applies the event to the cache.
    ///
    /// Creating an existing sink refreshes its endpoint. Updating a sink that is not cached adds
    /// it. In both cases the health of an existing entry is kept.
    pub fn apply(self, cache: &SinkCache) {
        match self {
            Self::Create(config) | Self::Update(config) => cache.upsert_endpoint(config),
            Self::Remove { owner_id, sink_id } => {
                if cache.remove(&owner_id, &sink_id).is_err() {
                    sinker_log::debug!(sink_id, "removed sink was not cached");
                }
            }
        }
    }
}

fn required<'a>(fields: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str, StreamError> {
    match fields.get(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(StreamError::Parse(format!("missing field {name}"))),
    }
}

#[derive(Debug, PartialEq)]
struct ConsumerState {
    group_ready: bool,
    /// Position in this consumer's pending entries, `None` once they are drained.
    cursor: Option<String>,
}

impl ConsumerState {
    /// Starts over from the beginning of the pending entries with an unverified group.
    fn new() -> Self {
        Self {
            group_ready: false,
            cursor: Some("0".to_owned()),
        }
    }

    /// Rewinds after a failed poll.
    ///
    /// Entries that were read but not acknowledged stay pending for this consumer and are only
    /// delivered again when reading from the start of the pending list. The stream may also have
    /// been deleted along with the group.
    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Applies sink events from the sinks stream to the cache.
///
/// On startup, entries that were delivered to this consumer but never acknowledged are processed
/// first. Entries are acknowledged once applied, or when they are malformed and can never be
/// applied.
#[derive(Debug)]
pub struct EventConsumerService {
    pool: AsyncRedisPool,
    cache: Arc<SinkCache>,
    stream: String,
    group: String,
    consumer: String,
    batch_size: usize,
    block: Duration,
}

impl EventConsumerService {
    /// Creates a consumer for the configured sinks stream and consumer group.
    pub fn new(config: &Config, pool: AsyncRedisPool, cache: Arc<SinkCache>) -> Self {
        Self {
            pool,
            cache,
            stream: config.sinks_stream().to_owned(),
            group: config.consumer_group().to_owned(),
            consumer: config.consumer_name(),
            batch_size: config.stream_batch_size(),
            block: config.stream_block(),
        }
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        let mut connection = self.pool.get_connection().await?;
        let result: redis::RedisResult<()> = connection
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.code() == Some("BUSYGROUP") => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn read(&self, id: &str) -> Result<Vec<StreamId>, StreamError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size)
            .block(self.block.as_millis() as usize);

        let mut connection = self.pool.get_connection().await?;
        let reply: Option<StreamReadReply> = connection
            .xread_options(&[&self.stream], &[id], &options)
            .await?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .collect())
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let mut connection = self.pool.get_connection().await?;
        let _: i64 = connection.xack(&self.stream, &self.group, &[id]).await?;
        Ok(())
    }

    fn handle_entry(&self, entry: &StreamId) -> Result<&'static str, StreamError> {
        let fields: BTreeMap<String, String> = entry
            .map
            .iter()
            .filter_map(|(key, value)| {
                let value = redis::from_redis_value::<String>(value).ok()?;
                Some((key.clone(), value))
            })
            .collect();

        let event = SinkEvent::from_fields(&fields)?;
        let operation = event.operation();
        event.apply(&self.cache);
        Ok(operation)
    }

    async fn poll(&self, state: &mut ConsumerState) -> Result<(), StreamError> {
        if !state.group_ready {
            self.ensure_group().await?;
            state.group_ready = true;
        }

        let entries = self.read(state.cursor.as_deref().unwrap_or(">")).await?;
        if state.cursor.is_some() {
            state.cursor = entries.last().map(|entry| entry.id.clone());
            if state.cursor.is_none() {
                sinker_log::debug!("pending sink events drained");
            }
        }

        for entry in &entries {
            let operation = match self.handle_entry(entry) {
                Ok(operation) => operation,
                Err(error) => {
                    sinker_log::warn!(
                        error = &error as &dyn Error,
                        entry_id = entry.id,
                        "dropping malformed sink event"
                    );
                    "invalid"
                }
            };

            metric!(counter(SinkerCounters::EventsConsumed) += 1, operation = operation);
            self.ack(&entry.id).await?;
        }

        Ok(())
    }
}

impl Service for EventConsumerService {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut shutdown = Controller::shutdown_handle();
        let mut state = ConsumerState::new();

        sinker_log::info!(
            stream = self.stream,
            group = self.group,
            consumer = self.consumer,
            "sink event consumer started"
        );

        loop {
            let stats = self.pool.stats();
            metric!(gauge(SinkerGauges::RedisConnections) = stats.connections);
            metric!(gauge(SinkerGauges::RedisIdleConnections) = stats.idle_connections);

            let result = tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                result = self.poll(&mut state) => result,
            };

            let Err(error) = result else { continue };

            metric!(counter(SinkerCounters::EventStreamErrors) += 1);
            sinker_log::error!(
                error = &error as &dyn Error,
                "failed to consume sink events"
            );

            state.reset();

            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => (),
            }
        }

        sinker_log::info!("sink event consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sinker_system::Addr;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_consumer_state_reset_rereads_pending() {
        let mut state = ConsumerState::new();
        state.group_ready = true;
        state.cursor = None;

        state.reset();
        assert_eq!(state, ConsumerState::new());
        assert_eq!(state.cursor.as_deref(), Some("0"));
        assert!(!state.group_ready);
    }

    #[test]
    fn test_state_changed_fields() {
        let event = SinkStateChanged {
            sink_id: "s1".to_owned(),
            owner_id: "o1".to_owned(),
            state: SinkState::Error,
            msg: "401 Unauthorized: bad credentials".to_owned(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };

        insta::assert_debug_snapshot!(event.fields(), @r#"
        [
            (
                "sink_id",
                "s1",
            ),
            (
                "owner",
                "o1",
            ),
            (
                "state",
                "error",
            ),
            (
                "msg",
                "401 Unauthorized: bad credentials",
            ),
            (
                "timestamp",
                "2024-03-01T12:00:00.000Z",
            ),
        ]
        "#);
    }

    #[test]
    fn test_parse_create() {
        let event = SinkEvent::from_fields(&fields(&[
            ("operation", "sinks.create"),
            ("owner", "o1"),
            ("sink_id", "s1"),
            (
                "config",
                r#"{"remote_host": "https://prom/api/v1/write", "username": "u", "password": "p"}"#,
            ),
            ("timestamp", "2024-03-01T12:00:00Z"),
        ]))
        .unwrap();

        let mut expected = SinkConfig::new("o1", "s1", "https://prom/api/v1/write");
        expected.username = "u".to_owned();
        expected.password = "p".to_owned();
        assert_eq!(event, SinkEvent::Create(expected));
    }

    #[test]
    fn test_parse_update_with_url_alias() {
        let event = SinkEvent::from_fields(&fields(&[
            ("operation", "sinks.update"),
            ("owner", "o1"),
            ("sink_id", "s1"),
            ("config", r#"{"url": "https://prom/write"}"#),
        ]))
        .unwrap();

        let SinkEvent::Update(config) = event else {
            panic!("expected update, got {event:?}");
        };
        assert_eq!(config.url, "https://prom/write");
        assert_eq!(config.username, "");
    }

    #[test]
    fn test_parse_remove_ignores_config() {
        let event = SinkEvent::from_fields(&fields(&[
            ("operation", "sinks.remove"),
            ("owner", "o1"),
            ("sink_id", "s1"),
        ]))
        .unwrap();

        assert_eq!(event.operation(), "sinks.remove");
    }

    #[test]
    fn test_parse_malformed() {
        let missing_owner = fields(&[("operation", "sinks.remove"), ("sink_id", "s1")]);
        assert!(matches!(
            SinkEvent::from_fields(&missing_owner),
            Err(StreamError::Parse(msg)) if msg == "missing field owner"
        ));

        let bad_config = fields(&[
            ("operation", "sinks.create"),
            ("owner", "o1"),
            ("sink_id", "s1"),
            ("config", "{"),
        ]);
        assert!(SinkEvent::from_fields(&bad_config).is_err());

        let unknown = fields(&[
            ("operation", "sinks.rename"),
            ("owner", "o1"),
            ("sink_id", "s1"),
        ]);
        let error = SinkEvent::from_fields(&unknown).unwrap_err();
        assert_eq!(
            error.to_string(),
            r#"malformed stream entry: unknown operation "sinks.rename""#
        );
    }

    #[test]
    fn test_apply_events() {
        let (addr, mut rx) = Addr::custom();
        let cache = SinkCache::new(addr);

        let mut existing = SinkConfig::new("o1", "s1", "http://old");
        existing.state = SinkState::Error;
        existing.msg = "timeout".to_owned();
        cache.add(existing);

        SinkEvent::Update(SinkConfig::new("o1", "s1", "http://new")).apply(&cache);
        let updated = cache.get("o1", "s1").unwrap();
        assert_eq!(updated.url, "http://new");
        assert_eq!(updated.state, SinkState::Error);
        assert_eq!(updated.msg, "timeout");

        SinkEvent::Create(SinkConfig::new("o1", "s2", "http://other")).apply(&cache);
        assert!(cache.exists("o1", "s2"));

        SinkEvent::Remove {
            owner_id: "o1".to_owned(),
            sink_id: "s1".to_owned(),
        }
        .apply(&cache);
        assert!(!cache.exists("o1", "s1"));

        // Removing an unknown sink is not an error and publishes nothing.
        SinkEvent::Remove {
            owner_id: "o1".to_owned(),
            sink_id: "missing".to_owned(),
        }
        .apply(&cache);

        let mut states = Vec::new();
        while let Ok(EventProducer(event)) = rx.try_recv() {
            states.push(event.state);
        }
        assert_eq!(
            states,
            [
                SinkState::Error,
                SinkState::Error,
                SinkState::Unknown,
                SinkState::Idle
            ]
        );
    }
}
