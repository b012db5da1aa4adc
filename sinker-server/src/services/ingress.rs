//! Agent metrics ingestion from the message bus.
//!
//! Agents publish metric envelopes on subjects of the form
//! `channels.<channel_id>.be.<backend>.m[.<shard>]`. Every message is handled in its own task:
//!
//!  1. The payload size is checked against `limits.max_message_size`.
//!  2. The RPC header is decoded and validated before the typed envelope.
//!  3. The backend is taken from the subject and looked up in the [`BackendRegistry`].
//!  4. The publishing agent is resolved from the fleet directory by its channel.
//!  5. Every policy in the envelope is resolved to its sinks, converted, and delivered to each sink
//!     in turn. Policies are handled concurrently.
//!
//! Malformed messages are counted, logged and dropped. Agents resend on their own schedule.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use futures::future;
use sinker_config::Config;
use sinker_log::Instrument;
use sinker_metrics::{
    AGENT_METRICS_FUNC, AgentIdentity, BackendConverter, BackendRegistry, CURRENT_SCHEMA_VERSION,
    MetricsEnvelope, PolicyMetrics, RpcHeader,
};
use sinker_stats::metric;
use sinker_system::{Controller, Receiver, Service};
use tokio::sync::Semaphore;

use crate::services::collaborators::{CollaboratorError, FleetDirectory};
use crate::services::dispatcher::{DeliveryContext, Dispatcher};
use crate::services::resolver::SinkResolver;
use crate::statsd::{SinkerCounters, SinkerHistograms, SinkerTimers};

/// A message received from the message bus.
#[derive(Clone, Debug)]
pub struct AgentMessage {
    /// The subject the message was published on.
    pub subject: String,
    /// The raw payload.
    pub payload: Bytes,
}

impl From<async_nats::Message> for AgentMessage {
    fn from(message: async_nats::Message) -> Self {
        Self {
            subject: message.subject.to_string(),
            payload: message.payload,
        }
    }
}

/// Reasons for dropping an agent message.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the payload.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
    /// The payload is not a valid RPC envelope.
    #[error("invalid rpc envelope")]
    InvalidSchema(#[source] serde_json::Error),
    /// The envelope uses a schema version this service does not understand.
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u64),
    /// The envelope is not an agent metrics RPC.
    #[error("unexpected rpc function {0:?}")]
    UnexpectedFunc(String),
    /// The subject does not match the agent metrics subject pattern.
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),
    /// No converter is registered for the backend in the subject.
    #[error("unknown backend {0:?}")]
    UnknownBackend(String),
    /// The publishing agent could not be resolved.
    #[error("failed to resolve agent")]
    Directory(#[source] CollaboratorError),
}

impl IngressError {
    /// Returns the reason tag used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            IngressError::PayloadTooLarge { .. } => "payload_too_large",
            IngressError::InvalidSchema(_) => "invalid_schema",
            IngressError::UnsupportedVersion(_) => "unsupported_version",
            IngressError::UnexpectedFunc(_) => "unexpected_func",
            IngressError::InvalidSubject(_) => "invalid_subject",
            IngressError::UnknownBackend(_) => "unknown_backend",
            IngressError::Directory(_) => "directory",
        }
    }
}

/// The parts of an agent metrics subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentSubject<'a> {
    /// The message bus channel of the agent.
    pub channel_id: &'a str,
    /// The backend that produced the metrics.
    pub backend: &'a str,
}

/// Parses `channels.<channel_id>.be.<backend>.m[.<shard>]`.
pub fn parse_subject(subject: &str) -> Result<AgentSubject<'_>, IngressError> {
    let tokens: Vec<&str> = subject.split('.').collect();

    match tokens.as_slice() {
        ["channels", channel_id, "be", backend, "m", rest @ ..]
            if !channel_id.is_empty() && !backend.is_empty() && rest.len() <= 1 =>
        {
            Ok(AgentSubject {
                channel_id: *channel_id,
                backend: *backend,
            })
        }
        _ => Err(IngressError::InvalidSubject(subject.to_owned())),
    }
}

/// Handles individual agent messages.
#[derive(Clone)]
pub struct MessageHandler {
    registry: Arc<BackendRegistry>,
    fleet: Arc<dyn FleetDirectory>,
    resolver: SinkResolver,
    dispatcher: Dispatcher,
    max_message_size: usize,
}

impl MessageHandler {
    /// Creates a new handler.
    pub fn new(
        registry: Arc<BackendRegistry>,
        fleet: Arc<dyn FleetDirectory>,
        resolver: SinkResolver,
        dispatcher: Dispatcher,
        max_message_size: usize,
    ) -> Self {
        Self {
            registry,
            fleet,
            resolver,
            dispatcher,
            max_message_size,
        }
    }

    /// Handles a message, logging and counting it if it is dropped.
    pub async fn handle(&self, message: AgentMessage) {
        let start = Instant::now();

        if let Err(error) = self.handle_message(message).await {
            metric!(
                counter(SinkerCounters::MessagesRejected) += 1,
                reason = error.reason()
            );
            sinker_log::warn!(error = &error as &dyn Error, "dropped agent message");
        }

        metric!(timer(SinkerTimers::MessageHandling) = start.elapsed());
    }

    /// Validates a message and delivers the metrics of all its policies.
    ///
    /// Failures of individual policies or sinks are logged and do not fail the message.
    pub async fn handle_message(&self, message: AgentMessage) -> Result<(), IngressError> {
        let size = message.payload.len();
        metric!(counter(SinkerCounters::MessagesReceived) += 1);
        metric!(histogram(SinkerHistograms::MessageSize) = size);

        if size > self.max_message_size {
            return Err(IngressError::PayloadTooLarge {
                size,
                limit: self.max_message_size,
            });
        }

        let header: RpcHeader =
            serde_json::from_slice(&message.payload).map_err(IngressError::InvalidSchema)?;
        if header.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(IngressError::UnsupportedVersion(header.schema_version));
        }
        if header.func != AGENT_METRICS_FUNC {
            return Err(IngressError::UnexpectedFunc(header.func));
        }

        let envelope: MetricsEnvelope =
            serde_json::from_slice(&message.payload).map_err(IngressError::InvalidSchema)?;

        let subject = parse_subject(&message.subject)?;
        let converter = self
            .registry
            .get_backend(subject.backend)
            .ok_or_else(|| IngressError::UnknownBackend(subject.backend.to_owned()))?;

        let agent = self
            .fleet
            .agent_by_channel(subject.channel_id)
            .await
            .map_err(IngressError::Directory)?;

        sinker_log::trace!(
            agent = agent.name,
            policies = envelope.payload.len(),
            "handling agent metrics"
        );

        let policies = envelope
            .payload
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry.as_result() {
                Ok(payload) => Some(payload),
                Err(error) => {
                    metric!(counter(SinkerCounters::PolicyInvalid) += 1);
                    sinker_log::warn!(
                        error = error as &dyn Error,
                        agent = agent.name,
                        index,
                        "skipping invalid policy payload"
                    );
                    None
                }
            })
            .map(|payload| self.handle_policy(&agent, subject.backend, converter, payload));
        future::join_all(policies).await;

        Ok(())
    }

    async fn handle_policy(
        &self,
        agent: &AgentIdentity,
        backend: &str,
        converter: &dyn BackendConverter,
        payload: &PolicyMetrics,
    ) {
        let sink_ids = self
            .resolver
            .resolve(&agent.owner_id, &payload.datasets)
            .await;

        if sink_ids.is_empty() {
            metric!(counter(SinkerCounters::PolicyWithoutSinks) += 1);
            sinker_log::warn!(
                policy_id = payload.policy_id,
                policy = payload.policy_name,
                "no sinks resolved for policy"
            );
            return;
        }

        let series = match converter.process_metrics(agent, &agent.thing_id, payload) {
            Ok(series) => series,
            Err(error) => {
                metric!(
                    counter(SinkerCounters::ConversionFailed) += 1,
                    backend = backend
                );
                sinker_log::warn!(
                    error = &error as &dyn Error,
                    policy_id = payload.policy_id,
                    backend,
                    "skipping policy metrics"
                );
                return;
            }
        };

        if series.is_empty() {
            sinker_log::debug!(policy_id = payload.policy_id, "policy produced no series");
            return;
        }

        let body = match Dispatcher::encode(&series) {
            Ok(body) => body,
            Err(error) => {
                sinker_log::error!(
                    error = &error as &dyn Error,
                    policy_id = payload.policy_id,
                    "failed to encode series"
                );
                return;
            }
        };

        let context = DeliveryContext {
            agent: &agent.name,
            policy: &payload.policy_name,
        };

        for sink_id in &sink_ids {
            let result = self
                .dispatcher
                .deliver(&context, body.clone(), &agent.owner_id, sink_id)
                .await;

            if let Err(error) = result {
                sinker_log::warn!(
                    error = &error as &dyn Error,
                    owner_id = agent.owner_id,
                    sink_id,
                    policy_id = payload.policy_id,
                    "failed to deliver metrics to sink"
                );
            }
        }
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

/// Subscribes to agent metrics and spawns a handling task per message.
///
/// At most `limits.max_concurrent_messages` messages are handled at once. Once the limit is
/// reached, no further messages are read from the subscription until a task finishes.
#[derive(Debug)]
pub struct IngressService {
    client: async_nats::Client,
    subject: String,
    handler: MessageHandler,
    max_concurrent: usize,
    shutdown_timeout: Duration,
}

impl IngressService {
    /// Creates the service for a connected NATS client.
    pub fn new(config: &Config, client: async_nats::Client, handler: MessageHandler) -> Self {
        Self {
            client,
            subject: config.nats_subject().to_owned(),
            handler,
            max_concurrent: config.max_concurrent_messages(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

impl Service for IngressService {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut subscriber = match self.client.subscribe(self.subject.clone()).await {
            Ok(subscriber) => subscriber,
            Err(error) => {
                sinker_log::error!(
                    error = &error as &dyn Error,
                    subject = self.subject,
                    "failed to subscribe to agent metrics"
                );
                return;
            }
        };

        sinker_log::info!(subject = self.subject, "subscribed to agent metrics");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut shutdown = Controller::shutdown_handle();

        loop {
            let permit = tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let message = tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                message = subscriber.next() => match message {
                    Some(message) => AgentMessage::from(message),
                    None => break,
                },
            };

            let handler = self.handler.clone();
            let span = sinker_log::info_span!("agent_message", subject = message.subject);
            tokio::spawn(
                async move {
                    handler.handle(message).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }

        if let Err(error) = subscriber.unsubscribe().await {
            sinker_log::warn!(
                error = &error as &dyn Error,
                "failed to unsubscribe from agent metrics"
            );
        }

        // Give in-flight messages a chance to finish.
        let permits = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(self.shutdown_timeout, semaphore.acquire_many(permits));
        if drained.await.is_err() {
            sinker_log::warn!("abandoning in-flight agent messages");
        }

        sinker_log::info!("agent metrics ingress stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use data_encoding::BASE64;
    use reqwest::StatusCode;
    use serde_json::json;
    use sinker_metrics::{ConvertError, PktvisorConverter, TimeSeries, remote_write};

    use super::*;
    use crate::services::sink_cache::{SinkCache, SinkConfig, SinkState};
    use crate::testutils::{
        FakeDatasets, FakeFleet, FakeSinks, RemoteWriteReceiver, test_agent, test_cache,
    };

    #[derive(Clone, Default)]
    struct CountingConverter(Arc<AtomicUsize>);

    impl BackendConverter for CountingConverter {
        fn process_metrics(
            &self,
            agent: &AgentIdentity,
            agent_id: &str,
            payload: &PolicyMetrics,
        ) -> Result<Vec<TimeSeries>, ConvertError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            PktvisorConverter.process_metrics(agent, agent_id, payload)
        }
    }

    struct Setup {
        handler: MessageHandler,
        cache: Arc<SinkCache>,
        conversions: Arc<AtomicUsize>,
    }

    fn setup(datasets: FakeDatasets, sinks: FakeSinks, max_message_size: usize) -> Setup {
        let converter = CountingConverter::default();
        let conversions = converter.0.clone();
        let mut registry = BackendRegistry::new();
        registry.register("pktvisor", converter);

        let (cache, _rx) = test_cache();
        let fleet = FakeFleet::default().with("c1", test_agent());
        let dispatcher = Dispatcher::new(reqwest::Client::new(), cache.clone(), Arc::new(sinks));

        let handler = MessageHandler::new(
            Arc::new(registry),
            Arc::new(fleet),
            SinkResolver::new(Arc::new(datasets)),
            dispatcher,
            max_message_size,
        );

        Setup {
            handler,
            cache,
            conversions,
        }
    }

    fn envelope(policies: serde_json::Value) -> Bytes {
        let envelope = json!({
            "schema_version": 1,
            "func": "agent_metrics_rpc",
            "payload": policies,
        });
        Bytes::from(serde_json::to_vec(&envelope).unwrap())
    }

    fn dns_policy(datasets: &[&str]) -> serde_json::Value {
        let data = br#"{"policy_dns": {"dns": {"wire_packets": {"total": 9}}}}"#;
        json!({
            "policy_id": "p1",
            "policy_name": "policy-dns",
            "datasets": datasets,
            "format": "json",
            "backend_version": "4.2.0",
            "data": BASE64.encode(data),
        })
    }

    fn message(subject: &str, payload: Bytes) -> AgentMessage {
        AgentMessage {
            subject: subject.to_owned(),
            payload,
        }
    }

    #[test]
    fn test_parse_subject() {
        assert_eq!(
            parse_subject("channels.c1.be.pktvisor.m.a").unwrap(),
            AgentSubject {
                channel_id: "c1",
                backend: "pktvisor",
            }
        );
        assert_eq!(
            parse_subject("channels.c1.be.otel.m").unwrap().backend,
            "otel"
        );

        for subject in [
            "",
            "channels.c1.be.pktvisor",
            "channels..be.pktvisor.m",
            "channels.c1.be..m",
            "channels.c1.agent.pktvisor.m",
            "channels.c1.be.pktvisor.m.a.b",
            "things.c1.be.pktvisor.m.a",
        ] {
            assert!(
                matches!(parse_subject(subject), Err(IngressError::InvalidSubject(_))),
                "{subject}"
            );
        }
    }

    #[test]
    fn test_oversized_payload_never_converted() {
        let setup = setup(FakeDatasets::default(), FakeSinks::default(), 100);
        let payload = envelope(json!([dns_policy(&["d1"])]));
        assert!(payload.len() > 100);

        let captures = sinker_stats::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(
                setup
                    .handler
                    .handle(message("channels.c1.be.pktvisor.m.a", payload)),
            );
        });

        assert_eq!(setup.conversions.load(Ordering::SeqCst), 0);
        assert!(captures.contains(&"message.received:1|c".to_owned()));
        assert!(captures.contains(&"message.rejected:1|c|#reason:payload_too_large".to_owned()));
    }

    #[tokio::test]
    async fn test_envelope_validation() {
        let setup = setup(FakeDatasets::default(), FakeSinks::default(), 102_400);
        let subject = "channels.c1.be.pktvisor.m.a";

        let error = setup
            .handler
            .handle_message(message(subject, Bytes::from_static(b"{not json")))
            .await
            .unwrap_err();
        assert_eq!(error.reason(), "invalid_schema");

        let payload = json!({"schema_version": 2, "func": "agent_metrics_rpc", "payload": []});
        let error = setup
            .handler
            .handle_message(message(subject, Bytes::from(payload.to_string())))
            .await
            .unwrap_err();
        assert!(matches!(error, IngressError::UnsupportedVersion(2)));

        let payload = json!({"schema_version": 1, "func": "agent_heartbeat", "payload": []});
        let error = setup
            .handler
            .handle_message(message(subject, Bytes::from(payload.to_string())))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), r#"unexpected rpc function "agent_heartbeat""#);

        let payload = envelope(json!([]));
        let error = setup
            .handler
            .handle_message(message("channels.c1.be.netflow.m.a", payload.clone()))
            .await
            .unwrap_err();
        assert!(matches!(error, IngressError::UnknownBackend(ref name) if name == "netflow"));

        let error = setup
            .handler
            .handle_message(message("channels.c2.be.pktvisor.m.a", payload))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            IngressError::Directory(CollaboratorError::NotFound)
        ));

        assert_eq!(setup.conversions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shared_sink_receives_one_request() {
        let receiver = RemoteWriteReceiver::start(StatusCode::OK).await;
        let datasets = FakeDatasets::default()
            .with("o1", "d1", &["s1"])
            .with("o1", "d2", &["s1"]);
        let sinks = FakeSinks::default().with(SinkConfig::new("o1", "s1", receiver.url()));
        let setup = setup(datasets, sinks, 102_400);

        let payload = envelope(json!([dns_policy(&["d1", "d2"]), dns_policy(&["d3"])]));
        setup
            .handler
            .handle_message(message("channels.c1.be.pktvisor.m.a", payload))
            .await
            .unwrap();

        let requests = receiver.requests();
        assert_eq!(requests.len(), 1);

        let request = remote_write::decode(&requests[0].1).unwrap();
        assert_eq!(request.timeseries.len(), 1);
        let labels: Vec<_> = request.timeseries[0]
            .labels
            .iter()
            .map(|label| (label.name.as_str(), label.value.as_str()))
            .collect();
        similar_asserts::assert_eq!(
            labels,
            [
                ("__name__", "dns_wire_packets_total"),
                ("agent", "edge-01"),
                ("agent_id", "a1"),
                ("handler", "policy_dns"),
                ("instance", "edge-01"),
                ("policy", "policy-dns"),
                ("policy_id", "p1"),
            ]
        );

        // The policy without sinks is never converted.
        assert_eq!(setup.conversions.load(Ordering::SeqCst), 1);
        assert_eq!(setup.cache.get("o1", "s1").unwrap().state, SinkState::Active);
    }

    #[test]
    fn test_invalid_policy_does_not_drop_envelope() {
        let mut requests = 0;
        let mut conversions = 0;

        let captures = sinker_stats::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let receiver = RemoteWriteReceiver::start(StatusCode::OK).await;
                let datasets = FakeDatasets::default().with("o1", "d1", &["s1"]);
                let sinks = FakeSinks::default().with(SinkConfig::new("o1", "s1", receiver.url()));
                let setup = setup(datasets, sinks, 102_400);

                let mut broken = dns_policy(&["d1"]);
                broken["data"] = json!("not base64!");
                let payload = envelope(json!([broken, dns_policy(&["d1"])]));
                setup
                    .handler
                    .handle_message(message("channels.c1.be.pktvisor.m.a", payload))
                    .await
                    .unwrap();

                requests = receiver.requests().len();
                conversions = setup.conversions.load(Ordering::SeqCst);
            });
        });

        assert_eq!(requests, 1);
        assert_eq!(conversions, 1);
        assert!(captures.contains(&"policy.invalid:1|c".to_owned()));
        assert!(!captures.iter().any(|line| line.starts_with("message.rejected")));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let healthy = RemoteWriteReceiver::start(StatusCode::OK).await;
        let failing = RemoteWriteReceiver::start(StatusCode::BAD_REQUEST).await;
        let datasets = FakeDatasets::default().with("o1", "d1", &["s1", "s2"]);
        let sinks = FakeSinks::default()
            .with(SinkConfig::new("o1", "s1", failing.url()))
            .with(SinkConfig::new("o1", "s2", healthy.url()));
        let setup = setup(datasets, sinks, 102_400);

        let payload = envelope(json!([dns_policy(&["d1"])]));
        setup
            .handler
            .handle_message(message("channels.c1.be.pktvisor.m.a", payload))
            .await
            .unwrap();

        assert_eq!(failing.requests().len(), 1);
        assert_eq!(healthy.requests().len(), 1);

        let failed = setup.cache.get("o1", "s1").unwrap();
        assert_eq!(failed.state, SinkState::Error);
        assert_eq!(failed.msg, "400 Bad Request: rejected");
        assert_eq!(setup.cache.get("o1", "s2").unwrap().state, SinkState::Active);
    }
}
