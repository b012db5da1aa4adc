//! Services of the telemetry pipeline.
//!
//! The pipeline consists of these services and their collaborators:
//!
//!  - [`ingress::IngressService`]: Subscribes to agent metrics on the message bus and spawns a
//!    task for every message.
//!  - [`events::EventProducerService`]: Publishes state changes of sinks to the sinker stream.
//!  - [`events::EventConsumerService`]: Replicates sink configuration from the sinks stream into
//!    the [`sink_cache::SinkCache`].
//!  - [`reaper::IdleReaperService`]: Evicts sinks that stopped receiving data.
//!  - [`health_check::HealthCheckService`]: Answers liveness and readiness checks.
//!  - [`server::HttpServer`]: Serves the operational endpoints.
//!
//! Message handling itself is not a service. Each message task uses the
//! [`resolver::SinkResolver`] and the [`dispatcher::Dispatcher`] directly.

pub mod collaborators;
pub mod dispatcher;
pub mod events;
pub mod health_check;
pub mod ingress;
pub mod reaper;
pub mod resolver;
pub mod server;
pub mod sink_cache;
