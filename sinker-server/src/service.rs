use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use sinker_config::Config;
use sinker_metrics::BackendRegistry;
use sinker_redis::AsyncRedisPool;
use sinker_system::{Addr, Service, channel};
use tokio::task::JoinHandle;

use crate::constants;
use crate::services::collaborators::HttpCollaborators;
use crate::services::dispatcher::Dispatcher;
use crate::services::events::{EventConsumerService, EventProducerService};
use crate::services::health_check::{HealthCheck, HealthCheckService};
use crate::services::ingress::{IngressService, MessageHandler};
use crate::services::reaper::IdleReaperService;
use crate::services::resolver::SinkResolver;
use crate::services::sink_cache::SinkCache;

/// Indicates the type of failure of the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ServiceError {
    /// Initializing the Redis client failed.
    #[error("could not initialize redis client")]
    Redis,

    /// Connecting to the message bus failed.
    #[error("could not connect to nats")]
    Nats,

    /// Building the HTTP client failed.
    #[error("could not initialize http client")]
    Http,
}

/// Builds the HTTP client shared by remote-write deliveries and collaborator lookups.
fn http_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(constants::USER_AGENT)
        .timeout(config.http_timeout())
        .connect_timeout(config.http_connection_timeout())
        .gzip(true)
        .build()
}

/// Spawns a service that is not addressed by other services.
pub(crate) fn spawn_background<S>(service: S) -> JoinHandle<()>
where
    S: Service<Interface = ()>,
{
    let (_addr, rx) = channel(S::name());
    service.spawn(rx)
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    health_check: Addr<HealthCheck>,
}

/// Server state.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Connects to all dependencies and starts the telemetry pipeline.
    ///
    /// Returns the state for the HTTP server and the handles of all services that should be
    /// awaited on shutdown.
    pub async fn start(config: Arc<Config>) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let client = http_client(&config).context(ServiceError::Http)?;
        let redis = AsyncRedisPool::new(config.redis()).context(ServiceError::Redis)?;
        let nats = async_nats::connect(config.nats_url())
            .await
            .context(ServiceError::Nats)?;

        sinker_log::info!(url = config.nats_url(), "connected to nats");

        let events = EventProducerService::new(&config, redis.clone()).start();
        let cache = Arc::new(SinkCache::new(events));

        let collaborators = Arc::new(HttpCollaborators::new(&config, client.clone()));
        let registry = BackendRegistry::with_default_backends();
        for backend in registry.backends() {
            sinker_log::debug!(backend, "registered backend converter");
        }

        let handler = MessageHandler::new(
            Arc::new(registry),
            collaborators.clone(),
            SinkResolver::new(collaborators.clone()),
            Dispatcher::new(client, cache.clone(), collaborators),
            config.max_message_size(),
        );

        let handles = vec![
            spawn_background(IngressService::new(&config, nats.clone(), handler)),
            spawn_background(EventConsumerService::new(&config, redis, cache.clone())),
            spawn_background(IdleReaperService::new(&config, cache)),
        ];

        let health_check = HealthCheckService::new(Some(nats)).start();

        let state = Self::new(config, health_check);
        Ok((state, handles))
    }

    pub(crate) fn new(config: Arc<Config>, health_check: Addr<HealthCheck>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                config,
                health_check,
            }),
        }
    }

    /// Returns a reference to the sinker's config.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the address of the [`HealthCheckService`].
    pub fn health_check(&self) -> &Addr<HealthCheck> {
        &self.inner.health_check
    }
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("health_check", &self.inner.health_check)
            .finish_non_exhaustive()
    }
}
