//! Clients for the fleet, policies and sinks services.
//!
//! The pipeline only depends on the [`FleetDirectory`], [`DatasetLookup`] and [`SinkRegistry`]
//! traits. [`HttpCollaborators`] implements all three on top of the HTTP APIs of those services.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sinker_config::Config;
use sinker_metrics::AgentIdentity;
use url::Url;

use crate::services::sink_cache::SinkConfig;

/// Errors returned by collaborator lookups.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The request could not be sent or the response could not be read.
    #[error("could not reach collaborator")]
    Http(#[from] reqwest::Error),
    /// The collaborator answered with an unexpected status.
    #[error("collaborator responded with {0}")]
    Status(StatusCode),
    /// The response body is not the expected JSON document.
    #[error("invalid collaborator response")]
    Decode(#[from] serde_json::Error),
    /// The requested entity does not exist.
    #[error("entity not found")]
    NotFound,
    /// The configured base URL cannot carry path segments.
    #[error("invalid collaborator base url")]
    InvalidUrl,
}

/// A dataset linking policies to sinks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Dataset {
    /// Id of the dataset.
    pub id: String,
    /// Sinks receiving the metrics of the dataset's policies.
    pub sink_ids: Vec<String>,
}

/// Remote-write settings of a sink as stored by the sinks service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteWriteConfig {
    /// The remote-write endpoint.
    #[serde(alias = "url")]
    pub remote_host: String,
    /// Basic auth user.
    #[serde(default)]
    pub username: String,
    /// Basic auth password.
    #[serde(default)]
    pub password: String,
}

impl RemoteWriteConfig {
    /// Turns the settings into a cache entry in the `Unknown` state.
    pub fn into_sink_config(self, owner_id: &str, sink_id: &str) -> SinkConfig {
        let mut config = SinkConfig::new(owner_id, sink_id, self.remote_host);
        config.username = self.username;
        config.password = self.password;
        config
    }
}

#[derive(Debug, Deserialize)]
struct SinkResponse {
    id: String,
    owner: String,
    config: RemoteWriteConfig,
}

/// Resolves agent identities by message bus channel.
#[async_trait]
pub trait FleetDirectory: Send + Sync {
    /// Returns the agent publishing on the given channel.
    async fn agent_by_channel(&self, channel_id: &str) -> Result<AgentIdentity, CollaboratorError>;
}

/// Looks up datasets of an owner.
#[async_trait]
pub trait DatasetLookup: Send + Sync {
    /// Returns the dataset with the given id.
    async fn dataset(&self, owner_id: &str, dataset_id: &str)
    -> Result<Dataset, CollaboratorError>;
}

/// The sinks service, source of truth for sink configuration.
#[async_trait]
pub trait SinkRegistry: Send + Sync {
    /// Returns the configuration of a sink in the `Unknown` state.
    async fn sink(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, CollaboratorError>;
}

/// HTTP client for all collaborator services.
#[derive(Clone, Debug)]
pub struct HttpCollaborators {
    client: reqwest::Client,
    fleet_url: Url,
    policies_url: Url,
    sinks_url: Url,
}

impl HttpCollaborators {
    /// Creates a client for the collaborator URLs in the config.
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            fleet_url: config.fleet_url().clone(),
            policies_url: config.policies_url().clone(),
            sinks_url: config.sinks_url().clone(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        base: &Url,
        segments: &[&str],
    ) -> Result<T, CollaboratorError> {
        let url = join_segments(base, segments)?;
        sinker_log::trace!(url = url.as_str(), "querying collaborator");

        let response = self.client.get(url).send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(CollaboratorError::NotFound),
            status => return Err(CollaboratorError::Status(status)),
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl FleetDirectory for HttpCollaborators {
    async fn agent_by_channel(&self, channel_id: &str) -> Result<AgentIdentity, CollaboratorError> {
        self.get(&self.fleet_url, &["agents", "channels", channel_id])
            .await
    }
}

#[async_trait]
impl DatasetLookup for HttpCollaborators {
    async fn dataset(
        &self,
        owner_id: &str,
        dataset_id: &str,
    ) -> Result<Dataset, CollaboratorError> {
        self.get(
            &self.policies_url,
            &["owners", owner_id, "datasets", dataset_id],
        )
        .await
    }
}

#[async_trait]
impl SinkRegistry for HttpCollaborators {
    async fn sink(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, CollaboratorError> {
        let response: SinkResponse = self
            .get(&self.sinks_url, &["owners", owner_id, "sinks", sink_id])
            .await?;

        if response.id != sink_id || response.owner != owner_id {
            sinker_log::warn!(
                sink_id,
                owner_id,
                response_id = response.id,
                response_owner = response.owner,
                "sinks service returned a different sink"
            );
        }

        Ok(response.config.into_sink_config(owner_id, sink_id))
    }
}

/// Appends percent-encoded path segments to a base URL.
fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, CollaboratorError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| CollaboratorError::InvalidUrl)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
