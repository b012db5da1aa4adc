use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use bytes::Bytes;
use parking_lot::Mutex;
use sinker_metrics::AgentIdentity;
use sinker_system::Addr;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::services::collaborators::{
    CollaboratorError, Dataset, DatasetLookup, FleetDirectory, SinkRegistry,
};
use crate::services::events::EventProducer;
use crate::services::sink_cache::{SinkCache, SinkConfig};

/// Serves the router on an ephemeral local port and returns its base URL.
pub async fn spawn_server(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// Creates an empty cache and the receiving end of its state events.
pub fn test_cache() -> (Arc<SinkCache>, UnboundedReceiver<EventProducer>) {
    let (addr, rx) = Addr::custom();
    (Arc::new(SinkCache::new(addr)), rx)
}

pub fn test_agent() -> AgentIdentity {
    AgentIdentity {
        thing_id: "a1".to_owned(),
        owner_id: "o1".to_owned(),
        name: "edge-01".to_owned(),
        ..Default::default()
    }
}

/// A remote-write endpoint recording all requests and answering with a fixed status.
#[derive(Clone, Debug)]
pub struct RemoteWriteReceiver {
    url: String,
    requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
}

impl RemoteWriteReceiver {
    pub async fn start(status: StatusCode) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));

        let router = Router::new()
            .route(
                "/api/v1/write",
                post(
                    move |State(requests): State<Arc<Mutex<Vec<(HeaderMap, Bytes)>>>>,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        requests.lock().push((headers, body));
                        let reply = if status.is_success() { "" } else { "rejected" };
                        (status, reply)
                    },
                ),
            )
            .with_state(requests.clone());

        let base = spawn_server(router).await;
        Self {
            url: format!("{base}api/v1/write"),
            requests,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<(HeaderMap, Bytes)> {
        self.requests.lock().clone()
    }
}

#[derive(Debug, Default)]
pub struct FakeFleet(HashMap<String, AgentIdentity>);

impl FakeFleet {
    pub fn with(mut self, channel_id: &str, agent: AgentIdentity) -> Self {
        self.0.insert(channel_id.to_owned(), agent);
        self
    }
}

#[async_trait]
impl FleetDirectory for FakeFleet {
    async fn agent_by_channel(&self, channel_id: &str) -> Result<AgentIdentity, CollaboratorError> {
        self.0
            .get(channel_id)
            .cloned()
            .ok_or(CollaboratorError::NotFound)
    }
}

#[derive(Debug, Default)]
pub struct FakeDatasets(HashMap<(String, String), Vec<String>>);

impl FakeDatasets {
    pub fn with(mut self, owner_id: &str, dataset_id: &str, sink_ids: &[&str]) -> Self {
        self.0.insert(
            (owner_id.to_owned(), dataset_id.to_owned()),
            sink_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl DatasetLookup for FakeDatasets {
    async fn dataset(
        &self,
        owner_id: &str,
        dataset_id: &str,
    ) -> Result<Dataset, CollaboratorError> {
        let sink_ids = self
            .0
            .get(&(owner_id.to_owned(), dataset_id.to_owned()))
            .ok_or(CollaboratorError::NotFound)?;

        Ok(Dataset {
            id: dataset_id.to_owned(),
            sink_ids: sink_ids.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeSinks(HashMap<(String, String), SinkConfig>);

impl FakeSinks {
    pub fn with(mut self, config: SinkConfig) -> Self {
        self.0
            .insert((config.owner_id.clone(), config.sink_id.clone()), config);
        self
    }
}

#[async_trait]
impl SinkRegistry for FakeSinks {
    async fn sink(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, CollaboratorError> {
        self.0
            .get(&(owner_id.to_owned(), sink_id.to_owned()))
            .cloned()
            .ok_or(CollaboratorError::NotFound)
    }
}
