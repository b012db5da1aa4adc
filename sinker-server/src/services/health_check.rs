use std::sync::Arc;

use async_nats::connection::State;
use sinker_system::{AsyncResponse, Controller, FromMessage, Interface, Receiver, Sender, Service};

/// Checks whether the sinker is alive and healthy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub enum IsHealthy {
    /// Check if the sinker is alive at all.
    #[serde(rename = "live")]
    Liveness,
    /// Check if the sinker should receive traffic, i.e. it is not shutting down and connected to
    /// the message bus.
    #[serde(rename = "ready")]
    Readiness,
}

/// Service interface for the [`IsHealthy`] message.
#[derive(Debug)]
pub struct HealthCheck(IsHealthy, Sender<bool>);

impl Interface for HealthCheck {}

impl FromMessage<IsHealthy> for HealthCheck {
    type Response = AsyncResponse<bool>;

    fn from_message(message: IsHealthy, sender: Sender<bool>) -> Self {
        Self(message, sender)
    }
}

/// Service implementing the [`HealthCheck`] interface.
#[derive(Debug)]
pub struct HealthCheckService {
    nats: Option<async_nats::Client>,
}

impl HealthCheckService {
    /// Creates a new instance of the HealthCheck service.
    ///
    /// Without a NATS client, readiness only depends on the shutdown state.
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    fn is_healthy(&self, message: IsHealthy, is_shutting_down: bool) -> bool {
        match message {
            IsHealthy::Liveness => true,
            IsHealthy::Readiness => {
                if is_shutting_down {
                    return false;
                }

                self.nats
                    .as_ref()
                    .is_none_or(|client| client.connection_state() == State::Connected)
            }
        }
    }
}

impl Service for HealthCheckService {
    type Interface = HealthCheck;

    async fn run(self, mut rx: Receiver<Self::Interface>) {
        let service = Arc::new(self);
        let mut shutdown = Controller::shutdown_handle();
        let mut is_shutting_down = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified(), if !is_shutting_down => {
                    is_shutting_down = true;
                }
                message = rx.recv() => match message {
                    Some(HealthCheck(message, sender)) => {
                        sender.send(service.is_healthy(message, is_shutting_down));
                    }
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_kind() {
        let kind: IsHealthy = serde_json::from_str(r#""ready""#).unwrap();
        assert_eq!(kind, IsHealthy::Readiness);
        assert!(serde_json::from_str::<IsHealthy>(r#""dead""#).is_err());
    }

    #[tokio::test]
    async fn test_health_without_bus() {
        let addr = HealthCheckService::new(None).start();

        assert!(addr.send(IsHealthy::Liveness).await.unwrap());
        assert!(addr.send(IsHealthy::Readiness).await.unwrap());
    }

    #[test]
    fn test_not_ready_when_shutting_down() {
        let service = HealthCheckService::new(None);

        assert!(service.is_healthy(IsHealthy::Liveness, true));
        assert!(!service.is_healthy(IsHealthy::Readiness, true));
    }
}
