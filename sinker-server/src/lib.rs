//! The sinker server application.
//!
//! This crate contains the [`run`] function which starts the sinker. The sinker receives metrics
//! published by fleet agents on the message bus and forwards them to the Prometheus remote-write
//! sinks of their owners.
//!
//! # Path of a message through the sinker
//!
//! ```mermaid
//! graph LR
//!
//! agent(Agent)
//! nats(NATS)
//! ingress(Ingress)
//! fleet("Fleet directory")
//! resolver(Sink resolver)
//! policies("Policies service")
//! cache(Sink cache)
//! sinks("Sinks service")
//! dispatcher(Dispatcher)
//! sink("Remote-write sink")
//! stream("Redis streams")
//!
//! agent-->nats-->ingress
//! ingress---fleet
//! ingress-->resolver
//! resolver---policies
//! ingress-->dispatcher
//! dispatcher---cache
//! cache---sinks
//! dispatcher-->sink
//! cache-->stream
//! stream-->cache
//! ```
//!
//! 1. Agents publish one envelope per backend on `channels.<channel>.be.<backend>.m.<shard>`. The
//!    envelope carries metrics of one or more policies.
//! 2. The ingress validates the envelope and resolves the publishing agent by its channel.
//! 3. For every policy, the datasets of the policy are resolved to a set of sinks. The payload is
//!    converted into time series by the converter of the backend and encoded once.
//! 4. The encoded batch is delivered to every sink in turn. The outcome is recorded as the state
//!    of the sink in the cache.
//! 5. Every state change is published to the sinker stream. Changes to sink configurations
//!    arrive on the sinks stream and are applied to the cache.
//!
//! Sinks that stop receiving data are evicted from the cache periodically and learned again from
//! the sinks service when they reappear.
#![warn(missing_docs)]

mod constants;
mod endpoints;
mod service;
mod services;
mod statsd;

#[cfg(test)]
mod testutils;

use std::sync::Arc;

use sinker_config::Config;
use sinker_system::{Controller, Shutdown};

use crate::service::{ServiceState, spawn_background};
use crate::services::server::HttpServer;

pub use crate::service::ServiceError;
pub use crate::services::server::ServerError;

/// Runs the sinker and all its services.
///
/// This blocks the current thread until a shutdown signal is received or startup fails. On a
/// graceful shutdown, services get up to `limits.shutdown_timeout` to finish in-flight work.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    sinker_log::info!("sinker server starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sinker-rt")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        Controller::start(config.shutdown_timeout());

        let (state, mut handles) = ServiceState::start(config.clone()).await?;
        let server = HttpServer::new(state.config(), state.clone())?;
        handles.push(spawn_background(server));

        let Shutdown { timeout } = Controller::shutdown_handle().notified().await;

        if let Some(timeout) = timeout {
            let services = futures::future::join_all(handles);
            if tokio::time::timeout(timeout, services).await.is_err() {
                sinker_log::warn!("services did not stop within {}s", timeout.as_secs());
            }
        }

        anyhow::Ok(())
    })?;

    sinker_log::info!("sinker shutdown complete");
    Ok(())
}
