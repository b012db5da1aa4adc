use std::error::Error;
use std::io;
use std::net::TcpListener;

use axum::http::{HeaderValue, header};
use sinker_config::Config;
use sinker_stats::metric;
use sinker_system::{Controller, Receiver, Service};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::constants;
use crate::service::ServiceState;
use crate::statsd::SinkerCounters;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] io::Error),
}

/// Build the axum application with all routes and middleware.
fn make_app(service: ServiceState) -> axum::Router {
    let middleware = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ))
        .layer(TraceLayer::new_for_http());

    crate::endpoints::routes()
        .layer(middleware)
        .with_state(service)
}

fn listen(config: &Config) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(config.listen_addr())?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// HTTP server serving operational endpoints.
///
/// The server stops accepting connections once shutdown begins and finishes in-flight requests.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    service: ServiceState,
}

impl HttpServer {
    /// Binds the listen address of the config.
    ///
    /// Binding happens eagerly so that startup fails if the port is taken.
    pub fn new(config: &Config, service: ServiceState) -> Result<Self, ServerError> {
        Ok(Self {
            listener: listen(config)?,
            service,
        })
    }
}

impl Service for HttpServer {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let Self { listener, service } = self;

        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(error) => {
                sinker_log::error!(error = &error as &dyn Error, "failed to register listener");
                return;
            }
        };

        if let Ok(addr) = listener.local_addr() {
            sinker_log::info!("spawning http server");
            sinker_log::info!("  listening on http://{addr}/");
        }
        metric!(counter(SinkerCounters::ServerStarting) += 1);

        let mut shutdown = Controller::shutdown_handle();
        let result = axum::serve(listener, make_app(service))
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
            })
            .await;

        match result {
            Ok(()) => sinker_log::info!("http server stopped"),
            Err(error) => {
                sinker_log::error!(error = &error as &dyn Error, "http server failed")
            }
        }
    }
}
