//! Web server endpoints.
//!
//! The server only exposes operational endpoints. Agent metrics arrive through the message bus.

mod health_check;
mod metrics;

use axum::Router;
use axum::routing::get;

use crate::service::ServiceState;

/// Returns the router for all endpoints.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/metrics", get(metrics::handle))
        .route("/health/{kind}", get(health_check::handle))
}
