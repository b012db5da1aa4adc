use axum::http::header;
use axum::response::IntoResponse;

/// Content type of the Prometheus text exposition format.
const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Renders the internal metrics of this process.
pub async fn handle() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], sinker_stats::render())
}
