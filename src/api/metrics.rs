//! Prometheus metrics endpoint.

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// GET /metrics
///
/// Returns every registered instrument in Prometheus text format.
async fn serve_metrics() -> Response {
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, encoder.format_type())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "Unable to encode metrics");

            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "unable to encode metrics",
            )
                .into_response()
        }
    }
}

/// Create the metrics router. The endpoint is served unauthenticated.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(serve_metrics))
}
