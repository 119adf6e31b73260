pub mod routes;

use crate::state::OccupancyState;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: OccupancyState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        .route("/v1/occupancy", get(routes::occupancy))
        .route("/v1/notifications", get(routes::notifications))
        .route("/v1/frame.jpg", get(routes::current_frame))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
