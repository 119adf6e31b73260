use crate::state::OccupancyState;
use crate::types::NotificationType;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "occupancy-service"
        })),
    )
}

/// Ready once the vehicle model and the parking layout are loaded
pub async fn readyz(State(state): State<OccupancyState>) -> impl IntoResponse {
    let pipeline = state.status();
    let code = if pipeline.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": if pipeline.is_ready() { "ready" } else { "unavailable" },
            "node_id": state.node_id(),
            "pipeline": pipeline,
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    match telemetry::encode_metrics() {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Current snapshot: aggregate overview plus the per-space map
pub async fn occupancy(State(state): State<OccupancyState>) -> impl IntoResponse {
    let current = state.snapshot();
    (
        StatusCode::OK,
        Json(json!({
            "version": current.version,
            "overview": current.value.overview(),
            "spaces": current.value.spaces,
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub limit: Option<usize>,
}

/// Recent notifications, newest first
pub async fn notifications(
    State(state): State<OccupancyState>,
    Query(query): Query<NotificationQuery>,
) -> impl IntoResponse {
    let filter = match query.notification_type.as_deref().map(str::parse::<NotificationType>) {
        Some(Ok(t)) => Some(t),
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response();
        }
        None => None,
    };

    let history = state.notifications();
    let events: Vec<_> = history
        .iter()
        .rev()
        .filter(|e| filter.map_or(true, |t| e.notification_type == t))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "count": events.len(),
            "notifications": events,
        })),
    )
        .into_response()
}

pub async fn current_frame(State(state): State<OccupancyState>) -> impl IntoResponse {
    match state.annotated_jpeg() {
        Ok(Some(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no frame available yet" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode annotated frame: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode frame").into_response()
        }
    }
}
