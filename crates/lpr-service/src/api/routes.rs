use crate::state::LprState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lpr-service"
        })),
    )
}

/// Ready once both models are loaded
pub async fn readyz(State(state): State<LprState>) -> impl IntoResponse {
    let models = state.model_status();
    let code = if models.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": if models.is_ready() { "ready" } else { "unavailable" },
            "node_id": state.node_id(),
            "models": models,
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

/// Latest plate reading with its version
pub async fn current_plate(State(state): State<LprState>) -> impl IntoResponse {
    let current = state.reading();
    (
        StatusCode::OK,
        Json(json!({
            "version": current.version,
            "plate": current.value.text,
            "reading": current.value.as_ref(),
        })),
    )
}

pub async fn current_frame(State(state): State<LprState>) -> impl IntoResponse {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ModelStatus;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_readyz_reports_unavailable_models() {
        let state = LprState::new("cam-1", 80);
        state.set_model_status(ModelStatus::Unavailable {
            reason: "plate_detector: model file not found".into(),
        });
        let response = readyz(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_model_status(ModelStatus::Ready {
            provider: "CPU".into(),
        });
        let response = readyz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_current_plate_defaults_to_unknown() {
        let state = LprState::new("cam-1", 80);
        let response = current_plate(State(state)).await.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["plate"], "unknown");
        assert_eq!(json["version"], 0);
    }

    #[tokio::test]
    async fn test_frame_missing_is_not_found() {
        let response = current_frame(State(LprState::new("cam-1", 80))).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
