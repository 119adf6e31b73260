use anyhow::Result;
use common::frame_source::{FrameSource, FrameSourceConfig};
use common::shared::LatestFrame;
use lpr_service::{
    api,
    detector::{CharacterDetector, PlateDetector},
    onnx::{OnnxCharacterDetector, OnnxPlateDetector},
    runner::LprRunner,
    state::ModelStatus,
    LprServiceConfig, LprState, OcrError, PlateRecognizer,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn load_recognizer(config: &LprServiceConfig) -> Result<(PlateRecognizer, String), OcrError> {
    let plates = OnnxPlateDetector::load(config.plate_model.clone())?;
    let chars = OnnxCharacterDetector::load(config.char_model.clone())?;
    let provider = config.plate_model.execution_provider.clone();
    info!(plate = plates.name(), chars = chars.name(), "plate models ready");
    let plates: Arc<dyn PlateDetector> = Arc::new(plates);
    let chars: Arc<dyn CharacterDetector> = Arc::new(chars);
    Ok((
        PlateRecognizer::new(plates, chars, config.tuning.clone()),
        provider,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("lpr-service");

    info!("Starting LPR Service...");

    let config = LprServiceConfig::from_env()?;
    info!(
        "LPR Service configuration: bind={}, node_id={}, detection_interval={:?}",
        config.bind_addr, config.node_id, config.detection_interval
    );

    let state = LprState::new(config.node_id.clone(), config.jpeg_quality);

    // A missing model keeps the service up and reports it on /readyz.
    let recognizer = match load_recognizer(&config) {
        Ok((recognizer, provider)) => {
            state.set_model_status(ModelStatus::Ready { provider });
            Some(Arc::new(recognizer))
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "plate recognition unavailable");
            state.set_model_status(ModelStatus::Unavailable {
                reason: e.to_string(),
            });
            None
        }
    };

    let frames = LatestFrame::new();
    let mut source = match &config.video_source {
        Some(uri) => match FrameSource::spawn(FrameSourceConfig::new(uri.clone()), frames.clone()) {
            Ok(source) => Some(source),
            Err(e) => {
                error!("Failed to open video source {}: {:#}", uri, e);
                None
            }
        },
        None => {
            warn!("LPR_VIDEO_SOURCE not set, serving without frames");
            None
        }
    };

    let cancel = CancellationToken::new();
    let runner = LprRunner::new(
        recognizer,
        frames,
        state.clone(),
        config.detection_interval,
        config.frame_interval,
        config.display_width,
    );
    let loop_handle = tokio::spawn(runner.run(cancel.clone()));

    let app = api::router(state);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("LPR Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Err(e) = loop_handle.await {
        error!("Serving loop ended abnormally: {}", e);
    }
    if let Some(source) = source.as_mut() {
        source.stop();
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
        _ = cancel.cancelled() => {}
    }

    info!("Shutting down gracefully...");
    cancel.cancel();
}
