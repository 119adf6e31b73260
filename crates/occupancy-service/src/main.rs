use anyhow::Result;
use common::frame_source::{FrameSource, FrameSourceConfig};
use common::parking::load_parking_layout;
use common::shared::LatestFrame;
use occupancy_service::{
    api,
    detector::{OnnxVehicleDetector, VehicleDetector},
    notifier::{BroadcastSubscriber, LogSubscriber},
    runner::{OccupancyRunner, RunnerTimings},
    state::PipelineStatus,
    CentroidTracker, OccupancyMapper, OccupancyPipeline, OccupancyServiceConfig, OccupancyState,
    StatusChangeNotifier,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("occupancy-service");

    info!("Starting Occupancy Service...");

    let config = OccupancyServiceConfig::from_env()?;
    info!(
        "Occupancy Service configuration: bind={}, node_id={}, spaces={}, cooldown={:?}",
        config.bind_addr, config.node_id, config.spaces_file, config.cooldown
    );

    let broadcast = BroadcastSubscriber::new(EVENT_CHANNEL_CAPACITY);
    let state = OccupancyState::new(config.node_id.clone(), config.jpeg_quality, broadcast.sender());

    let mut problems = Vec::new();

    let spaces = match load_parking_layout(&config.spaces_file) {
        Ok(spaces) => {
            info!(count = spaces.len(), "parking layout loaded");
            spaces
        }
        Err(e) => {
            error!(file = %config.spaces_file, error = %e, "parking layout unavailable");
            problems.push(format!("parking layout: {}", e));
            Vec::new()
        }
    };

    let detector: Option<Arc<dyn VehicleDetector>> = match OnnxVehicleDetector::load(config.vehicle_model.clone()) {
        Ok(detector) => {
            info!(provider = detector.provider(), "vehicle model ready");
            let detector: Arc<dyn VehicleDetector> = Arc::new(detector);
            Some(detector)
        }
        Err(e) => {
            error!(error = %e, "vehicle detection unavailable");
            problems.push(e.to_string());
            None
        }
    };

    // A missing model or layout keeps the service up and reports it on /readyz.
    if problems.is_empty() {
        state.set_status(PipelineStatus::Ready {
            provider: config.vehicle_model.execution_provider.clone(),
        });
    } else {
        state.set_status(PipelineStatus::Unavailable {
            reason: problems.join("; "),
        });
    }

    let mut notifier = StatusChangeNotifier::new(config.cooldown);
    notifier.subscribe(Arc::new(broadcast));
    notifier.subscribe(Arc::new(LogSubscriber));
    let pipeline = OccupancyPipeline::new(
        Box::new(CentroidTracker::new(config.tracker)),
        OccupancyMapper::new(spaces),
        notifier,
    );

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
            warn!("OCCUPANCY_VIDEO_SOURCE not set, serving without frames");
            None
        }
    };

    let cancel = CancellationToken::new();
    let runner = OccupancyRunner::new(
        detector,
        pipeline,
        frames,
        state.clone(),
        RunnerTimings {
            frame_interval: config.frame_interval,
            detection_interval: config.detection_interval,
            prune_interval: config.prune_interval,
            cooldown_sweep_interval: config.cooldown_sweep_interval,
        },
    );
    let loop_handle = tokio::spawn(runner.run(cancel.clone()));

    let app = api::router(state);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Occupancy Service listening on {}", config.bind_addr);

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
