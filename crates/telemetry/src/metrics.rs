// Metric construction only fails on malformed names, which are static here.
#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Plate Recognition Metrics ====
    pub static ref LPR_FRAMES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_frames_processed_total",
                "Frames handled by the plate recognition loop",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_RECOGNITIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_recognitions_total",
                "Recognition cycles by result (recognized, unknown) and error kind",
            ),
            &["result"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_LIGHTING_CONDITIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_lighting_conditions_total",
                "Plate crops classified per lighting condition",
            ),
            &["condition"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_VARIANTS_EVALUATED: IntCounter = {
        let metric = IntCounter::new(
            "lpr_variants_evaluated_total",
            "Preprocessing variants passed to the character detector",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_CANDIDATES_PER_CYCLE: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "lpr_candidates_per_cycle",
                "Plate candidates scored per recognition cycle",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_RECOGNITION_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "lpr_recognition_latency_seconds",
                "Time spent locating and reading plates in one frame",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Model Metrics ====
    pub static ref MODEL_AVAILABLE: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new(
                "model_available",
                "Whether a model handle is loaded (1=loaded, 0=unavailable)",
            ),
            &["model", "provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref MODEL_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "model_inference_time_seconds",
                "Single model inference time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["model"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Occupancy Metrics ====
    pub static ref PARKING_SPACES: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new("parking_spaces", "Parking spaces by status"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PARKING_ACTIVE_TRACKS: IntGauge = {
        let metric = IntGauge::new("parking_active_tracks", "Vehicles currently tracked")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PARKING_DETECTION_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "parking_detection_latency_seconds",
                "Time spent detecting, tracking and mapping one frame",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PARKING_NOTIFICATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "parking_notifications_total",
                "Occupancy notifications by type and outcome (emitted, suppressed)",
            ),
            &["type", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PARKING_SUBSCRIBER_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "parking_subscriber_failures_total",
                "Notification deliveries that failed per subscriber",
            ),
            &["subscriber"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
