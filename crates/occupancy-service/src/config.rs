use crate::tracker::TrackerConfig;
use anyhow::{Context, Result};
use common::inference::ModelConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OccupancyServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Camera identifier used in logs
    pub node_id: String,

    /// Video file or stream URI
    pub video_source: Option<String>,

    pub vehicle_model: ModelConfig,

    /// JSON file with the parking space polygons
    pub spaces_file: String,

    /// Minimum spacing between vehicle detection runs
    pub detection_interval: Duration,

    /// Serving loop tick (display frame rate)
    pub frame_interval: Duration,

    /// Minimum time between two notifications of the same type
    pub cooldown: Duration,

    /// How often stale tracks are removed
    pub prune_interval: Duration,

    /// How often elapsed cooldown entries are cleared
    pub cooldown_sweep_interval: Duration,

    pub tracker: TrackerConfig,

    pub jpeg_quality: u8,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl OccupancyServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("OCCUPANCY_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8091".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "occupancy-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let mut vehicle_model = ModelConfig::new(
            env::var("OCCUPANCY_VEHICLE_MODEL").unwrap_or_else(|_| "models/yolov8n.onnx".to_string()),
        );
        vehicle_model.execution_provider =
            env::var("OCCUPANCY_EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string());
        vehicle_model.device_id = env_parse("OCCUPANCY_DEVICE_ID", 0i32)?;
        vehicle_model.confidence_threshold = env_parse("OCCUPANCY_VEHICLE_CONFIDENCE", 0.4f32)?;

        let tracker = TrackerConfig {
            init_delay: env_parse("OCCUPANCY_TRACK_INIT_DELAY", 2u32)?,
            miss_tolerance: env_parse("OCCUPANCY_TRACK_MISS_TOLERANCE", 10u32)?,
            max_distance: env_parse("OCCUPANCY_TRACK_DISTANCE", 100f32)?,
        };

        Ok(Self {
            bind_addr,
            node_id,
            video_source: env::var("OCCUPANCY_VIDEO_SOURCE").ok(),
            vehicle_model,
            spaces_file: env::var("OCCUPANCY_SPACES_FILE")
                .unwrap_or_else(|_| "config/parking_spaces.json".to_string()),
            detection_interval: Duration::from_millis(env_parse(
                "OCCUPANCY_DETECTION_INTERVAL_MS",
                150u64,
            )?),
            frame_interval: Duration::from_millis(env_parse("OCCUPANCY_FRAME_INTERVAL_MS", 40u64)?),
            cooldown: Duration::from_secs(env_parse("OCCUPANCY_COOLDOWN_SECS", 60u64)?),
            prune_interval: Duration::from_secs(env_parse("OCCUPANCY_PRUNE_INTERVAL_SECS", 60u64)?),
            cooldown_sweep_interval: Duration::from_secs(env_parse(
                "OCCUPANCY_COOLDOWN_SWEEP_SECS",
                60u64,
            )?),
            tracker,
            jpeg_quality: env_parse("OCCUPANCY_JPEG_QUALITY", 80u8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_default_and_error() {
        assert_eq!(env_parse("OCCUPANCY_TEST_UNSET", 10u32).unwrap(), 10);

        std::env::set_var("OCCUPANCY_TEST_BAD_DISTANCE", "far");
        let err = env_parse("OCCUPANCY_TEST_BAD_DISTANCE", 100f32).unwrap_err();
        assert!(err.to_string().contains("OCCUPANCY_TEST_BAD_DISTANCE"));
        std::env::remove_var("OCCUPANCY_TEST_BAD_DISTANCE");
    }
}
