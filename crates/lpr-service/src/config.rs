use anyhow::{Context, Result};
use common::inference::ModelConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Tunables for locating and reading plates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LprTuning {
    /// Raster sizes the plate detector is run at
    #[serde(default = "default_target_sizes")]
    pub target_sizes: Vec<u32>,

    /// Smallest accepted plate box area in source pixels
    #[serde(default = "default_min_area")]
    pub min_area: f32,

    /// Largest accepted plate box area in source pixels
    #[serde(default = "default_max_area")]
    pub max_area: f32,

    /// Accepted width/height range
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f32,
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f32,

    /// Plate boxes passed on to OCR per frame
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Crop padding as a fraction of the longer box side
    #[serde(default = "default_crop_padding")]
    pub crop_padding: f32,

    /// Replicated border added around every crop, in pixels
    #[serde(default = "default_crop_border")]
    pub crop_border: u32,

    /// Character detections at or below this confidence are dropped
    #[serde(default = "default_char_confidence_floor")]
    pub char_confidence_floor: f32,

    /// Upper bound on preprocessing variants per crop
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,

    /// Skew corrections tried on every crop, in degrees (applied as +/-)
    #[serde(default = "default_rotation_angles")]
    pub rotation_angles: Vec<f32>,
}

fn default_target_sizes() -> Vec<u32> {
    vec![640, 800]
}

fn default_min_area() -> f32 {
    500.0
}

fn default_max_area() -> f32 {
    80_000.0
}

fn default_min_ratio() -> f32 {
    1.2
}

fn default_max_ratio() -> f32 {
    7.0
}

fn default_top_k() -> usize {
    3
}

fn default_crop_padding() -> f32 {
    0.12
}

fn default_crop_border() -> u32 {
    8
}

fn default_char_confidence_floor() -> f32 {
    0.25
}

fn default_max_variants() -> usize {
    12
}

fn default_rotation_angles() -> Vec<f32> {
    vec![6.0, 12.0, 20.0]
}

impl Default for LprTuning {
    fn default() -> Self {
        Self {
            target_sizes: default_target_sizes(),
            min_area: default_min_area(),
            max_area: default_max_area(),
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
            top_k: default_top_k(),
            crop_padding: default_crop_padding(),
            crop_border: default_crop_border(),
            char_confidence_floor: default_char_confidence_floor(),
            max_variants: default_max_variants(),
            rotation_angles: default_rotation_angles(),
        }
    }
}

impl LprTuning {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tuning file {}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid tuning file {}", path))
    }
}

#[derive(Debug, Clone)]
pub struct LprServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Camera identifier used in logs
    pub node_id: String,

    /// Video file or stream URI
    pub video_source: Option<String>,

    pub plate_model: ModelConfig,
    pub char_model: ModelConfig,

    /// Minimum spacing between full detection/OCR runs
    pub detection_interval: Duration,

    /// Serving loop tick (display frame rate)
    pub frame_interval: Duration,

    /// Annotated frames wider than this are downscaled for display
    pub display_width: u32,

    pub jpeg_quality: u8,

    pub tuning: LprTuning,
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

impl LprServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("LPR_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "lpr-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let provider = env::var("LPR_EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string());
        let device_id = env_parse("LPR_DEVICE_ID", 0i32)?;

        let mut plate_model = ModelConfig::new(
            env::var("LPR_PLATE_MODEL").unwrap_or_else(|_| "models/plate_detector.onnx".to_string()),
        );
        plate_model.execution_provider = provider.clone();
        plate_model.device_id = device_id;
        plate_model.confidence_threshold = env_parse("LPR_PLATE_CONFIDENCE", 0.08f32)?;
        plate_model.iou_threshold = 0.4;
        plate_model.max_detections = 15;

        let mut char_model = ModelConfig::new(
            env::var("LPR_CHAR_MODEL").unwrap_or_else(|_| "models/plate_chars.onnx".to_string()),
        );
        char_model.execution_provider = provider;
        char_model.device_id = device_id;
        char_model.confidence_threshold = 0.15;

        let tuning = match env::var("LPR_TUNING_FILE") {
            Ok(path) => LprTuning::from_file(&path)?,
            Err(_) => LprTuning::default(),
        };

        Ok(Self {
            bind_addr,
            node_id,
            video_source: env::var("LPR_VIDEO_SOURCE").ok(),
            plate_model,
            char_model,
            detection_interval: Duration::from_millis(env_parse("LPR_DETECTION_INTERVAL_MS", 150u64)?),
            frame_interval: Duration::from_millis(env_parse("LPR_FRAME_INTERVAL_MS", 40u64)?),
            display_width: env_parse("LPR_DISPLAY_WIDTH", 900u32)?,
            jpeg_quality: env_parse("LPR_JPEG_QUALITY", 80u8)?,
            tuning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tuning_defaults() {
        let tuning = LprTuning::default();
        assert_eq!(tuning.target_sizes, vec![640, 800]);
        assert_eq!(tuning.min_area, 500.0);
        assert_eq!(tuning.max_area, 80_000.0);
        assert_eq!(tuning.top_k, 3);
        assert_eq!(tuning.max_variants, 12);
    }

    #[test]
    fn test_tuning_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"top_k": 5, "rotation_angles": [4.0]}"#)
            .unwrap();
        let tuning = LprTuning::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(tuning.top_k, 5);
        assert_eq!(tuning.rotation_angles, vec![4.0]);
        assert_eq!(tuning.char_confidence_floor, 0.25);
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("LPR_TEST_BAD_NUMBER", "fast");
        let err = env_parse("LPR_TEST_BAD_NUMBER", 1u64).unwrap_err();
        assert!(err.to_string().contains("LPR_TEST_BAD_NUMBER"));
        std::env::remove_var("LPR_TEST_BAD_NUMBER");

        assert_eq!(env_parse("LPR_TEST_UNSET_NUMBER", 7u64).unwrap(), 7);
    }
}
