//! Vehicle detection contract and its ONNX implementation.

use common::inference::{ModelConfig, YoloModel};
use common::vision::{VehicleClass, VehicleDetection};
use image::RgbImage;
use std::time::Instant;
use telemetry::metrics::{MODEL_AVAILABLE, MODEL_INFERENCE_TIME};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("vehicle model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("vehicle inference failed: {0}")]
    Inference(String),
}

/// Finds vehicles of the tracked classes in a frame.
pub trait VehicleDetector: Send + Sync {
    fn detect_vehicles(&self, image: &RgbImage) -> Result<Vec<VehicleDetection>, DetectionError>;
}

/// COCO-trained YOLO model; only car, motorbike and bus are kept
pub struct OnnxVehicleDetector {
    model: YoloModel,
}

impl OnnxVehicleDetector {
    pub const NAME: &'static str = "vehicle_detector";

    pub fn load(config: ModelConfig) -> Result<Self, DetectionError> {
        match YoloModel::load(config) {
            Ok(model) => {
                MODEL_AVAILABLE
                    .with_label_values(&[Self::NAME, model.provider()])
                    .set(1);
                Ok(Self { model })
            }
            Err(e) => {
                MODEL_AVAILABLE.with_label_values(&[Self::NAME, "none"]).set(0);
                Err(DetectionError::ModelUnavailable(format!("{:#}", e)))
            }
        }
    }

    pub fn provider(&self) -> &str {
        self.model.provider()
    }
}

impl VehicleDetector for OnnxVehicleDetector {
    fn detect_vehicles(&self, image: &RgbImage) -> Result<Vec<VehicleDetection>, DetectionError> {
        let start = Instant::now();
        let raw = self.model.infer(image);
        MODEL_INFERENCE_TIME
            .with_label_values(&[Self::NAME])
            .observe(start.elapsed().as_secs_f64());

        let raw = raw.map_err(|e| DetectionError::Inference(format!("{:#}", e)))?;
        Ok(raw
            .into_iter()
            .filter_map(|d| {
                Some(VehicleDetection {
                    class: VehicleClass::from_coco_id(d.class_id)?,
                    bbox: d.bbox,
                    confidence: d.confidence,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_reports_unavailable() {
        let err = OnnxVehicleDetector::load(ModelConfig::new("/nonexistent/yolov8n.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, DetectionError::ModelUnavailable(_)));
    }
}
