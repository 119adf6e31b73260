//! ONNX-backed plate and character detectors.

use crate::detector::{CharacterDetector, PlateDetector};
use crate::error::OcrError;
use common::inference::{ModelConfig, RawDetection, YoloModel};
use common::vision::{BoundingBox, CharacterDetection, PlateChar, PlateDetection};
use image::RgbImage;
use std::time::Instant;
use telemetry::metrics::{MODEL_AVAILABLE, MODEL_INFERENCE_TIME};
use tracing::{debug, warn};

fn load(name: &str, config: ModelConfig) -> Result<YoloModel, OcrError> {
    match YoloModel::load(config) {
        Ok(model) => {
            MODEL_AVAILABLE
                .with_label_values(&[name, model.provider()])
                .set(1);
            Ok(model)
        }
        Err(e) => {
            MODEL_AVAILABLE.with_label_values(&[name, "none"]).set(0);
            Err(OcrError::ModelUnavailable(format!("{}: {:#}", name, e)))
        }
    }
}

fn timed<T>(name: &str, f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, OcrError> {
    let start = Instant::now();
    let result = f();
    MODEL_INFERENCE_TIME
        .with_label_values(&[name])
        .observe(start.elapsed().as_secs_f64());
    result.map_err(OcrError::from)
}

/// Plate localisation model; one run per requested target size
pub struct OnnxPlateDetector {
    model: YoloModel,
}

impl OnnxPlateDetector {
    pub const NAME: &'static str = "plate_detector";

    pub fn load(config: ModelConfig) -> Result<Self, OcrError> {
        Ok(Self {
            model: load(Self::NAME, config)?,
        })
    }
}

impl PlateDetector for OnnxPlateDetector {
    fn detect_plates(&self, image: &RgbImage, target_size: u32) -> Result<Vec<PlateDetection>, OcrError> {
        let raw = timed(Self::NAME, || self.model.infer_at(image, target_size))?;
        Ok(raw
            .into_iter()
            .map(|d| PlateDetection {
                bbox: d.bbox,
                confidence: d.confidence,
            })
            .collect())
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Character model over the 30-symbol plate alphabet
pub struct OnnxCharacterDetector {
    model: YoloModel,
}

impl OnnxCharacterDetector {
    pub const NAME: &'static str = "character_detector";

    pub fn load(config: ModelConfig) -> Result<Self, OcrError> {
        Ok(Self {
            model: load(Self::NAME, config)?,
        })
    }
}

/// Map a decoded box onto the alphabet with coordinates normalized to the
/// crop. Unknown class ids are dropped.
pub fn to_character(det: &RawDetection, width: u32, height: u32) -> Option<CharacterDetection> {
    let Some(character) = PlateChar::from_class_id(det.class_id) else {
        warn!(class_id = det.class_id, "character model returned class outside alphabet");
        return None;
    };
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    Some(CharacterDetection {
        character,
        bbox: BoundingBox::new(
            det.bbox.x / w,
            det.bbox.y / h,
            det.bbox.width / w,
            det.bbox.height / h,
        ),
        confidence: det.confidence,
    })
}

impl CharacterDetector for OnnxCharacterDetector {
    fn detect_characters(&self, image: &RgbImage) -> Result<Vec<CharacterDetection>, OcrError> {
        let raw = timed(Self::NAME, || self.model.infer(image))?;
        let characters: Vec<_> = raw
            .iter()
            .filter_map(|d| to_character(d, image.width(), image.height()))
            .collect();
        debug!(raw = raw.len(), characters = characters.len(), "characters decoded");
        Ok(characters)
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_box_normalized_to_crop() {
        let raw = RawDetection {
            bbox: BoundingBox::new(20.0, 10.0, 10.0, 20.0),
            confidence: 0.8,
            class_id: 9,
        };
        let det = to_character(&raw, 200, 40).unwrap();
        assert_eq!(det.character.as_char(), 'A');
        assert_eq!(det.bbox, BoundingBox::new(0.1, 0.25, 0.05, 0.5));
    }

    #[test]
    fn test_unknown_class_dropped() {
        let raw = RawDetection {
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.9,
            class_id: 99,
        };
        assert!(to_character(&raw, 10, 10).is_none());
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let err = OnnxPlateDetector::load(ModelConfig::new("/nonexistent/plate.onnx"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "model_unavailable");
    }
}
