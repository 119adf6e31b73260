//! Capability contracts for the external plate and character models.
//!
//! Inference is blocking and CPU/GPU bound, so these are plain synchronous
//! traits; async callers wrap them in `spawn_blocking`.

use crate::error::OcrError;
use common::vision::{CharacterDetection, PlateDetection};
use image::RgbImage;

/// Finds characters of the plate alphabet on a plate crop.
pub trait CharacterDetector: Send + Sync {
    /// Detections with boxes normalized to the crop. Unfiltered: callers
    /// apply their own confidence floor.
    fn detect_characters(&self, image: &RgbImage) -> Result<Vec<CharacterDetection>, OcrError>;

    fn name(&self) -> &str {
        "character_detector"
    }
}

/// Finds raw plate regions in a frame.
pub trait PlateDetector: Send + Sync {
    /// Boxes in the coordinates of `image`, which the caller has already
    /// scaled for `target_size`. No cross-call deduplication.
    fn detect_plates(&self, image: &RgbImage, target_size: u32) -> Result<Vec<PlateDetection>, OcrError>;

    fn name(&self) -> &str {
        "plate_detector"
    }
}
