//! Multi-scale plate localisation and crop extraction.
//!
//! The plate detector runs once per configured target size. Boxes from
//! different scales are never merged: overlapping hits on the same plate
//! all compete for the top-k slots by confidence.

use crate::config::LprTuning;
use crate::detector::PlateDetector;
use crate::enhance::replicate_border;
use crate::error::OcrError;
use common::vision::BoundingBox;
use image::{imageops::FilterType, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Width/height above which a plate is treated as single-row
const LONG_PLATE_RATIO: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateType {
    /// Single-row plate
    Long,
    /// Squarer plate, usually two rows
    Square,
}

impl PlateType {
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        if bbox.width / bbox.height.max(1e-6) > LONG_PLATE_RATIO {
            PlateType::Long
        } else {
            PlateType::Square
        }
    }
}

/// A plate box in source-frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocatedPlate {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Detector raster size that produced this box
    pub target_size: u32,
    pub plate_type: PlateType,
}

pub struct PlateLocator {
    detector: Arc<dyn PlateDetector>,
    target_sizes: Vec<u32>,
    min_area: f32,
    max_area: f32,
    min_ratio: f32,
    max_ratio: f32,
    top_k: usize,
}

impl PlateLocator {
    pub fn new(detector: Arc<dyn PlateDetector>, tuning: &LprTuning) -> Self {
        Self {
            detector,
            target_sizes: tuning.target_sizes.clone(),
            min_area: tuning.min_area,
            max_area: tuning.max_area,
            min_ratio: tuning.min_ratio,
            max_ratio: tuning.max_ratio,
            top_k: tuning.top_k,
        }
    }

    /// Geometry gate applied to every rescaled box
    pub fn accepts(&self, bbox: &BoundingBox) -> bool {
        let area = bbox.area();
        let ratio = bbox.aspect_ratio();
        (self.min_area..=self.max_area).contains(&area)
            && (self.min_ratio..=self.max_ratio).contains(&ratio)
    }

    /// All accepted boxes across scales, highest confidence first, at most
    /// `top_k`. Fails only when every scale failed.
    pub fn locate(&self, frame: &RgbImage) -> Result<Vec<LocatedPlate>, OcrError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(OcrError::InvalidCrop("empty frame".to_string()));
        }

        let mut located = Vec::new();
        let mut last_error = None;
        let mut any_scale_ok = false;

        for &size in &self.target_sizes {
            let (scaled, scale) = scale_for_target(frame, size);
            let raw = match self.detector.detect_plates(&scaled, size) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(target_size = size, error = %e, "plate detection failed at scale");
                    last_error = Some(e);
                    continue;
                }
            };
            any_scale_ok = true;

            let before = raw.len();
            located.extend(raw.into_iter().filter_map(|det| {
                let bbox = det.bbox.scaled(1.0 / scale);
                self.accepts(&bbox).then(|| LocatedPlate {
                    bbox,
                    confidence: det.confidence,
                    target_size: size,
                    plate_type: PlateType::from_bbox(&bbox),
                })
            }));
            debug!(target_size = size, raw = before, kept = located.len(), "plate scale done");
        }

        if !any_scale_ok {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        located.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        located.truncate(self.top_k);
        Ok(located)
    }
}

/// Downscale so the longer side equals `size`; smaller frames pass unchanged.
pub fn scale_for_target(frame: &RgbImage, size: u32) -> (RgbImage, f32) {
    let longest = frame.width().max(frame.height());
    if longest <= size || size == 0 {
        return (frame.clone(), 1.0);
    }
    let scale = size as f32 / longest as f32;
    let w = ((frame.width() as f32 * scale) as u32).max(1);
    let h = ((frame.height() as f32 * scale) as u32).max(1);
    (image::imageops::resize(frame, w, h, FilterType::Triangle), scale)
}

/// Cut a padded crop around `bbox` and add a replicated border.
///
/// Padding is `padding * max(w, h)` on every side, clamped to the frame.
pub fn crop_plate(
    frame: &RgbImage,
    bbox: &BoundingBox,
    padding: f32,
    border: u32,
) -> Result<RgbImage, OcrError> {
    let pad = (padding * bbox.width.max(bbox.height)).floor().max(0.0);
    let x1 = (bbox.x - pad).max(0.0).floor() as u32;
    let y1 = (bbox.y - pad).max(0.0).floor() as u32;
    let x2 = ((bbox.right() + pad).min(frame.width() as f32)).max(0.0) as u32;
    let y2 = ((bbox.bottom() + pad).min(frame.height() as f32)).max(0.0) as u32;

    if x2 <= x1 || y2 <= y1 {
        return Err(OcrError::InvalidCrop(format!(
            "zero-area crop at ({}, {})-({}, {})",
            x1, y1, x2, y2
        )));
    }

    let crop = image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image();
    Ok(replicate_border(&crop, border))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::vision::PlateDetection;
    use std::sync::Mutex;

    /// Returns fixed boxes per target size and records the raster it saw
    struct FixedPlates {
        by_size: Vec<(u32, Vec<PlateDetection>)>,
        seen: Mutex<Vec<(u32, u32, u32)>>,
    }

    impl PlateDetector for FixedPlates {
        fn detect_plates(
            &self,
            image: &RgbImage,
            target_size: u32,
        ) -> Result<Vec<PlateDetection>, OcrError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((target_size, image.width(), image.height()));
            }
            Ok(self
                .by_size
                .iter()
                .find(|(s, _)| *s == target_size)
                .map(|(_, d)| d.clone())
                .unwrap_or_default())
        }
    }

    struct Broken;

    impl PlateDetector for Broken {
        fn detect_plates(&self, _: &RgbImage, _: u32) -> Result<Vec<PlateDetection>, OcrError> {
            Err(OcrError::ModelUnavailable("plate model not loaded".into()))
        }
    }

    fn plate(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> PlateDetection {
        PlateDetection {
            bbox: BoundingBox::new(x, y, w, h),
            confidence,
        }
    }

    #[test]
    fn test_small_box_discarded_regardless_of_confidence() {
        let detector = Arc::new(FixedPlates {
            by_size: vec![(640, vec![plate(10.0, 10.0, 30.0, 10.0, 0.99)])],
            seen: Mutex::new(Vec::new()),
        });
        let locator = PlateLocator::new(detector, &LprTuning::default());
        let frame = RgbImage::new(320, 240);
        assert!(locator.locate(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_boxes_rescaled_to_source_frame() {
        // 1280x720 at target 640 is halved
        let detector = Arc::new(FixedPlates {
            by_size: vec![(640, vec![plate(100.0, 50.0, 60.0, 20.0, 0.7)])],
            seen: Mutex::new(Vec::new()),
        });
        let tuning = LprTuning {
            target_sizes: vec![640],
            ..LprTuning::default()
        };
        let locator = PlateLocator::new(detector.clone(), &tuning);
        let located = locator.locate(&RgbImage::new(1280, 720)).unwrap();

        assert_eq!(located.len(), 1);
        assert_eq!(located[0].bbox, BoundingBox::new(200.0, 100.0, 120.0, 40.0));
        assert_eq!(located[0].target_size, 640);
        assert_eq!(located[0].plate_type, PlateType::Square);
        assert_eq!(detector.seen.lock().unwrap()[0], (640, 640, 360));
    }

    #[test]
    fn test_scales_not_merged_and_top_k_by_confidence() {
        let frame = RgbImage::new(600, 400);
        let detector = Arc::new(FixedPlates {
            by_size: vec![
                (
                    640,
                    vec![
                        plate(100.0, 100.0, 100.0, 30.0, 0.6),
                        plate(300.0, 200.0, 90.0, 30.0, 0.5),
                    ],
                ),
                (
                    800,
                    vec![
                        plate(101.0, 100.0, 100.0, 30.0, 0.9),
                        plate(10.0, 10.0, 90.0, 30.0, 0.4),
                    ],
                ),
            ],
            seen: Mutex::new(Vec::new()),
        });
        let locator = PlateLocator::new(detector, &LprTuning::default());
        let located = locator.locate(&frame).unwrap();

        let confidences: Vec<f32> = located.iter().map(|p| p.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.6, 0.5]);
        // the same plate found at both scales is kept twice
        assert_eq!(located[0].target_size, 800);
        assert_eq!(located[1].target_size, 640);
    }

    #[test]
    fn test_ratio_gate() {
        let locator = PlateLocator::new(Arc::new(Broken), &LprTuning::default());
        assert!(locator.accepts(&BoundingBox::new(0.0, 0.0, 100.0, 40.0)));
        assert!(!locator.accepts(&BoundingBox::new(0.0, 0.0, 40.0, 40.0)));
        assert!(!locator.accepts(&BoundingBox::new(0.0, 0.0, 400.0, 40.0)));
        assert!(!locator.accepts(&BoundingBox::new(0.0, 0.0, 1000.0, 200.0)));
    }

    #[test]
    fn test_all_scales_failing_reports_error() {
        let locator = PlateLocator::new(Arc::new(Broken), &LprTuning::default());
        let err = locator.locate(&RgbImage::new(100, 100)).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn test_crop_padding_and_border() {
        let frame = RgbImage::new(400, 300);
        let bbox = BoundingBox::new(100.0, 100.0, 100.0, 30.0);
        let crop = crop_plate(&frame, &bbox, 0.12, 8).unwrap();
        // pad 12 each side, then 8 px border
        assert_eq!(crop.dimensions(), (124 + 16, 54 + 16));

        let edge = BoundingBox::new(0.0, 0.0, 50.0, 20.0);
        let crop = crop_plate(&frame, &edge, 0.12, 0).unwrap();
        assert_eq!(crop.dimensions(), (56, 26));
    }

    #[test]
    fn test_zero_area_crop_rejected() {
        let frame = RgbImage::new(100, 100);
        let outside = BoundingBox::new(150.0, 150.0, 20.0, 10.0);
        let err = crop_plate(&frame, &outside, 0.12, 8).unwrap_err();
        assert!(matches!(err, OcrError::InvalidCrop(_)));
    }
}
