//! Flicker suppression for displayed vehicle boxes.
//!
//! Display only: occupancy is decided from tracker centroids, never from
//! these boxes.

use common::vision::{BoundingBox, VehicleClass, VehicleDetection};
use std::collections::{HashMap, VecDeque};

const CONFIDENCE_FLOOR: f32 = 0.6;
const BUFFER_FRAMES: usize = 3;
const MATCH_IOU: f32 = 0.6;
const SMOOTHING: f32 = 0.3;
const GRID_CELL: f32 = 50.0;

type BucketKey = (VehicleClass, i32, i32);

#[derive(Debug, Default)]
pub struct DetectionStabilizer {
    history: VecDeque<Vec<VehicleDetection>>,
    smoothed: HashMap<BucketKey, BoundingBox>,
}

impl DetectionStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(det: &VehicleDetection) -> BucketKey {
        (
            det.class,
            (det.bbox.x / GRID_CELL).floor() as i32,
            (det.bbox.y / GRID_CELL).floor() as i32,
        )
    }

    /// Boxes to draw for this frame.
    ///
    /// A box passes when a same-class box with IoU above 0.6 appeared in one
    /// of the previous buffered frames, or while the buffer is still filling.
    pub fn stabilize(&mut self, detections: &[VehicleDetection]) -> Vec<VehicleDetection> {
        let confident: Vec<VehicleDetection> = detections
            .iter()
            .filter(|d| d.confidence > CONFIDENCE_FLOOR)
            .copied()
            .collect();

        self.history.push_back(confident.clone());
        while self.history.len() > BUFFER_FRAMES {
            self.history.pop_front();
        }

        let warming_up = self.history.len() < BUFFER_FRAMES;
        let previous = self.history.len().saturating_sub(1);
        let stable: Vec<VehicleDetection> = confident
            .into_iter()
            .filter(|det| {
                warming_up
                    || self.history.iter().take(previous).flatten().any(|prev| {
                        prev.class == det.class && prev.bbox.iou(&det.bbox) > MATCH_IOU
                    })
            })
            .collect();

        stable.into_iter().map(|det| self.smooth(det)).collect()
    }

    fn smooth(&mut self, det: VehicleDetection) -> VehicleDetection {
        let key = Self::bucket(&det);
        let bbox = match self.smoothed.get(&key) {
            Some(prev) => {
                let blend = |cur: f32, old: f32| SMOOTHING * cur + (1.0 - SMOOTHING) * old;
                BoundingBox::from_corners(
                    blend(det.bbox.x, prev.x),
                    blend(det.bbox.y, prev.y),
                    blend(det.bbox.right(), prev.right()),
                    blend(det.bbox.bottom(), prev.bottom()),
                )
            }
            None => det.bbox,
        };
        self.smoothed.insert(key, bbox);
        VehicleDetection { bbox, ..det }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.smoothed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, class: VehicleClass, confidence: f32) -> VehicleDetection {
        VehicleDetection {
            bbox: BoundingBox::new(x, 100.0, 80.0, 60.0),
            class,
            confidence,
        }
    }

    #[test]
    fn test_low_confidence_dropped() {
        let mut stabilizer = DetectionStabilizer::new();
        assert!(stabilizer.stabilize(&[det(10.0, VehicleClass::Car, 0.6)]).is_empty());
    }

    #[test]
    fn test_warm_up_passes_everything() {
        let mut stabilizer = DetectionStabilizer::new();
        assert_eq!(stabilizer.stabilize(&[det(10.0, VehicleClass::Car, 0.9)]).len(), 1);
        assert_eq!(stabilizer.stabilize(&[det(300.0, VehicleClass::Bus, 0.9)]).len(), 1);
    }

    #[test]
    fn test_one_off_box_suppressed_after_warm_up() {
        let mut stabilizer = DetectionStabilizer::new();
        let car = det(10.0, VehicleClass::Car, 0.9);
        stabilizer.stabilize(&[car]);
        stabilizer.stabilize(&[car]);
        assert_eq!(stabilizer.stabilize(&[car]).len(), 1);

        // appears once, far away: flicker
        let ghost = det(400.0, VehicleClass::Car, 0.95);
        let shown = stabilizer.stabilize(&[car, ghost]);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].class, VehicleClass::Car);
    }

    #[test]
    fn test_class_must_match() {
        let mut stabilizer = DetectionStabilizer::new();
        stabilizer.stabilize(&[det(10.0, VehicleClass::Car, 0.9)]);
        stabilizer.stabilize(&[det(10.0, VehicleClass::Car, 0.9)]);
        assert!(stabilizer.stabilize(&[det(10.0, VehicleClass::Bus, 0.9)]).is_empty());
    }

    #[test]
    fn test_position_smoothed_per_bucket() {
        let mut stabilizer = DetectionStabilizer::new();
        stabilizer.stabilize(&[det(10.0, VehicleClass::Car, 0.9)]);
        let out = stabilizer.stabilize(&[det(20.0, VehicleClass::Car, 0.9)]);
        // 0.3 * 20 + 0.7 * 10
        assert!((out[0].bbox.x - 13.0).abs() < 1e-4);
        assert!((out[0].bbox.width - 80.0).abs() < 1e-4);
    }
}
