//! Vision contracts shared by the plate recognition and occupancy pipelines.
//!
//! These types describe what flows between the frame source, the external
//! detection models and the perception stages. Model internals never leak
//! past these shapes.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A decoded raster frame with its capture time.
///
/// Frames are immutable once read; the next frame supersedes this one.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixels
    pub image: Arc<RgbImage>,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Monotonic index assigned by the frame source
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A 2-D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned bounding box (top-left corner plus size)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X coordinate of top-left corner
    pub x: f32,
    /// Y coordinate of top-left corner
    pub y: f32,
    /// Width of bounding box
    pub width: f32,
    /// Height of bounding box
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates, normalizing swapped corners.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self::new(left, top, right - left, bottom - top)
    }

    /// Build a box of the given size centred on `center`.
    pub fn centered(center: Point, width: f32, height: f32) -> Self {
        Self::new(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Width over height; zero for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        };

        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Characters that appear on the target plates, indexed by detector class id.
pub const PLATE_ALPHABET: [char; 30] = [
    '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'K', 'L',
    'M', 'N', 'P', 'S', 'T', 'U', 'V', 'X', 'Y', 'Z', '0',
];

/// One symbol of the plate alphabet.
///
/// Only constructible from a known class id or a character in
/// [`PLATE_ALPHABET`]; unknown ids are rejected rather than remapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct PlateChar(char);

impl PlateChar {
    pub fn from_class_id(class_id: usize) -> Option<Self> {
        PLATE_ALPHABET.get(class_id).copied().map(Self)
    }

    pub fn class_id(self) -> usize {
        PLATE_ALPHABET
            .iter()
            .position(|c| *c == self.0)
            .unwrap_or_default()
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl TryFrom<char> for PlateChar {
    type Error = String;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        let upper = value.to_ascii_uppercase();
        if PLATE_ALPHABET.contains(&upper) {
            Ok(Self(upper))
        } else {
            Err(format!("'{}' is not part of the plate alphabet", value))
        }
    }
}

impl From<PlateChar> for char {
    fn from(value: PlateChar) -> Self {
        value.0
    }
}

impl fmt::Display for PlateChar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single character found by the character detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharacterDetection {
    pub character: PlateChar,
    /// Box in coordinates normalized to [0, 1] of the crop
    pub bbox: BoundingBox,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

/// A raw plate region returned by the plate detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Vehicle categories the occupancy pipeline cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Motorbike,
    Bus,
}

impl VehicleClass {
    /// Map a COCO class id; any non-vehicle class is `None`.
    pub fn from_coco_id(class_id: usize) -> Option<Self> {
        match class_id {
            2 => Some(Self::Car),
            3 => Some(Self::Motorbike),
            5 => Some(Self::Bus),
            _ => None,
        }
    }

    /// Nominal on-screen footprint (width, height) used for display boxes.
    pub fn estimated_size(self) -> (f32, f32) {
        match self {
            Self::Car => (80.0, 60.0),
            Self::Bus => (120.0, 80.0),
            Self::Motorbike => (50.0, 40.0),
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Car => write!(f, "car"),
            Self::Motorbike => write!(f, "motorbike"),
            Self::Bus => write!(f, "bus"),
        }
    }
}

/// Per-frame vehicle detection fed to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleDetection {
    pub bbox: BoundingBox,
    pub class: VehicleClass,
    pub confidence: f32,
}

/// A vehicle with a persistent identity, as reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedVehicle {
    pub track_id: u64,
    pub centroid: Point,
    pub class: VehicleClass,
    pub confidence: f32,
    pub estimated_box: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_corners_normalizes() {
        let b = BoundingBox::from_corners(10.0, 20.0, 0.0, 5.0);
        assert_eq!(b, BoundingBox::new(0.0, 5.0, 10.0, 15.0));
        assert_eq!(b.center(), Point::new(5.0, 12.5));
    }

    #[test]
    fn test_plate_char_lookup() {
        assert_eq!(PlateChar::from_class_id(0).map(PlateChar::as_char), Some('1'));
        assert_eq!(PlateChar::from_class_id(8).map(PlateChar::as_char), Some('9'));
        assert_eq!(PlateChar::from_class_id(9).map(PlateChar::as_char), Some('A'));
        assert_eq!(PlateChar::from_class_id(28).map(PlateChar::as_char), Some('Z'));
        assert_eq!(PlateChar::from_class_id(29).map(PlateChar::as_char), Some('0'));
        assert!(PlateChar::from_class_id(30).is_none());
        assert!(PlateChar::from_class_id(usize::MAX).is_none());
    }

    #[test]
    fn test_plate_char_rejects_unused_letters() {
        assert!(PlateChar::try_from('I').is_err());
        assert!(PlateChar::try_from('O').is_err());
        assert!(PlateChar::try_from('Q').is_err());
        assert_eq!(PlateChar::try_from('k').map(PlateChar::as_char), Ok('K'));
        assert_eq!(PlateChar::try_from('K').map(PlateChar::class_id), Ok(17));
    }

    #[test]
    fn test_character_detection_serialization() {
        let detection = CharacterDetection {
            character: PlateChar::try_from('5').unwrap(),
            bbox: BoundingBox::new(0.1, 0.2, 0.05, 0.3),
            confidence: 0.9,
        };
        let json = serde_json::to_string(&detection).unwrap();
        assert!(json.contains("\"character\":\"5\""));
        let back: CharacterDetection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, detection);
    }

    #[test]
    fn test_vehicle_class_from_coco() {
        assert_eq!(VehicleClass::from_coco_id(2), Some(VehicleClass::Car));
        assert_eq!(VehicleClass::from_coco_id(3), Some(VehicleClass::Motorbike));
        assert_eq!(VehicleClass::from_coco_id(5), Some(VehicleClass::Bus));
        assert_eq!(VehicleClass::from_coco_id(0), None);
        assert_eq!(VehicleClass::from_coco_id(7), None);
        assert_eq!(VehicleClass::Bus.estimated_size(), (120.0, 80.0));
    }
}
