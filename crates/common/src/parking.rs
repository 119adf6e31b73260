//! Parking space layout and occupancy snapshot types.

use crate::vision::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Identifier of a parking space (1-based, in configuration order)
pub type SpaceId = u32;

#[derive(Debug, Error)]
pub enum ParkingConfigError {
    #[error("failed to read parking layout {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid parking layout json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parking space #{index} has {points} points, at least 3 are required")]
    DegeneratePolygon { index: usize, points: usize },

    #[error("duplicate parking space id {0}")]
    DuplicateId(SpaceId),

    #[error("parking layout contains no spaces")]
    Empty,
}

/// A fixed parking space outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpace {
    pub id: SpaceId,
    /// Polygon vertices in frame pixel coordinates, in drawing order
    pub polygon: Vec<Point>,
}

impl ParkingSpace {
    /// Mean of the polygon vertices, used for labelling
    pub fn label_anchor(&self) -> Point {
        let n = self.polygon.len().max(1) as f32;
        let (sx, sy) = self
            .polygon
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }
}

/// On-disk shape: `[{ "id": 1, "points": [[x, y], ...] }, ...]` with `id` optional.
#[derive(Debug, Deserialize)]
struct SpaceRecord {
    #[serde(default)]
    id: Option<SpaceId>,
    points: Vec<[f32; 2]>,
}

/// Parse a parking layout from JSON text.
pub fn parse_parking_layout(json: &str) -> Result<Vec<ParkingSpace>, ParkingConfigError> {
    let records: Vec<SpaceRecord> = serde_json::from_str(json)?;
    if records.is_empty() {
        return Err(ParkingConfigError::Empty);
    }

    let mut spaces: Vec<ParkingSpace> = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        if record.points.len() < 3 {
            return Err(ParkingConfigError::DegeneratePolygon {
                index,
                points: record.points.len(),
            });
        }

        let id = record.id.unwrap_or(index as SpaceId + 1);
        if spaces.iter().any(|s| s.id == id) {
            return Err(ParkingConfigError::DuplicateId(id));
        }

        spaces.push(ParkingSpace {
            id,
            polygon: record
                .points
                .into_iter()
                .map(|[x, y]| Point::new(x, y))
                .collect(),
        });
    }

    Ok(spaces)
}

/// Load the parking layout file once at startup.
pub fn load_parking_layout(path: impl AsRef<Path>) -> Result<Vec<ParkingSpace>, ParkingConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ParkingConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let spaces = parse_parking_layout(&json)?;
    tracing::info!(
        path = %path.display(),
        spaces = spaces.len(),
        "parking layout loaded"
    );
    Ok(spaces)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpaceStatus {
    #[default]
    Empty,
    Occupied,
}

impl fmt::Display for SpaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceStatus::Empty => write!(f, "empty"),
            SpaceStatus::Occupied => write!(f, "occupied"),
        }
    }
}

/// Dashboard colour band derived from the number of free spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityIndicator {
    Green,
    Yellow,
    Red,
}

/// Complete occupied/empty state for every space at one instant.
///
/// Built wholesale each cycle; every configured space id is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub spaces: BTreeMap<SpaceId, SpaceStatus>,
    pub taken_at: DateTime<Utc>,
}

impl OccupancySnapshot {
    /// Snapshot with every space empty
    pub fn all_empty(spaces: &[ParkingSpace], taken_at: DateTime<Utc>) -> Self {
        Self {
            spaces: spaces.iter().map(|s| (s.id, SpaceStatus::Empty)).collect(),
            taken_at,
        }
    }

    pub fn total(&self) -> usize {
        self.spaces.len()
    }

    pub fn occupied(&self) -> usize {
        self.spaces
            .values()
            .filter(|s| **s == SpaceStatus::Occupied)
            .count()
    }

    pub fn empty(&self) -> usize {
        self.total() - self.occupied()
    }

    /// Occupied share in percent, rounded to one decimal
    pub fn occupancy_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        let rate = self.occupied() as f64 / self.total() as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }

    pub fn status_text(&self) -> String {
        if self.empty() == 0 {
            "Parking full".to_string()
        } else {
            format!("{}/{} spaces available", self.empty(), self.total())
        }
    }

    pub fn indicator(&self) -> AvailabilityIndicator {
        match self.empty() {
            n if n > 5 => AvailabilityIndicator::Green,
            0 => AvailabilityIndicator::Red,
            _ => AvailabilityIndicator::Yellow,
        }
    }

    pub fn overview(&self) -> OccupancyOverview {
        OccupancyOverview {
            total_spaces: self.total(),
            occupied_spaces: self.occupied(),
            empty_spaces: self.empty(),
            occupancy_rate: self.occupancy_rate(),
            status_text: self.status_text(),
            indicator: self.indicator(),
            last_updated: self.taken_at,
        }
    }
}

/// Aggregate view handed to readers alongside the per-space map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyOverview {
    pub total_spaces: usize,
    pub occupied_spaces: usize,
    pub empty_spaces: usize,
    pub occupancy_rate: f64,
    pub status_text: String,
    pub indicator: AvailabilityIndicator,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LAYOUT: &str = r#"[
        {"points": [[0, 0], [100, 0], [100, 50], [0, 50]]},
        {"points": [[110, 0], [210, 0], [210, 50], [110, 50]]}
    ]"#;

    #[test]
    fn test_parse_assigns_sequential_ids() {
        let spaces = parse_parking_layout(LAYOUT).unwrap();
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[0].id, 1);
        assert_eq!(spaces[1].id, 2);
        assert_eq!(spaces[1].polygon[2], Point::new(210.0, 50.0));
    }

    #[test]
    fn test_parse_rejects_degenerate_polygon() {
        let err = parse_parking_layout(r#"[{"points": [[0, 0], [1, 1]]}]"#).unwrap_err();
        assert!(matches!(
            err,
            ParkingConfigError::DegeneratePolygon { index: 0, points: 2 }
        ));
    }

    #[test]
    fn test_parse_rejects_duplicate_and_empty() {
        let dup = r#"[
            {"id": 4, "points": [[0, 0], [1, 0], [1, 1]]},
            {"id": 4, "points": [[0, 0], [1, 0], [1, 1]]}
        ]"#;
        assert!(matches!(
            parse_parking_layout(dup),
            Err(ParkingConfigError::DuplicateId(4))
        ));
        assert!(matches!(
            parse_parking_layout("[]"),
            Err(ParkingConfigError::Empty)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LAYOUT.as_bytes()).unwrap();
        let spaces = load_parking_layout(file.path()).unwrap();
        assert_eq!(spaces.len(), 2);

        let missing = load_parking_layout("/nonexistent/parking.json");
        assert!(matches!(missing, Err(ParkingConfigError::Io { .. })));
    }

    #[test]
    fn test_snapshot_overview() {
        let spaces = parse_parking_layout(LAYOUT).unwrap();
        let mut snapshot = OccupancySnapshot::all_empty(&spaces, Utc::now());
        assert_eq!(snapshot.empty(), 2);
        assert_eq!(snapshot.indicator(), AvailabilityIndicator::Yellow);
        assert_eq!(snapshot.status_text(), "2/2 spaces available");

        snapshot.spaces.insert(1, SpaceStatus::Occupied);
        snapshot.spaces.insert(2, SpaceStatus::Occupied);
        let overview = snapshot.overview();
        assert_eq!(overview.occupied_spaces, 2);
        assert_eq!(overview.occupancy_rate, 100.0);
        assert_eq!(overview.status_text, "Parking full");
        assert_eq!(overview.indicator, AvailabilityIndicator::Red);
    }

    #[test]
    fn test_occupancy_rate_rounding() {
        let spaces: Vec<ParkingSpace> = (1..=3)
            .map(|id| ParkingSpace {
                id,
                polygon: vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(0.0, 1.0)],
            })
            .collect();
        let mut snapshot = OccupancySnapshot::all_empty(&spaces, Utc::now());
        snapshot.spaces.insert(1, SpaceStatus::Occupied);
        assert_eq!(snapshot.occupancy_rate(), 33.3);
    }
}
