//! Maps tracked vehicle centroids onto the fixed parking space polygons.

use chrono::{DateTime, Utc};
use common::parking::{OccupancySnapshot, ParkingSpace, SpaceStatus};
use common::vision::{Point, TrackedVehicle};

/// Point-in-polygon with the boundary counted as inside.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if on_segment(point, a, b) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
    if cross.abs() > 1e-4 * scale {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

#[derive(Debug, Clone)]
pub struct OccupancyMapper {
    spaces: Vec<ParkingSpace>,
}

impl OccupancyMapper {
    pub fn new(spaces: Vec<ParkingSpace>) -> Self {
        Self { spaces }
    }

    pub fn spaces(&self) -> &[ParkingSpace] {
        &self.spaces
    }

    /// Fresh snapshot: a space is occupied when any centroid falls inside it.
    pub fn map(&self, vehicles: &[TrackedVehicle], taken_at: DateTime<Utc>) -> OccupancySnapshot {
        let mut snapshot = OccupancySnapshot::all_empty(&self.spaces, taken_at);
        for space in &self.spaces {
            if vehicles
                .iter()
                .any(|v| point_in_polygon(v.centroid, &space.polygon))
            {
                snapshot.spaces.insert(space.id, SpaceStatus::Occupied);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::vision::{BoundingBox, VehicleClass};

    fn square(id: u32, x: f32, y: f32, size: f32) -> ParkingSpace {
        ParkingSpace {
            id,
            polygon: vec![
                Point::new(x, y),
                Point::new(x + size, y),
                Point::new(x + size, y + size),
                Point::new(x, y + size),
            ],
        }
    }

    fn vehicle(x: f32, y: f32) -> TrackedVehicle {
        TrackedVehicle {
            track_id: 1,
            centroid: Point::new(x, y),
            class: VehicleClass::Car,
            confidence: 0.9,
            estimated_box: BoundingBox::centered(Point::new(x, y), 80.0, 60.0),
        }
    }

    #[test]
    fn test_boundary_points_count_as_inside() {
        let space = square(1, 0.0, 0.0, 100.0);
        assert!(point_in_polygon(Point::new(50.0, 50.0), &space.polygon));
        assert!(point_in_polygon(Point::new(100.0, 50.0), &space.polygon));
        assert!(point_in_polygon(Point::new(50.0, 0.0), &space.polygon));
        assert!(point_in_polygon(Point::new(0.0, 0.0), &space.polygon));
        assert!(point_in_polygon(Point::new(100.0, 100.0), &space.polygon));
        assert!(!point_in_polygon(Point::new(100.5, 50.0), &space.polygon));
        assert!(!point_in_polygon(Point::new(-1.0, -1.0), &space.polygon));
    }

    #[test]
    fn test_slanted_polygon() {
        let poly = vec![
            Point::new(10.0, 10.0),
            Point::new(110.0, 30.0),
            Point::new(90.0, 120.0),
            Point::new(0.0, 90.0),
        ];
        assert!(point_in_polygon(Point::new(60.0, 20.0), &poly));
        assert!(point_in_polygon(Point::new(50.0, 60.0), &poly));
        assert!(!point_in_polygon(Point::new(105.0, 110.0), &poly));
    }

    #[test]
    fn test_every_space_present_and_vertex_centroid_occupies() {
        let mapper = OccupancyMapper::new(vec![
            square(1, 0.0, 0.0, 100.0),
            square(2, 200.0, 0.0, 100.0),
            square(3, 400.0, 0.0, 100.0),
        ]);
        let snapshot = mapper.map(&[vehicle(200.0, 0.0)], Utc::now());
        assert_eq!(snapshot.total(), 3);
        assert_eq!(snapshot.spaces[&1], SpaceStatus::Empty);
        assert_eq!(snapshot.spaces[&2], SpaceStatus::Occupied);
        assert_eq!(snapshot.spaces[&3], SpaceStatus::Empty);
    }

    #[test]
    fn test_shared_edge_marks_both_spaces() {
        let mapper = OccupancyMapper::new(vec![square(1, 0.0, 0.0, 100.0), square(2, 100.0, 0.0, 100.0)]);
        let snapshot = mapper.map(&[vehicle(100.0, 50.0)], Utc::now());
        assert_eq!(snapshot.occupied(), 2);
    }

    #[test]
    fn test_no_vehicles_all_empty() {
        let mapper = OccupancyMapper::new(vec![square(7, 0.0, 0.0, 10.0)]);
        let snapshot = mapper.map(&[], Utc::now());
        assert_eq!(snapshot.empty(), 1);
        assert_eq!(snapshot.spaces[&7], SpaceStatus::Empty);
    }
}
