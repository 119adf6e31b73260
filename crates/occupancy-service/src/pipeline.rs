//! One detection cycle: track, map onto spaces, notify.

use crate::notifier::StatusChangeNotifier;
use crate::occupancy::OccupancyMapper;
use crate::stabilizer::DetectionStabilizer;
use crate::tracker::VehicleTracker;
use crate::types::NotificationEvent;
use chrono::{DateTime, Utc};
use common::parking::{OccupancySnapshot, ParkingSpace};
use common::vision::{TrackedVehicle, VehicleDetection};
use telemetry::metrics::{PARKING_ACTIVE_TRACKS, PARKING_SPACES};
use tracing::debug;

/// Everything a cycle produces
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub tracks: Vec<TrackedVehicle>,
    /// Boxes to draw; not used for occupancy
    pub display: Vec<VehicleDetection>,
    pub snapshot: OccupancySnapshot,
    pub event: Option<NotificationEvent>,
}

pub struct OccupancyPipeline {
    tracker: Box<dyn VehicleTracker>,
    stabilizer: DetectionStabilizer,
    mapper: OccupancyMapper,
    notifier: StatusChangeNotifier,
}

impl OccupancyPipeline {
    pub fn new(tracker: Box<dyn VehicleTracker>, mapper: OccupancyMapper, notifier: StatusChangeNotifier) -> Self {
        Self {
            tracker,
            stabilizer: DetectionStabilizer::new(),
            mapper,
            notifier,
        }
    }

    pub fn spaces(&self) -> &[ParkingSpace] {
        self.mapper.spaces()
    }

    pub fn update(&mut self, detections: &[VehicleDetection], now: DateTime<Utc>) -> CycleOutput {
        let tracks = self.tracker.track(detections);
        let display = self.stabilizer.stabilize(detections);
        let snapshot = self.mapper.map(&tracks, now);

        PARKING_SPACES
            .with_label_values(&["occupied"])
            .set(snapshot.occupied() as i64);
        PARKING_SPACES
            .with_label_values(&["empty"])
            .set(snapshot.empty() as i64);
        PARKING_SPACES
            .with_label_values(&["total"])
            .set(snapshot.total() as i64);
        PARKING_ACTIVE_TRACKS.set(self.tracker.active_tracks() as i64);

        let event = self.notifier.process(&snapshot, now);
        debug!(
            detections = detections.len(),
            tracks = tracks.len(),
            occupied = snapshot.occupied(),
            "occupancy cycle"
        );

        CycleOutput {
            tracks,
            display,
            snapshot,
            event,
        }
    }

    /// Remove tracks past their miss tolerance.
    pub fn prune(&mut self) -> usize {
        let removed = self.tracker.prune_stale();
        PARKING_ACTIVE_TRACKS.set(self.tracker.active_tracks() as i64);
        removed
    }

    pub fn expire_cooldowns(&mut self, now: DateTime<Utc>) -> usize {
        self.notifier.expire_cooldowns(now)
    }

    pub fn history(&self) -> Vec<NotificationEvent> {
        self.notifier.history()
    }

    pub fn active_tracks(&self) -> usize {
        self.tracker.active_tracks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{CentroidTracker, TrackerConfig};
    use crate::types::NotificationType;
    use chrono::Duration as ChronoDuration;
    use common::vision::{BoundingBox, Point, VehicleClass};
    use std::time::Duration;

    fn square(id: u32, x: f32) -> ParkingSpace {
        ParkingSpace {
            id,
            polygon: vec![
                Point::new(x, 0.0),
                Point::new(x + 100.0, 0.0),
                Point::new(x + 100.0, 100.0),
                Point::new(x, 100.0),
            ],
        }
    }

    fn car_at(x: f32, y: f32) -> VehicleDetection {
        VehicleDetection {
            bbox: BoundingBox::centered(Point::new(x, y), 80.0, 60.0),
            class: VehicleClass::Car,
            confidence: 0.9,
        }
    }

    fn pipeline() -> OccupancyPipeline {
        OccupancyPipeline::new(
            Box::new(CentroidTracker::new(TrackerConfig {
                init_delay: 2,
                miss_tolerance: 2,
                max_distance: 100.0,
            })),
            OccupancyMapper::new(vec![square(1, 0.0), square(2, 200.0)]),
            StatusChangeNotifier::new(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_lot_fills_after_init_delay() {
        let mut pipeline = pipeline();
        let t0 = Utc::now();
        let cars = [car_at(50.0, 50.0), car_at(250.0, 50.0)];

        let first = pipeline.update(&cars, t0);
        assert!(first.tracks.is_empty());
        assert_eq!(first.snapshot.empty(), 2);
        assert!(first.event.is_none());

        let second = pipeline.update(&cars, t0 + ChronoDuration::seconds(1));
        assert_eq!(second.tracks.len(), 2);
        assert_eq!(second.snapshot.occupied(), 2);
        let event = second.event.unwrap();
        assert_eq!(event.notification_type, NotificationType::ParkingFull);
        assert_eq!(pipeline.history().len(), 1);
    }

    #[test]
    fn test_short_dropout_keeps_space_occupied() {
        let mut pipeline = pipeline();
        let t0 = Utc::now();
        pipeline.update(&[car_at(50.0, 50.0)], t0);
        pipeline.update(&[car_at(50.0, 50.0)], t0);

        let out = pipeline.update(&[], t0);
        assert_eq!(out.snapshot.occupied(), 1);
        pipeline.update(&[], t0);
        let out = pipeline.update(&[], t0);
        assert_eq!(out.snapshot.occupied(), 0);

        assert_eq!(pipeline.prune(), 1);
        assert_eq!(pipeline.active_tracks(), 0);
    }
}
