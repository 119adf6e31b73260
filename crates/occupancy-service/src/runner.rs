//! Throttled occupancy serving loop.
//!
//! Frames are drawn on every tick; vehicle detection and the occupancy cycle
//! run only once the detection interval has elapsed. Track pruning and
//! cooldown expiry run on their own timers.

use crate::detector::VehicleDetector;
use crate::pipeline::OccupancyPipeline;
use crate::state::OccupancyState;
use chrono::Utc;
use common::parking::{OccupancySnapshot, ParkingSpace, SpaceStatus};
use common::shared::LatestFrame;
use common::vision::{Frame, VehicleDetection};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics::PARKING_DETECTION_LATENCY;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EMPTY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OCCUPIED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const VEHICLE_COLOR: Rgb<u8> = Rgb([255, 200, 0]);

#[derive(Debug, Clone, Copy)]
pub struct RunnerTimings {
    pub frame_interval: Duration,
    pub detection_interval: Duration,
    pub prune_interval: Duration,
    pub cooldown_sweep_interval: Duration,
}

pub struct OccupancyRunner {
    detector: Option<Arc<dyn VehicleDetector>>,
    pipeline: OccupancyPipeline,
    frames: LatestFrame,
    state: OccupancyState,
    timings: RunnerTimings,
}

impl OccupancyRunner {
    /// `detector` is `None` when the model failed to load; frames are then
    /// passed through with only the space outlines drawn.
    pub fn new(
        detector: Option<Arc<dyn VehicleDetector>>,
        pipeline: OccupancyPipeline,
        frames: LatestFrame,
        state: OccupancyState,
        timings: RunnerTimings,
    ) -> Self {
        Self {
            detector,
            pipeline,
            frames,
            state,
            timings,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut frame_tick = ticker(self.timings.frame_interval);
        let mut prune_tick = ticker(self.timings.prune_interval);
        let mut sweep_tick = ticker(self.timings.cooldown_sweep_interval);
        let mut last_detection: Option<Instant> = None;
        let mut last_sequence = None;
        let mut display: Vec<VehicleDetection> = Vec::new();

        self.state.publish_snapshot(OccupancySnapshot::all_empty(
            self.pipeline.spaces(),
            Utc::now(),
        ));
        info!(
            spaces = self.pipeline.spaces().len(),
            detector = self.detector.is_some(),
            detection_interval_ms = self.timings.detection_interval.as_millis() as u64,
            "occupancy serving loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = prune_tick.tick() => {
                    let removed = self.pipeline.prune();
                    if removed > 0 {
                        debug!(removed, active = self.pipeline.active_tracks(), "stale tracks pruned");
                    }
                }
                _ = sweep_tick.tick() => {
                    let cleared = self.pipeline.expire_cooldowns(Utc::now());
                    if cleared > 0 {
                        debug!(cleared, "notification cooldowns expired");
                    }
                }
                _ = frame_tick.tick() => {
                    let Some(frame) = self.frames.latest() else {
                        continue;
                    };
                    if last_sequence == Some(frame.sequence) {
                        continue;
                    }
                    last_sequence = Some(frame.sequence);

                    let due = last_detection.map_or(true, |t| t.elapsed() >= self.timings.detection_interval);
                    let detector = if due { self.detector.clone() } else { None };
                    if let Some(detector) = detector {
                        last_detection = Some(Instant::now());
                        if let Some(detections) = detect(&detector, &frame).await {
                            display = self.cycle(&detections);
                        }
                    }

                    let snapshot = self.state.snapshot().value;
                    let annotated = annotate_occupancy(&frame.image, self.pipeline.spaces(), &snapshot, &display);
                    self.state.publish_frame(Frame {
                        image: Arc::new(annotated),
                        captured_at: frame.captured_at,
                        sequence: frame.sequence,
                    });
                }
            }
        }

        info!("occupancy serving loop stopped");
    }

    fn cycle(&mut self, detections: &[VehicleDetection]) -> Vec<VehicleDetection> {
        let out = self.pipeline.update(detections, Utc::now());
        self.state.publish_snapshot(out.snapshot);
        if out.event.is_some() {
            self.state.publish_notifications(self.pipeline.history());
        }
        out.display
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

async fn detect(detector: &Arc<dyn VehicleDetector>, frame: &Frame) -> Option<Vec<VehicleDetection>> {
    let detector = Arc::clone(detector);
    let image = Arc::clone(&frame.image);
    let start = Instant::now();
    let result = tokio::task::spawn_blocking(move || detector.detect_vehicles(&image)).await;
    PARKING_DETECTION_LATENCY.observe(start.elapsed().as_secs_f64());

    match result {
        Ok(Ok(detections)) => Some(detections),
        Ok(Err(e)) => {
            warn!(sequence = frame.sequence, error = %e, "vehicle detection failed");
            None
        }
        Err(e) => {
            error!(error = %e, "vehicle detection task panicked");
            None
        }
    }
}

/// Draw space outlines (green empty, red occupied) and vehicle boxes.
pub fn annotate_occupancy(
    image: &RgbImage,
    spaces: &[ParkingSpace],
    snapshot: &OccupancySnapshot,
    vehicles: &[VehicleDetection],
) -> RgbImage {
    let mut canvas = image.clone();

    for space in spaces {
        let color = match snapshot.spaces.get(&space.id) {
            Some(SpaceStatus::Occupied) => OCCUPIED_COLOR,
            _ => EMPTY_COLOR,
        };
        let n = space.polygon.len();
        for i in 0..n {
            let a = space.polygon[i];
            let b = space.polygon[(i + 1) % n];
            draw_line_segment_mut(&mut canvas, (a.x, a.y), (b.x, b.y), color);
        }
    }

    for vehicle in vehicles {
        let bbox = vehicle.bbox;
        if bbox.width < 1.0 || bbox.height < 1.0 {
            continue;
        }
        let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width as u32, bbox.height as u32);
        draw_hollow_rect_mut(&mut canvas, rect, VEHICLE_COLOR);
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionError;
    use crate::notifier::StatusChangeNotifier;
    use crate::occupancy::OccupancyMapper;
    use crate::tracker::CentroidTracker;
    use common::vision::{BoundingBox, Point, VehicleClass};
    use std::collections::BTreeMap;
    use tokio::sync::broadcast;

    fn space() -> ParkingSpace {
        ParkingSpace {
            id: 1,
            polygon: vec![
                Point::new(10.0, 10.0),
                Point::new(50.0, 10.0),
                Point::new(50.0, 50.0),
                Point::new(10.0, 50.0),
            ],
        }
    }

    #[test]
    fn test_outline_color_follows_status() {
        let image = RgbImage::new(64, 64);
        let mut snapshot = OccupancySnapshot {
            spaces: BTreeMap::from([(1, SpaceStatus::Empty)]),
            taken_at: Utc::now(),
        };

        let drawn = annotate_occupancy(&image, &[space()], &snapshot, &[]);
        assert_eq!(*drawn.get_pixel(30, 10), EMPTY_COLOR);

        snapshot.spaces.insert(1, SpaceStatus::Occupied);
        let drawn = annotate_occupancy(&image, &[space()], &snapshot, &[]);
        assert_eq!(*drawn.get_pixel(30, 10), OCCUPIED_COLOR);
        assert_eq!(*drawn.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    struct ParkedCar;

    impl VehicleDetector for ParkedCar {
        fn detect_vehicles(&self, _: &RgbImage) -> Result<Vec<VehicleDetection>, DetectionError> {
            Ok(vec![VehicleDetection {
                bbox: BoundingBox::centered(Point::new(30.0, 30.0), 20.0, 16.0),
                class: VehicleClass::Car,
                confidence: 0.9,
            }])
        }
    }

    #[tokio::test]
    async fn test_loop_marks_space_occupied() {
        let frames = LatestFrame::new();
        let (tx, _) = broadcast::channel(8);
        let state = OccupancyState::new("lot-a", 80, tx);
        let pipeline = OccupancyPipeline::new(
            Box::new(CentroidTracker::default()),
            OccupancyMapper::new(vec![space()]),
            StatusChangeNotifier::new(Duration::from_secs(60)),
        );
        let runner = OccupancyRunner::new(
            Some(Arc::new(ParkedCar)),
            pipeline,
            frames.clone(),
            state.clone(),
            RunnerTimings {
                frame_interval: Duration::from_millis(5),
                detection_interval: Duration::ZERO,
                prune_interval: Duration::from_secs(60),
                cooldown_sweep_interval: Duration::from_secs(60),
            },
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        for seq in 0..20u64 {
            frames.store(Frame::new(RgbImage::new(64, 64), seq));
            tokio::time::sleep(Duration::from_millis(10)).await;
            if state.snapshot().value.occupied() == 1 {
                break;
            }
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(state.snapshot().value.occupied(), 1);
        assert!(state.annotated_frame().is_some());
        let history = state.notifications();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id.split('_').next(), Some("parking"));
    }
}
