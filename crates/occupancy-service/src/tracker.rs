//! Vehicle tracking contract and the built-in centroid tracker.
//!
//! A track is reported once it has been matched on `init_delay` consecutive
//! frames. Confirmed tracks keep their id and last known centroid through up
//! to `miss_tolerance` consecutive misses; after that they stop being
//! reported and are removed by [`VehicleTracker::prune_stale`].

use common::vision::{BoundingBox, Point, TrackedVehicle, VehicleClass, VehicleDetection};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Consecutive matches before a track is reported
    pub init_delay: u32,
    /// Consecutive misses a confirmed track survives
    pub miss_tolerance: u32,
    /// Largest centroid jump (pixels) still treated as the same vehicle
    pub max_distance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            init_delay: 2,
            miss_tolerance: 10,
            max_distance: 100.0,
        }
    }
}

/// Assigns persistent ids to per-frame vehicle detections.
pub trait VehicleTracker: Send {
    /// Feed one frame of detections; returns every reportable track.
    fn track(&mut self, detections: &[VehicleDetection]) -> Vec<TrackedVehicle>;

    /// Drop tracks that can no longer be reported. Returns how many were removed.
    fn prune_stale(&mut self) -> usize;

    /// Tracks currently held, reportable or not
    fn active_tracks(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Track {
    id: u64,
    centroid: Point,
    class: VehicleClass,
    confidence: f32,
    hits: u32,
    misses: u32,
}

impl Track {
    fn confirmed(&self, init_delay: u32) -> bool {
        self.hits >= init_delay
    }

    /// Tentative tracks die on their first miss; confirmed ones after the tolerance.
    fn stale(&self, config: &TrackerConfig) -> bool {
        if self.confirmed(config.init_delay) {
            self.misses > config.miss_tolerance
        } else {
            self.misses > 0
        }
    }

    fn report(&self) -> TrackedVehicle {
        let (w, h) = self.class.estimated_size();
        TrackedVehicle {
            track_id: self.id,
            centroid: self.centroid,
            class: self.class,
            confidence: self.confidence,
            estimated_box: BoundingBox::centered(self.centroid, w, h),
        }
    }
}

/// Greedy nearest-centroid association
#[derive(Debug)]
pub struct CentroidTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl VehicleTracker for CentroidTracker {
    fn track(&mut self, detections: &[VehicleDetection]) -> Vec<TrackedVehicle> {
        let centroids: Vec<Point> = detections.iter().map(|d| d.bbox.center()).collect();

        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            if track.stale(&self.config) {
                continue;
            }
            for (di, c) in centroids.iter().enumerate() {
                let d = track.centroid.distance(c);
                if d <= self.config.max_distance {
                    pairs.push((d, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];
        for (_, ti, di) in pairs {
            if track_matched[ti] || det_matched[di] {
                continue;
            }
            track_matched[ti] = true;
            det_matched[di] = true;

            let track = &mut self.tracks[ti];
            track.centroid = centroids[di];
            track.class = detections[di].class;
            track.confidence = detections[di].confidence;
            track.hits = track.hits.saturating_add(1);
            track.misses = 0;
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.misses = track.misses.saturating_add(1);
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if det_matched[di] {
                continue;
            }
            debug!(track_id = self.next_id, class = %det.class, "new tentative track");
            self.tracks.push(Track {
                id: self.next_id,
                centroid: centroids[di],
                class: det.class,
                confidence: det.confidence,
                hits: 1,
                misses: 0,
            });
            self.next_id += 1;
        }

        let config = self.config;
        let mut reported: Vec<TrackedVehicle> = self
            .tracks
            .iter()
            .filter(|t| t.confirmed(config.init_delay) && !t.stale(&config))
            .map(Track::report)
            .collect();
        reported.sort_by_key(|t| t.track_id);
        reported
    }

    fn prune_stale(&mut self) -> usize {
        let before = self.tracks.len();
        let config = self.config;
        self.tracks.retain(|t| !t.stale(&config));
        before - self.tracks.len()
    }

    fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}
