use crate::types::NotificationEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use common::parking::OccupancySnapshot;
use common::shared::{SharedSlot, SlotReader, Versioned};
use common::vision::Frame;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Whether the occupancy pipeline has a model and a parking layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Loading,
    Ready { provider: String },
    Unavailable { reason: String },
}

impl PipelineStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineStatus::Ready { .. })
    }
}

/// Process-wide outputs of the occupancy pipeline.
///
/// The serving loop is the only writer; HTTP handlers and event
/// subscribers only read.
#[derive(Clone)]
pub struct OccupancyState {
    inner: Arc<OccupancyStateInner>,
}

struct OccupancyStateInner {
    node_id: String,
    jpeg_quality: u8,
    snapshot: SharedSlot<OccupancySnapshot>,
    annotated: SharedSlot<Option<Frame>>,
    notifications: SharedSlot<Vec<NotificationEvent>>,
    status: SharedSlot<PipelineStatus>,
    events: broadcast::Sender<NotificationEvent>,
}

impl OccupancyState {
    pub fn new(node_id: impl Into<String>, jpeg_quality: u8, events: broadcast::Sender<NotificationEvent>) -> Self {
        Self {
            inner: Arc::new(OccupancyStateInner {
                node_id: node_id.into(),
                jpeg_quality,
                snapshot: SharedSlot::new(OccupancySnapshot {
                    spaces: BTreeMap::new(),
                    taken_at: Utc::now(),
                }),
                annotated: SharedSlot::new(None),
                notifications: SharedSlot::new(Vec::new()),
                status: SharedSlot::new(PipelineStatus::Loading),
                events,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn publish_snapshot(&self, snapshot: OccupancySnapshot) -> u64 {
        self.inner.snapshot.publish(snapshot)
    }

    pub fn snapshot(&self) -> Versioned<OccupancySnapshot> {
        self.inner.snapshot.get()
    }

    pub fn snapshot_updates(&self) -> SlotReader<OccupancySnapshot> {
        self.inner.snapshot.reader()
    }

    pub fn publish_notifications(&self, history: Vec<NotificationEvent>) -> u64 {
        self.inner.notifications.publish(history)
    }

    /// Recent notifications, oldest first
    pub fn notifications(&self) -> Arc<Vec<NotificationEvent>> {
        self.inner.notifications.get().value
    }

    /// Live notification stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.events.subscribe()
    }

    pub fn publish_frame(&self, frame: Frame) -> u64 {
        self.inner.annotated.publish(Some(frame))
    }

    pub fn annotated_frame(&self) -> Option<Frame> {
        (*self.inner.annotated.get().value).clone()
    }

    pub fn set_status(&self, status: PipelineStatus) {
        self.inner.status.publish(status);
    }

    pub fn status(&self) -> PipelineStatus {
        (*self.inner.status.get().value).clone()
    }

    /// Latest annotated frame as JPEG, encoded on demand.
    pub fn annotated_jpeg(&self) -> Result<Option<Vec<u8>>> {
        let Some(frame) = self.annotated_frame() else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.inner.jpeg_quality.clamp(1, 100))
            .encode_image(&*frame.image)
            .context("Failed to encode frame as JPEG")?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::parking::{ParkingSpace, SpaceStatus};
    use common::vision::Point;
    use image::RgbImage;

    fn state() -> OccupancyState {
        let (tx, _) = broadcast::channel(8);
        OccupancyState::new("lot-a", 80, tx)
    }

    #[test]
    fn test_starts_empty_and_loading() {
        let state = state();
        assert_eq!(state.snapshot().version, 0);
        assert_eq!(state.snapshot().value.total(), 0);
        assert_eq!(state.status(), PipelineStatus::Loading);
        assert!(state.notifications().is_empty());
        assert!(state.annotated_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_replaced_wholesale() {
        let state = state();
        let spaces = vec![ParkingSpace {
            id: 1,
            polygon: vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)],
        }];
        let mut snapshot = OccupancySnapshot::all_empty(&spaces, Utc::now());
        assert_eq!(state.publish_snapshot(snapshot.clone()), 1);

        snapshot.spaces.insert(1, SpaceStatus::Occupied);
        assert_eq!(state.publish_snapshot(snapshot), 2);
        assert_eq!(state.snapshot().value.occupied(), 1);
    }

    #[test]
    fn test_frame_encodes_to_jpeg() {
        let state = state();
        state.publish_frame(Frame::new(RgbImage::new(16, 8), 3));
        let jpeg = state.annotated_jpeg().unwrap().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
