use crate::recognizer::PlateReading;
use anyhow::{Context, Result};
use common::shared::{SharedSlot, SlotReader, Versioned};
use common::vision::Frame;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether the recognizer has usable models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Loading,
    Ready { provider: String },
    Unavailable { reason: String },
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready { .. })
    }
}

/// Process-wide outputs of the plate pipeline.
///
/// The serving loop is the only writer; HTTP handlers only read.
#[derive(Clone)]
pub struct LprState {
    inner: Arc<LprStateInner>,
}

struct LprStateInner {
    node_id: String,
    jpeg_quality: u8,
    plate: SharedSlot<PlateReading>,
    annotated: SharedSlot<Option<Frame>>,
    models: SharedSlot<ModelStatus>,
}

impl LprState {
    pub fn new(node_id: impl Into<String>, jpeg_quality: u8) -> Self {
        Self {
            inner: Arc::new(LprStateInner {
                node_id: node_id.into(),
                jpeg_quality,
                plate: SharedSlot::new(PlateReading::unknown()),
                annotated: SharedSlot::new(None),
                models: SharedSlot::new(ModelStatus::Loading),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn publish_reading(&self, reading: PlateReading) -> u64 {
        self.inner.plate.publish(reading)
    }

    pub fn reading(&self) -> Versioned<PlateReading> {
        self.inner.plate.get()
    }

    pub fn reading_updates(&self) -> SlotReader<PlateReading> {
        self.inner.plate.reader()
    }

    /// Current plate text or `unknown`
    pub fn plate_text(&self) -> String {
        self.inner.plate.get().value.text.clone()
    }

    pub fn publish_frame(&self, frame: Frame) -> u64 {
        self.inner.annotated.publish(Some(frame))
    }

    pub fn annotated_frame(&self) -> Option<Frame> {
        (*self.inner.annotated.get().value).clone()
    }

    pub fn set_model_status(&self, status: ModelStatus) {
        self.inner.models.publish(status);
    }

    pub fn model_status(&self) -> ModelStatus {
        (*self.inner.models.get().value).clone()
    }

    /// Latest annotated frame as JPEG, encoded on demand.
    pub fn annotated_jpeg(&self) -> Result<Option<Vec<u8>>> {
        self.annotated_frame()
            .map(|frame| encode_jpeg(&frame, self.inner.jpeg_quality))
            .transpose()
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(&*frame.image)
        .context("Failed to encode frame as JPEG")?;
    Ok(buf)
}
