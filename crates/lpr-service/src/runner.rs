//! Throttled serving loop.
//!
//! Every tick takes the newest frame. A full recognition runs only when the
//! detection interval has elapsed since the previous one; other ticks redraw
//! the cached plate boxes onto the fresh frame.

use crate::recognizer::{PlateReading, PlateRecognizer};
use crate::state::LprState;
use common::shared::LatestFrame;
use common::vision::{BoundingBox, Frame};
use image::{imageops::FilterType, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics::LPR_FRAMES_PROCESSED;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const PLATE_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

pub struct LprRunner {
    recognizer: Option<Arc<PlateRecognizer>>,
    frames: LatestFrame,
    state: LprState,
    detection_interval: Duration,
    frame_interval: Duration,
    display_width: u32,
}

impl LprRunner {
    /// `recognizer` is `None` when the models failed to load; frames are then
    /// passed through unannotated.
    pub fn new(
        recognizer: Option<Arc<PlateRecognizer>>,
        frames: LatestFrame,
        state: LprState,
        detection_interval: Duration,
        frame_interval: Duration,
        display_width: u32,
    ) -> Self {
        Self {
            recognizer,
            frames,
            state,
            detection_interval,
            frame_interval,
            display_width,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_detection: Option<Instant> = None;
        let mut cached_boxes: Vec<BoundingBox> = Vec::new();
        let mut last_sequence = None;

        info!(
            detection_interval_ms = self.detection_interval.as_millis() as u64,
            models = self.recognizer.is_some(),
            "plate serving loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(frame) = self.frames.latest() else {
                continue;
            };
            if last_sequence == Some(frame.sequence) {
                continue;
            }
            last_sequence = Some(frame.sequence);

            let due = last_detection.map_or(true, |t| t.elapsed() >= self.detection_interval);
            let outcome = match (&self.recognizer, due) {
                (Some(recognizer), true) => {
                    last_detection = Some(Instant::now());
                    match self.detect(recognizer, &frame).await {
                        Some(reading) => {
                            cached_boxes = reading.plates.iter().map(|p| p.bbox).collect();
                            self.state.publish_reading(reading);
                            "detected"
                        }
                        None => "failed",
                    }
                }
                (Some(_), false) => "cached",
                (None, _) => "passthrough",
            };
            LPR_FRAMES_PROCESSED.with_label_values(&[outcome]).inc();

            let annotated = annotate_plates(&frame.image, &cached_boxes, self.display_width);
            self.state.publish_frame(Frame {
                image: Arc::new(annotated),
                captured_at: frame.captured_at,
                sequence: frame.sequence,
            });
        }

        info!("plate serving loop stopped");
    }

    async fn detect(&self, recognizer: &Arc<PlateRecognizer>, frame: &Frame) -> Option<PlateReading> {
        let recognizer = Arc::clone(recognizer);
        let image = Arc::clone(&frame.image);
        match tokio::task::spawn_blocking(move || recognizer.recognize_frame(&image)).await {
            Ok(reading) => {
                debug!(sequence = frame.sequence, plate = %reading.text, "frame recognized");
                Some(reading)
            }
            Err(e) => {
                error!(error = %e, "recognition task panicked");
                None
            }
        }
    }
}

/// Draw plate boxes and downscale to `display_width` if wider.
pub fn annotate_plates(image: &RgbImage, boxes: &[BoundingBox], display_width: u32) -> RgbImage {
    let mut canvas = image.clone();
    for bbox in boxes {
        for inset in 0..2i32 {
            let w = bbox.width as i32 - 2 * inset;
            let h = bbox.height as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at(bbox.x as i32 + inset, bbox.y as i32 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, PLATE_BOX_COLOR);
        }
    }

    if display_width == 0 || canvas.width() <= display_width {
        return canvas;
    }
    let height = ((canvas.height() as f32 * display_width as f32 / canvas.width() as f32) as u32).max(1);
    image::imageops::resize(&canvas, display_width, height, FilterType::Triangle)
}
