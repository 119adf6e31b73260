//! Single-writer / multi-reader state holders.
//!
//! [`SharedSlot`] keeps the latest published value behind a watch channel so
//! readers always get a consistent `(version, value)` pair and never block the
//! writer. [`LatestFrame`] is the plain mutex-guarded slot the frame reader
//! overwrites; intermediate frames are dropped.

use crate::vision::Frame;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// A value tagged with the publish counter at which it was written
#[derive(Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: Arc<T>,
}

impl<T> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            value: Arc::clone(&self.value),
        }
    }
}

/// Writer half; clones of [`SharedSlot::reader`] observe every publish.
#[derive(Debug)]
pub struct SharedSlot<T> {
    tx: watch::Sender<Versioned<T>>,
}

impl<T> SharedSlot<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(Versioned {
            version: 0,
            value: Arc::new(initial),
        });
        Self { tx }
    }

    /// Replace the current value, returning the new version.
    pub fn publish(&self, value: T) -> u64 {
        let mut next_version = 0;
        self.tx.send_modify(|current| {
            next_version = current.version + 1;
            *current = Versioned {
                version: next_version,
                value: Arc::new(value),
            };
        });
        next_version
    }

    pub fn get(&self) -> Versioned<T> {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> SlotReader<T> {
        SlotReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read half of a [`SharedSlot`]
#[derive(Debug, Clone)]
pub struct SlotReader<T> {
    rx: watch::Receiver<Versioned<T>>,
}

impl<T> SlotReader<T> {
    pub fn get(&self) -> Versioned<T> {
        self.rx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Wait until a version newer than the last one seen is published.
    ///
    /// Returns `None` once the writer is gone.
    pub async fn changed(&mut self) -> Option<Versioned<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Most-recent-frame slot shared between the reader thread and the serving loop
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite whatever frame is waiting.
    pub fn store(&self, frame: Frame) {
        match self.inner.lock() {
            Ok(mut slot) => *slot = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
    }

    /// Peek at the newest frame without consuming it.
    pub fn latest(&self) -> Option<Frame> {
        match self.inner.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_publish_bumps_version() {
        let slot = SharedSlot::new("unknown".to_string());
        assert_eq!(slot.get().version, 0);
        assert_eq!(slot.publish("61A-123.45".to_string()), 1);
        assert_eq!(slot.publish("30E-999.99".to_string()), 2);

        let current = slot.get();
        assert_eq!(current.version, 2);
        assert_eq!(current.value.as_str(), "30E-999.99");
    }

    #[test]
    fn test_reader_sees_latest_value() {
        let slot = SharedSlot::new(0u32);
        let reader = slot.reader();
        slot.publish(5);
        slot.publish(7);
        let seen = reader.get();
        assert_eq!(seen.version, 2);
        assert_eq!(*seen.value, 7);
    }

    #[tokio::test]
    async fn test_reader_waits_for_change() {
        let slot = SharedSlot::new(0u32);
        let mut reader = slot.reader();

        let handle = tokio::spawn(async move { reader.changed().await });
        slot.publish(42);

        let update = handle.await.unwrap().unwrap();
        assert_eq!(update.version, 1);
        assert_eq!(*update.value, 42);
    }

    #[test]
    fn test_latest_frame_overwrites() {
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());

        slot.store(Frame::new(RgbImage::new(4, 4), 1));
        slot.store(Frame::new(RgbImage::new(4, 4), 2));
        assert_eq!(slot.latest().map(|f| f.sequence), Some(2));
        // peeking does not consume
        assert_eq!(slot.latest().map(|f| f.sequence), Some(2));
    }
}
