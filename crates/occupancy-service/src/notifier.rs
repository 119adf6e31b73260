//! Occupancy status change notifications.
//!
//! Compares each snapshot's empty-space count with the previous one and
//! emits at most one event per snapshot. Each event type has its own
//! cooldown. Delivery to subscribers is isolated: a failing or panicking
//! subscriber is logged and counted, and the others still receive the event.

use crate::types::{NotificationEvent, NotificationType};
use chrono::{DateTime, Utc};
use common::parking::OccupancySnapshot;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::{PARKING_NOTIFICATIONS, PARKING_SUBSCRIBER_FAILURES};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

pub const HISTORY_CAPACITY: usize = 100;
/// Empty-space count at or below which the lot is "limited"
pub const LIMITED_THRESHOLD: usize = 3;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Receives every emitted event.
pub trait NotificationSubscriber: Send + Sync {
    fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;

    fn name(&self) -> &str;
}

/// Fans events out on a tokio broadcast channel.
///
/// Having no receivers at the moment is not an error.
pub struct BroadcastSubscriber {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSubscriber {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<NotificationEvent> {
        self.tx.clone()
    }
}

impl NotificationSubscriber for BroadcastSubscriber {
    fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        debug!(event_id = %event.id, receivers, "notification broadcast");
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// Logs each event through `tracing`.
pub struct LogSubscriber;

impl NotificationSubscriber for LogSubscriber {
    fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(
            event_id = %event.id,
            kind = %event.notification_type,
            priority = %event.priority,
            "{}",
            event.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

pub struct StatusChangeNotifier {
    cooldown: Duration,
    previous: Option<OccupancySnapshot>,
    last_sent: HashMap<NotificationType, DateTime<Utc>>,
    history: VecDeque<NotificationEvent>,
    subscribers: Vec<Arc<dyn NotificationSubscriber>>,
}

impl StatusChangeNotifier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            previous: None,
            last_sent: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn NotificationSubscriber>) {
        info!(subscriber = subscriber.name(), "notification subscriber added");
        self.subscribers.push(subscriber);
    }

    /// Transition for `previous -> current` empty counts, by priority.
    pub fn transition(previous_empty: usize, current_empty: usize) -> Option<NotificationType> {
        if previous_empty > 0 && current_empty == 0 {
            Some(NotificationType::ParkingFull)
        } else if previous_empty == 0 && current_empty > 0 {
            Some(NotificationType::SpaceAvailable)
        } else if previous_empty > LIMITED_THRESHOLD
            && current_empty > 0
            && current_empty <= LIMITED_THRESHOLD
        {
            Some(NotificationType::SpaceLimited)
        } else {
            None
        }
    }

    pub fn in_cooldown(&self, notification_type: NotificationType, now: DateTime<Utc>) -> bool {
        self.last_sent
            .get(&notification_type)
            .is_some_and(|sent| !cooldown_elapsed(*sent, now, self.cooldown))
    }

    /// Evaluate a new snapshot. The first snapshot only seeds the state.
    /// `previous` is replaced whether or not an event fires.
    pub fn process(&mut self, snapshot: &OccupancySnapshot, now: DateTime<Utc>) -> Option<NotificationEvent> {
        let previous = self.previous.replace(snapshot.clone())?;

        let notification_type = Self::transition(previous.empty(), snapshot.empty())?;
        if self.in_cooldown(notification_type, now) {
            debug!(kind = %notification_type, "notification suppressed by cooldown");
            PARKING_NOTIFICATIONS
                .with_label_values(&[notification_type.as_str(), "suppressed"])
                .inc();
            return None;
        }

        let event = build_event(notification_type, snapshot, now);
        self.last_sent.insert(notification_type, now);
        self.history.push_back(event.clone());
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        PARKING_NOTIFICATIONS
            .with_label_values(&[notification_type.as_str(), "emitted"])
            .inc();

        self.deliver(&event);
        Some(event)
    }

    fn deliver(&self, event: &NotificationEvent) {
        for subscriber in &self.subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.notify(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "subscriber panicked".to_string(),
            };
            error!(
                subscriber = subscriber.name(),
                event_id = %event.id,
                error = %failure,
                "notification delivery failed"
            );
            PARKING_SUBSCRIBER_FAILURES
                .with_label_values(&[subscriber.name()])
                .inc();
        }
    }

    /// Forget cooldown entries that have run out. Returns how many were cleared.
    pub fn expire_cooldowns(&mut self, now: DateTime<Utc>) -> usize {
        let cooldown = self.cooldown;
        let before = self.last_sent.len();
        self.last_sent
            .retain(|_, sent| !cooldown_elapsed(*sent, now, cooldown));
        before - self.last_sent.len()
    }

    /// Most recent events, oldest first
    pub fn history(&self) -> Vec<NotificationEvent> {
        self.history.iter().cloned().collect()
    }

    pub fn previous(&self) -> Option<&OccupancySnapshot> {
        self.previous.as_ref()
    }
}

fn cooldown_elapsed(sent: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    match (now - sent).to_std() {
        Ok(elapsed) => elapsed >= cooldown,
        // clock went backwards: still cooling down
        Err(_) => false,
    }
}

fn build_event(
    notification_type: NotificationType,
    snapshot: &OccupancySnapshot,
    now: DateTime<Utc>,
) -> NotificationEvent {
    let total = snapshot.total();
    let available = snapshot.empty();

    let (title, message, mut payload) = match notification_type {
        NotificationType::ParkingFull => (
            "Parking full".to_string(),
            format!("All {} spaces are occupied", total),
            json!({ "status": "full" }),
        ),
        NotificationType::SpaceAvailable => (
            "Space available".to_string(),
            format!("{} of {} spaces are now available", available, total),
            json!({ "status": "available" }),
        ),
        NotificationType::SpaceLimited => {
            let percentage = snapshot.occupancy_rate();
            (
                "Limited spaces".to_string(),
                format!("Only {} of {} spaces left ({}% used)", available, total, percentage),
                json!({ "status": "limited", "percentage": percentage }),
            )
        }
    };
    payload["total_spaces"] = json!(total);
    payload["available_spaces"] = json!(available);

    NotificationEvent {
        id: format!("{}_{}", notification_type, now.timestamp()),
        notification_type,
        title,
        message,
        priority: notification_type.priority(),
        payload,
        timestamp: now,
    }
}
