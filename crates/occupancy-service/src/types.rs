use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Occupancy transitions that produce a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ParkingFull,
    SpaceAvailable,
    SpaceLimited,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [
        NotificationType::ParkingFull,
        NotificationType::SpaceAvailable,
        NotificationType::SpaceLimited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ParkingFull => "parking_full",
            NotificationType::SpaceAvailable => "space_available",
            NotificationType::SpaceLimited => "space_limited",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            NotificationType::ParkingFull => Priority::Urgent,
            NotificationType::SpaceLimited => Priority::High,
            NotificationType::SpaceAvailable => Priority::Normal,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parking_full" => Ok(NotificationType::ParkingFull),
            "space_available" => Ok(NotificationType::SpaceAvailable),
            "space_limited" => Ok(NotificationType::SpaceLimited),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// One emitted occupancy notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    /// `"{type}_{unix_seconds}"`
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_round_trips_through_str() {
        for t in NotificationType::ALL {
            assert_eq!(t.to_string().parse::<NotificationType>().unwrap(), t);
        }
        assert!("parking_empty".parse::<NotificationType>().is_err());
    }

    #[test]
    fn test_priorities() {
        assert_eq!(NotificationType::ParkingFull.priority(), Priority::Urgent);
        assert_eq!(NotificationType::SpaceLimited.priority(), Priority::High);
        assert_eq!(NotificationType::SpaceAvailable.priority(), Priority::Normal);
        assert!(Priority::Urgent > Priority::High);
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = NotificationEvent {
            id: "parking_full_1700000000".into(),
            notification_type: NotificationType::ParkingFull,
            title: "Parking full".into(),
            message: "All 10 spaces are occupied".into(),
            priority: Priority::Urgent,
            payload: serde_json::json!({ "total_spaces": 10 }),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "parking_full");
        assert_eq!(json["priority"], "urgent");
    }
}
