pub mod api;
pub mod config;
pub mod detector;
pub mod notifier;
pub mod occupancy;
pub mod pipeline;
pub mod runner;
pub mod stabilizer;
pub mod state;
pub mod tracker;
pub mod types;

pub use config::OccupancyServiceConfig;
pub use notifier::StatusChangeNotifier;
pub use occupancy::OccupancyMapper;
pub use pipeline::OccupancyPipeline;
pub use state::OccupancyState;
pub use tracker::{CentroidTracker, VehicleTracker};
pub use types::{NotificationEvent, NotificationType, Priority};
