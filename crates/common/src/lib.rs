pub mod frame_source;
pub mod inference;
pub mod parking;
pub mod shared;
pub mod vision;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
