pub mod api;
pub mod config;
pub mod detector;
pub mod enhance;
pub mod error;
pub mod lighting;
pub mod locator;
pub mod normalizer;
pub mod onnx;
pub mod ranker;
pub mod recognizer;
pub mod runner;
pub mod sequencer;
pub mod state;
pub mod variants;

pub use config::{LprServiceConfig, LprTuning};
pub use error::OcrError;
pub use recognizer::{PlateReading, PlateRecognizer};
pub use state::LprState;
