use thiserror::Error;

/// Why a plate read produced no usable text.
///
/// Every variant degrades to the "unknown" sentinel at the recognizer
/// boundary; the kind decides what gets logged and whether the next variant
/// or crop is still worth trying.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OcrError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("invalid crop: {0}")]
    InvalidCrop(String),

    #[error("no characters detected")]
    NoDetection,

    #[error("all {0} detections below the confidence floor")]
    LowConfidence(usize),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl OcrError {
    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::ModelUnavailable(_) => "model_unavailable",
            OcrError::InvalidCrop(_) => "invalid_crop",
            OcrError::NoDetection => "no_detection",
            OcrError::LowConfidence(_) => "low_confidence",
            OcrError::Inference(_) => "inference",
        }
    }

    /// Whether other variants or crops in the same cycle can still succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, OcrError::ModelUnavailable(_))
    }
}

impl From<anyhow::Error> for OcrError {
    fn from(err: anyhow::Error) -> Self {
        OcrError::Inference(format!("{:#}", err))
    }
}
