//! ONNX Runtime plumbing shared by the YOLO-style detectors.
//!
//! Loads a session with execution-provider fallback (TensorRT -> CUDA -> CPU),
//! converts frames to NCHW tensors and decodes `[1, 4 + classes, N]` outputs
//! into boxes in source-image coordinates.

use crate::vision::BoundingBox;
use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Session and decoding settings for one model file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX file
    pub model_path: String,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ordinal
    #[serde(default)]
    pub device_id: i32,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,

    /// Square input size the model expects by default
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Minimum class score kept by the decoder
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// IoU above which lower-scored boxes are suppressed
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Upper bound on boxes returned per inference
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

fn default_execution_provider() -> String {
    "CPU".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

fn default_input_size() -> u32 {
    640
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    100
}

impl ModelConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
            input_size: default_input_size(),
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
        }
    }
}

/// One decoded box before any domain interpretation of the class id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// A loaded YOLO-family model
pub struct YoloModel {
    session: Mutex<Session>,
    provider: String,
    config: ModelConfig,
}

impl YoloModel {
    pub fn load(config: ModelConfig) -> Result<Self> {
        if !std::path::Path::new(&config.model_path).is_file() {
            anyhow::bail!("model file not found: {}", config.model_path);
        }
        let (session, provider) = create_session(&config)?;
        tracing::info!(
            model = %config.model_path,
            provider = %provider,
            device = config.device_id,
            input_size = config.input_size,
            confidence = config.confidence_threshold,
            "model loaded"
        );
        Ok(Self {
            session: Mutex::new(session),
            provider,
            config,
        })
    }

    /// Execution provider actually in use
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Run at the configured input size.
    pub fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        self.infer_at(image, self.config.input_size)
    }

    /// Run with the image resized to `size x size`; boxes come back in
    /// the coordinates of `image`.
    pub fn infer_at(&self, image: &RgbImage, size: u32) -> Result<Vec<RawDetection>> {
        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("cannot run inference on an empty image");
        }

        let input = to_nchw(image, size);
        let input_tensor = Value::from_array(input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock session: {}", e))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        let output_value = outputs
            .get("output0")
            .or_else(|| outputs.get("output"))
            .context("No detection output tensor found (tried: output0, output)")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

        let scale_x = image.width() as f32 / size as f32;
        let scale_y = image.height() as f32 / size as f32;
        let decoded = decode_yolo(
            &output,
            self.config.confidence_threshold,
            (scale_x, scale_y),
            (image.width() as f32, image.height() as f32),
        )?;

        let mut kept = nms(decoded, self.config.iou_threshold);
        kept.truncate(self.config.max_detections);
        Ok(kept)
    }
}

/// Resize to a square and lay out as `[1, 3, size, size]` in [0, 1]
pub fn to_nchw(image: &RgbImage, size: u32) -> Array<f32, IxDyn> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    input
}

/// Decode `[1, 4 + classes, N]` predictions (cx, cy, w, h, scores...).
///
/// `scale` maps model coordinates to source coordinates and `bounds` clamps
/// the result to the source image.
pub fn decode_yolo(
    output: &Array<f32, IxDyn>,
    confidence_threshold: f32,
    scale: (f32, f32),
    bounds: (f32, f32),
) -> Result<Vec<RawDetection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        anyhow::bail!("unexpected detection output shape {:?}", shape);
    }

    let num_classes = shape[1] - 4;
    let num_predictions = shape[2];
    let (scale_x, scale_y) = scale;
    let (max_x, max_y) = bounds;
    let mut boxes = Vec::new();

    for i in 0..num_predictions {
        let mut best_score = 0.0f32;
        let mut best_class = 0;
        for class_idx in 0..num_classes {
            let score = output[[0, 4 + class_idx, i]];
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]] * scale_x;
        let cy = output[[0, 1, i]] * scale_y;
        let w = output[[0, 2, i]] * scale_x;
        let h = output[[0, 3, i]] * scale_y;

        let x1 = (cx - w / 2.0).clamp(0.0, max_x);
        let y1 = (cy - h / 2.0).clamp(0.0, max_y);
        let x2 = (cx + w / 2.0).clamp(0.0, max_x);
        let y2 = (cy + h / 2.0).clamp(0.0, max_y);

        boxes.push(RawDetection {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            confidence: best_score,
            class_id: best_class,
        });
    }

    Ok(boxes)
}

/// Greedy class-agnostic non-maximum suppression, highest score first
pub fn nms(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Create an ONNX session, falling back TensorRT -> CUDA -> CPU
fn create_session(config: &ModelConfig) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            tracing::info!(model = %config.model_path, "attempting TensorRT");
            let result = Session::builder()
                .context("Failed to create session builder")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(config.intra_threads)
                .context("Failed to set intra threads")?
                .with_inter_threads(config.inter_threads)
                .context("Failed to set inter threads")?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .context("Failed to set execution providers")?
                .commit_from_file(&config.model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!(error = %e, "TensorRT failed, trying CUDA");
                    try_cuda(config)
                }
            }
        }
        "CUDA" => try_cuda(config),
        _ => try_cpu(config),
    }
}

fn try_cuda(config: &ModelConfig) -> Result<(Session, String)> {
    tracing::info!(model = %config.model_path, "attempting CUDA");
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(&config.model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "CUDA failed, using CPU");
            try_cpu(config)
        }
    }
}

fn try_cpu(config: &ModelConfig) -> Result<(Session, String)> {
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(&config.model_path)
        .with_context(|| format!("Failed to load model from {}", config.model_path))?;
    Ok((session, "CPU".to_string()))
}
