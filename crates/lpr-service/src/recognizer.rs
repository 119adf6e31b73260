//! End-to-end plate reading for one frame.
//!
//! locate -> crop -> lighting -> variants -> characters -> sequence ->
//! normalize -> rank. Errors never leave this module as errors: each kind is
//! mapped to a fixed action and the cycle degrades to [`UNKNOWN_PLATE`].
//!
//! | kind              | action                         |
//! |-------------------|--------------------------------|
//! | ModelUnavailable  | abort the cycle, unknown       |
//! | InvalidCrop       | skip the crop                  |
//! | NoDetection       | no candidate from that variant |
//! | LowConfidence     | no candidate from that variant |
//! | Inference         | skip the variant               |

use crate::config::LprTuning;
use crate::detector::{CharacterDetector, PlateDetector};
use crate::error::OcrError;
use crate::lighting::{self, LightingProfile};
use crate::locator::{crop_plate, LocatedPlate, PlateLocator, PlateType};
use crate::normalizer;
use crate::ranker::{self, PlateCandidate, UNKNOWN_PLATE};
use crate::sequencer;
use crate::variants::{generate_variants, PreprocessingVariant};
use chrono::{DateTime, Utc};
use common::vision::BoundingBox;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics::{
    LPR_CANDIDATES_PER_CYCLE, LPR_LIGHTING_CONDITIONS, LPR_RECOGNITIONS, LPR_RECOGNITION_LATENCY,
    LPR_VARIANTS_EVALUATED,
};
use tracing::{debug, info, warn};

/// Outcome of one recognition cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    /// Winning plate text or `unknown`
    pub text: String,
    pub winner: Option<PlateCandidate>,
    /// Plate boxes that were read, in source-frame coordinates
    pub plates: Vec<LocatedPlate>,
    pub candidates: usize,
    /// Error kind that ended the cycle early, if any
    pub error: Option<String>,
    pub recognized_at: DateTime<Utc>,
}

impl PlateReading {
    pub fn unknown() -> Self {
        Self {
            text: UNKNOWN_PLATE.to_string(),
            winner: None,
            plates: Vec::new(),
            candidates: 0,
            error: None,
            recognized_at: Utc::now(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.text != UNKNOWN_PLATE
    }
}

impl Default for PlateReading {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Text and mean character confidence read from one variant
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRead {
    pub text: String,
    pub confidence: f32,
}

pub struct PlateRecognizer {
    locator: PlateLocator,
    characters: Arc<dyn CharacterDetector>,
    tuning: LprTuning,
}

impl PlateRecognizer {
    pub fn new(
        plates: Arc<dyn PlateDetector>,
        characters: Arc<dyn CharacterDetector>,
        tuning: LprTuning,
    ) -> Self {
        Self {
            locator: PlateLocator::new(plates, &tuning),
            characters,
            tuning,
        }
    }

    pub fn tuning(&self) -> &LprTuning {
        &self.tuning
    }

    /// Characters of one variant, filtered, ordered and normalized.
    pub fn read_variant(&self, variant: &PreprocessingVariant) -> Result<VariantRead, OcrError> {
        let detections = self.characters.detect_characters(&variant.image)?;
        if detections.is_empty() {
            return Err(OcrError::NoDetection);
        }

        let floor = self.tuning.char_confidence_floor;
        let kept: Vec<_> = detections
            .iter()
            .filter(|d| d.confidence > floor)
            .copied()
            .collect();
        if kept.is_empty() {
            return Err(OcrError::LowConfidence(detections.len()));
        }

        let ordered = sequencer::sequence(&kept, variant.image.width(), variant.image.height());
        let confidence = kept.iter().map(|d| d.confidence).sum::<f32>() / kept.len() as f32;
        Ok(VariantRead {
            text: normalizer::normalize(&ordered.text()),
            confidence,
        })
    }

    /// Score every variant of a plate crop, appending to `candidates`.
    ///
    /// Only `ModelUnavailable` is returned; every other failure is absorbed
    /// per variant.
    pub fn read_crop(
        &self,
        crop: &RgbImage,
        source_bbox: BoundingBox,
        plate_type: PlateType,
        candidates: &mut Vec<PlateCandidate>,
    ) -> Result<LightingProfile, OcrError> {
        let profile = lighting::analyze(crop);
        LPR_LIGHTING_CONDITIONS
            .with_label_values(&[profile.condition.as_str()])
            .inc();

        let variants = generate_variants(
            crop,
            &profile,
            &self.tuning.rotation_angles,
            self.tuning.max_variants,
        );

        for variant in &variants {
            LPR_VARIANTS_EVALUATED.inc();
            match self.read_variant(variant) {
                Ok(read) => {
                    let validity = ranker::validity_score(&read.text);
                    candidates.push(PlateCandidate {
                        rank_score: ranker::rank_score(validity, profile.condition),
                        validity_score: validity,
                        text: read.text,
                        confidence: read.confidence,
                        source_bbox,
                        source_variant: variant.name.clone(),
                        plate_type,
                        lighting: profile.condition,
                        generation: candidates.len(),
                    });
                }
                Err(e @ OcrError::ModelUnavailable(_)) => return Err(e),
                Err(e @ OcrError::Inference(_)) => {
                    warn!(variant = %variant.name, error = %e, "variant skipped");
                }
                Err(e) => {
                    debug!(variant = %variant.name, kind = e.kind(), "no candidate from variant");
                }
            }
        }

        Ok(profile)
    }

    /// Read a single, already cropped plate image.
    pub fn recognize_crop(&self, crop: &RgbImage) -> String {
        if crop.width() == 0 || crop.height() == 0 {
            return UNKNOWN_PLATE.to_string();
        }
        let bbox = BoundingBox::new(0.0, 0.0, crop.width() as f32, crop.height() as f32);
        let mut candidates = Vec::new();
        if let Err(e) = self.read_crop(crop, bbox, PlateType::from_bbox(&bbox), &mut candidates) {
            warn!(kind = e.kind(), error = %e, "crop recognition aborted");
            return UNKNOWN_PLATE.to_string();
        }
        ranker::select_best(&candidates)
            .map(|c| c.text.clone())
            .unwrap_or_else(|| UNKNOWN_PLATE.to_string())
    }

    /// Full pipeline for one frame. Never fails.
    pub fn recognize_frame(&self, frame: &RgbImage) -> PlateReading {
        let start = Instant::now();
        let reading = self.run_cycle(frame);
        LPR_RECOGNITION_LATENCY.observe(start.elapsed().as_secs_f64());
        LPR_CANDIDATES_PER_CYCLE.observe(reading.candidates as f64);

        let result = match (&reading.error, reading.is_known()) {
            (_, true) => "recognized",
            (Some(_), false) => "error",
            (None, false) => "unknown",
        };
        LPR_RECOGNITIONS.with_label_values(&[result]).inc();
        reading
    }

    fn run_cycle(&self, frame: &RgbImage) -> PlateReading {
        let mut reading = PlateReading::unknown();

        let located = match self.locator.locate(frame) {
            Ok(located) => located,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "plate localisation failed");
                reading.error = Some(e.kind().to_string());
                return reading;
            }
        };

        let mut candidates = Vec::new();
        for plate in &located {
            let crop = match crop_plate(
                frame,
                &plate.bbox,
                self.tuning.crop_padding,
                self.tuning.crop_border,
            ) {
                Ok(crop) => crop,
                Err(e) => {
                    debug!(error = %e, "crop skipped");
                    continue;
                }
            };

            match self.read_crop(&crop, plate.bbox, plate.plate_type, &mut candidates) {
                Ok(profile) => debug!(
                    condition = %profile.condition,
                    mean = profile.mean_brightness,
                    std = profile.std_brightness,
                    "plate crop read"
                ),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "recognition cycle aborted");
                    reading.error = Some(e.kind().to_string());
                    reading.plates = located;
                    reading.candidates = candidates.len();
                    return reading;
                }
            }
        }

        reading.plates = located;
        reading.candidates = candidates.len();
        if let Some(best) = ranker::select_best(&candidates) {
            info!(
                plate = %best.text,
                rank = best.rank_score,
                variant = %best.source_variant,
                lighting = %best.lighting,
                "plate recognized"
            );
            reading.text = best.text.clone();
            reading.winner = Some(best.clone());
        }
        reading
    }
}
