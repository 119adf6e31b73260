/// Integration tests for the plate recognition pipeline with stand-in models
use axum::{body::Body, extract::Request};
use common::vision::{BoundingBox, CharacterDetection, PlateChar, PlateDetection};
use image::{Rgb, RgbImage};
use lpr_service::{
    api,
    detector::{CharacterDetector, PlateDetector},
    ranker::UNKNOWN_PLATE,
    LprState, LprTuning, OcrError, PlateRecognizer,
};
use std::sync::Arc;
use tower::ServiceExt;

/// Lays `rows` out as stacked character rows, normalized to the crop
struct PrintedPlate {
    rows: Vec<&'static str>,
    confidence: f32,
}

impl CharacterDetector for PrintedPlate {
    fn detect_characters(&self, _: &RgbImage) -> Result<Vec<CharacterDetection>, OcrError> {
        let row_height = 0.8 / self.rows.len() as f32;
        let mut out = Vec::new();
        for (r, row) in self.rows.iter().enumerate() {
            let n = row.chars().count() as f32;
            for (i, c) in row.chars().enumerate() {
                let Ok(character) = PlateChar::try_from(c) else {
                    continue;
                };
                out.push(CharacterDetection {
                    character,
                    bbox: BoundingBox::new(
                        0.05 + i as f32 * 0.9 / n,
                        0.1 + r as f32 * row_height,
                        0.8 / n,
                        row_height * 0.8,
                    ),
                    confidence: self.confidence,
                });
            }
        }
        // model output order is arbitrary
        out.reverse();
        Ok(out)
    }
}

struct FixedPlates(Vec<BoundingBox>);

impl PlateDetector for FixedPlates {
    fn detect_plates(&self, _: &RgbImage, _: u32) -> Result<Vec<PlateDetection>, OcrError> {
        Ok(self
            .0
            .iter()
            .map(|bbox| PlateDetection {
                bbox: *bbox,
                confidence: 0.7,
            })
            .collect())
    }
}

struct NoPlates;

impl PlateDetector for NoPlates {
    fn detect_plates(&self, _: &RgbImage, _: u32) -> Result<Vec<PlateDetection>, OcrError> {
        Ok(Vec::new())
    }
}

fn tuning() -> LprTuning {
    LprTuning {
        target_sizes: vec![640],
        ..LprTuning::default()
    }
}

fn street_frame() -> RgbImage {
    RgbImage::from_fn(480, 320, |x, y| {
        let v = ((x * 3 + y * 5) % 160) as u8 + 40;
        Rgb([v, v, v])
    })
}

#[test]
fn test_two_row_motorbike_plate_from_dark_crop() {
    let recognizer = PlateRecognizer::new(
        Arc::new(NoPlates),
        Arc::new(PrintedPlate {
            rows: vec!["59C1", "12345"],
            confidence: 0.8,
        }),
        tuning(),
    );
    let dark_crop = RgbImage::from_fn(120, 100, |x, y| Rgb([((x + y) % 20) as u8 + 5; 3]));

    assert_eq!(recognizer.recognize_crop(&dark_crop), "59C1-123.45");
}

#[test]
fn test_single_row_car_plate_in_frame() {
    let recognizer = PlateRecognizer::new(
        Arc::new(FixedPlates(vec![BoundingBox::new(180.0, 200.0, 140.0, 35.0)])),
        Arc::new(PrintedPlate {
            rows: vec!["51F24403"],
            confidence: 0.9,
        }),
        tuning(),
    );

    let reading = recognizer.recognize_frame(&street_frame());
    assert_eq!(reading.text, "51F-244.03");
    assert!(reading.is_known());
    assert_eq!(reading.plates.len(), 1);
}

#[test]
fn test_implausible_boxes_are_ignored() {
    // too small, then far too tall for a plate
    let recognizer = PlateRecognizer::new(
        Arc::new(FixedPlates(vec![
            BoundingBox::new(10.0, 10.0, 20.0, 8.0),
            BoundingBox::new(100.0, 20.0, 40.0, 200.0),
        ])),
        Arc::new(PrintedPlate {
            rows: vec!["51F24403"],
            confidence: 0.9,
        }),
        tuning(),
    );

    let reading = recognizer.recognize_frame(&street_frame());
    assert_eq!(reading.text, UNKNOWN_PLATE);
    assert!(reading.plates.is_empty());
    assert!(reading.error.is_none());
}

#[test]
fn test_noise_characters_never_become_a_plate() {
    let recognizer = PlateRecognizer::new(
        Arc::new(NoPlates),
        Arc::new(PrintedPlate {
            rows: vec!["AB"],
            confidence: 0.9,
        }),
        tuning(),
    );
    let crop = RgbImage::from_pixel(160, 40, Rgb([128, 128, 128]));
    assert_eq!(recognizer.recognize_crop(&crop), UNKNOWN_PLATE);
}

#[tokio::test]
async fn test_plate_endpoint_serves_latest_reading() {
    let recognizer = PlateRecognizer::new(
        Arc::new(FixedPlates(vec![BoundingBox::new(180.0, 200.0, 140.0, 35.0)])),
        Arc::new(PrintedPlate {
            rows: vec!["30E99999"],
            confidence: 0.9,
        }),
        tuning(),
    );
    let state = LprState::new("gate-1", 80);
    state.publish_reading(recognizer.recognize_frame(&street_frame()));

    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/v1/plate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["plate"], "30E-999.99");
    assert_eq!(json["version"], 1);
}
