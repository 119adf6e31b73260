//! Orders character detections into reading order.
//!
//! Single-row plates read left to right. Two-row plates are split into rows
//! by 2-means on the vertical centres, top row first. Any clustering failure
//! falls back to a plain left-to-right sort so there is always an ordering.

use common::vision::CharacterDetection;
use serde::{Deserialize, Serialize};

const KMEANS_MAX_ITERATIONS: usize = 32;
/// Two-row layout needs strictly more characters than this
const TWO_ROW_MIN_CHARS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateLayout {
    SingleRow,
    TwoRow,
}

/// Detections in reading order plus the layout that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedPlate {
    pub layout: PlateLayout,
    pub characters: Vec<CharacterDetection>,
}

impl SequencedPlate {
    pub fn text(&self) -> String {
        self.characters
            .iter()
            .map(|d| d.character.as_char())
            .collect()
    }
}

struct Placed {
    index: usize,
    x: f32,
    y: f32,
}

fn sort_left_to_right(items: &mut [Placed]) {
    items.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.index.cmp(&b.index)));
}

/// Decide the layout and order `detections` (boxes normalized to an image of
/// `width` x `height`).
pub fn sequence(detections: &[CharacterDetection], width: u32, height: u32) -> SequencedPlate {
    let (w, h) = (width as f32, height as f32);
    let mut placed: Vec<Placed> = detections
        .iter()
        .enumerate()
        .map(|(index, d)| {
            let c = d.bbox.center();
            Placed {
                index,
                x: c.x * w,
                y: c.y * h,
            }
        })
        .collect();

    let collect = |order: &[Placed]| -> Vec<CharacterDetection> {
        order.iter().map(|p| detections[p.index]).collect()
    };

    if placed.len() > TWO_ROW_MIN_CHARS && looks_two_row(detections, &placed, h) {
        if let Some((mut top, mut bottom)) = split_rows(&placed) {
            sort_left_to_right(&mut top);
            sort_left_to_right(&mut bottom);
            top.extend(bottom);
            return SequencedPlate {
                layout: PlateLayout::TwoRow,
                characters: collect(&top),
            };
        }
    }

    sort_left_to_right(&mut placed);
    SequencedPlate {
        layout: PlateLayout::SingleRow,
        characters: collect(&placed),
    }
}

/// Vertical spread larger than a third of the average character height
fn looks_two_row(detections: &[CharacterDetection], placed: &[Placed], h: f32) -> bool {
    let n = placed.len() as f32;
    let mean_y = placed.iter().map(|p| p.y).sum::<f32>() / n;
    let std_y = (placed.iter().map(|p| (p.y - mean_y).powi(2)).sum::<f32>() / n).sqrt();
    let avg_height = detections.iter().map(|d| d.bbox.height * h).sum::<f32>() / n;
    std_y > avg_height / 3.0
}

/// 1-D 2-means on vertical centres; `None` if a cluster ends up empty.
fn split_rows(placed: &[Placed]) -> Option<(Vec<Placed>, Vec<Placed>)> {
    let ys: Vec<f32> = placed.iter().map(|p| p.y).collect();
    let mut lo = ys.iter().copied().fold(f32::INFINITY, f32::min);
    let mut hi = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(lo.is_finite() && hi.is_finite()) || hi - lo <= f32::EPSILON {
        return None;
    }

    let mut assignment: Vec<bool> = Vec::new();
    for _ in 0..KMEANS_MAX_ITERATIONS {
        // true = belongs to the upper (smaller y) cluster
        let next: Vec<bool> = ys.iter().map(|y| (y - lo).abs() <= (y - hi).abs()).collect();
        let (mut sum_lo, mut n_lo, mut sum_hi, mut n_hi) = (0.0, 0usize, 0.0, 0usize);
        for (y, upper) in ys.iter().zip(&next) {
            if *upper {
                sum_lo += y;
                n_lo += 1;
            } else {
                sum_hi += y;
                n_hi += 1;
            }
        }
        if n_lo == 0 || n_hi == 0 {
            return None;
        }
        lo = sum_lo / n_lo as f32;
        hi = sum_hi / n_hi as f32;

        let converged = next == assignment;
        assignment = next;
        if converged {
            break;
        }
    }

    let (mut top, mut bottom) = (Vec::new(), Vec::new());
    for (p, upper) in placed.iter().zip(&assignment) {
        let copy = Placed {
            index: p.index,
            x: p.x,
            y: p.y,
        };
        if *upper {
            top.push(copy);
        } else {
            bottom.push(copy);
        }
    }

    // Cluster centres can cross over; the top row is the one with lower mean y.
    if lo > hi {
        std::mem::swap(&mut top, &mut bottom);
    }
    Some((top, bottom))
}
