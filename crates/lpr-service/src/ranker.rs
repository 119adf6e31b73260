//! Candidate scoring and winner selection.
//!
//! Every (crop, variant) read becomes a [`PlateCandidate`]. Candidates must
//! pass the validity gate to compete; the winner is the highest rank score,
//! first generated on ties.

use crate::lighting::LightingCondition;
use crate::locator::PlateType;
use common::vision::BoundingBox;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sentinel text for "no plate read"
pub const UNKNOWN_PLATE: &str = "unknown";

const PLATE_CHARSET: &str = "0123456789ABCDEFGHKLMNPSTUVXYZ-.";

static PLATE_PREFIXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\d{2}[A-Z]-?\d{3,6}", r"^\d{2}[A-Z]\d-?\d{3,5}"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static PLATE_GRAMMAR: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\d{2}[A-Z]\d?-\d{3}\.\d{2,3}$", r"^\d{2}[A-Z]\d?-?\d{4,6}$"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateCandidate {
    /// Normalized text
    pub text: String,
    /// Mean confidence of the characters that formed the text
    pub confidence: f32,
    pub validity_score: f32,
    pub rank_score: f32,
    /// Plate box in source-frame coordinates
    pub source_bbox: BoundingBox,
    pub source_variant: String,
    pub plate_type: PlateType,
    /// Lighting of the crop the variant came from
    pub lighting: LightingCondition,
    /// Position in generation order within the cycle
    pub generation: usize,
}

fn has_letter_and_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic()) && text.chars().any(|c| c.is_ascii_digit())
}

fn clean_charset(text: &str) -> bool {
    text.chars().all(|c| PLATE_CHARSET.contains(c))
}

/// Plausibility of `text` as a plate, in [0, 1].
pub fn validity_score(text: &str) -> f32 {
    let len = text.chars().count();
    let mut score: f32 = 0.0;

    if (6..=10).contains(&len) {
        score += 0.3;
    } else if (5..=11).contains(&len) {
        score += 0.2;
    }
    if has_letter_and_digit(text) {
        score += 0.3;
    }
    if PLATE_PREFIXES.iter().any(|re| re.is_match(text)) {
        score += 0.4;
    }
    if clean_charset(text) {
        score += 0.2;
    }

    score.min(1.0)
}

/// Prior for how trustworthy a read is under the crop's lighting
pub fn lighting_bonus(condition: LightingCondition) -> f32 {
    match condition {
        LightingCondition::Normal => 0.2,
        LightingCondition::Dark | LightingCondition::Overexposed => 0.1,
        LightingCondition::Backlit => 0.05,
        LightingCondition::LowContrast | LightingCondition::MixedLighting => 0.15,
    }
}

pub fn rank_score(validity: f32, condition: LightingCondition) -> f32 {
    (validity + lighting_bonus(condition)).min(1.0)
}

/// Gate a candidate must pass before it can win.
pub fn is_valid_plate(text: &str) -> bool {
    let len = text.chars().count();
    if !(5..=12).contains(&len) || text == UNKNOWN_PLATE {
        return false;
    }
    PLATE_GRAMMAR.iter().any(|re| re.is_match(text))
        || (has_letter_and_digit(text) && clean_charset(text))
}

/// Highest rank score among valid candidates; earliest generation wins ties.
pub fn select_best(candidates: &[PlateCandidate]) -> Option<&PlateCandidate> {
    candidates
        .iter()
        .filter(|c| is_valid_plate(&c.text))
        .fold(None, |best: Option<&PlateCandidate>, c| match best {
            Some(b) if b.rank_score >= c.rank_score => Some(b),
            _ => Some(c),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, rank_score: f32, generation: usize) -> PlateCandidate {
        PlateCandidate {
            text: text.to_string(),
            confidence: 0.8,
            validity_score: validity_score(text),
            rank_score,
            source_bbox: BoundingBox::new(0.0, 0.0, 100.0, 30.0),
            source_variant: format!("v{}", generation),
            plate_type: PlateType::Long,
            lighting: LightingCondition::Normal,
            generation,
        }
    }

    #[test]
    fn test_validity_of_formatted_plate() {
        assert!((validity_score("61A-123.45") - 1.0).abs() < 1e-6);
        assert!((validity_score("59C1-123.45") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validity_partial_credit() {
        // length 6-10 and charset only
        assert!((validity_score("ABCDEF") - 0.5).abs() < 1e-6);
        // letters and digits, length 5, 'W' outside the charset
        assert!((validity_score("W1234") - 0.5).abs() < 1e-6);
        assert_eq!(validity_score(""), 0.2);
    }

    #[test]
    fn test_lighting_bonus_and_cap() {
        assert!((rank_score(0.6, LightingCondition::Normal) - 0.8).abs() < 1e-6);
        assert!((rank_score(0.6, LightingCondition::Backlit) - 0.65).abs() < 1e-6);
        assert!((rank_score(0.6, LightingCondition::MixedLighting) - 0.75).abs() < 1e-6);
        assert_eq!(rank_score(1.0, LightingCondition::Normal), 1.0);
    }

    #[test]
    fn test_validity_gate() {
        assert!(is_valid_plate("61A-123.45"));
        assert!(is_valid_plate("29A1234"));
        assert!(is_valid_plate("AB123"));
        assert!(!is_valid_plate("unknown"));
        assert!(!is_valid_plate("1234"));
        assert!(!is_valid_plate("ABCDEFGH"));
        assert!(!is_valid_plate("61A-123.45-999"));
    }

    #[test]
    fn test_select_best_ties_keep_first() {
        let candidates = vec![
            candidate("61A-123.45", 0.9, 0),
            candidate("61A-128.45", 0.9, 1),
            candidate("61A-123.4", 0.7, 2),
        ];
        let best = select_best(&candidates).unwrap();
        assert_eq!(best.generation, 0);
    }

    #[test]
    fn test_invalid_candidates_never_win() {
        let candidates = vec![candidate("1234", 1.0, 0), candidate("61A-123.45", 0.3, 1)];
        assert_eq!(select_best(&candidates).unwrap().text, "61A-123.45");
        assert!(select_best(&[candidate("ZZ", 1.0, 0)]).is_none());
        assert!(select_best(&[]).is_none());
    }
}
