//! Rule-based lighting classification of plate crops.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DARK_MEAN: f32 = 80.0;
const OVEREXPOSED_MEAN: f32 = 180.0;
const BACKLIT_MEAN: f32 = 160.0;
const BACKLIT_STD: f32 = 60.0;
const LOW_CONTRAST_STD: f32 = 30.0;
/// First histogram bin counted as highlight
const HIGHLIGHT_FROM: usize = 200;
/// Bins below this are counted as shadow
const SHADOW_BELOW: usize = 50;
const HIGHLIGHT_MASS: f32 = 0.2;
const SHADOW_MASS: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LightingCondition {
    Dark,
    Overexposed,
    Backlit,
    LowContrast,
    MixedLighting,
    #[default]
    Normal,
}

impl LightingCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightingCondition::Dark => "dark",
            LightingCondition::Overexposed => "overexposed",
            LightingCondition::Backlit => "backlit",
            LightingCondition::LowContrast => "low_contrast",
            LightingCondition::MixedLighting => "mixed_lighting",
            LightingCondition::Normal => "normal",
        }
    }
}

impl fmt::Display for LightingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightingCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dark" => Ok(LightingCondition::Dark),
            "overexposed" => Ok(LightingCondition::Overexposed),
            "backlit" => Ok(LightingCondition::Backlit),
            "low_contrast" => Ok(LightingCondition::LowContrast),
            "mixed_lighting" => Ok(LightingCondition::MixedLighting),
            "normal" => Ok(LightingCondition::Normal),
            _ => Err(format!("Unknown lighting condition: {}", s)),
        }
    }
}

/// Brightness statistics of one image region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightingProfile {
    pub mean_brightness: f32,
    pub std_brightness: f32,
    /// Share of pixels with luminance below 50
    pub shadow_fraction: f32,
    /// Share of pixels with luminance of 200 or more
    pub highlight_fraction: f32,
    pub condition: LightingCondition,
}

/// Apply the ordered classification rules to precomputed statistics.
pub fn classify(
    mean: f32,
    std: f32,
    shadow_fraction: f32,
    highlight_fraction: f32,
) -> LightingCondition {
    let has_highlights = highlight_fraction > HIGHLIGHT_MASS;
    let has_shadows = shadow_fraction > SHADOW_MASS;

    if mean < DARK_MEAN {
        LightingCondition::Dark
    } else if mean > OVEREXPOSED_MEAN && has_highlights {
        LightingCondition::Overexposed
    } else if mean > BACKLIT_MEAN && std > BACKLIT_STD {
        LightingCondition::Backlit
    } else if std < LOW_CONTRAST_STD {
        LightingCondition::LowContrast
    } else if has_shadows && has_highlights {
        LightingCondition::MixedLighting
    } else {
        LightingCondition::Normal
    }
}

/// 256-bin luminance histogram
pub fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    hist
}

/// Mean and population standard deviation of a histogram
pub fn histogram_stats(hist: &[u64; 256]) -> (f32, f32) {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return (0.0, 0.0);
    }
    let n = total as f64;
    let mean = hist
        .iter()
        .enumerate()
        .map(|(v, c)| v as f64 * *c as f64)
        .sum::<f64>()
        / n;
    let variance = hist
        .iter()
        .enumerate()
        .map(|(v, c)| (v as f64 - mean).powi(2) * *c as f64)
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}

/// Classify an image region from its luminance.
pub fn analyze(image: &RgbImage) -> LightingProfile {
    let gray = image::imageops::grayscale(image);
    analyze_gray(&gray)
}

pub fn analyze_gray(gray: &GrayImage) -> LightingProfile {
    let hist = histogram(gray);
    let total = hist.iter().sum::<u64>().max(1) as f32;
    let (mean, std) = histogram_stats(&hist);
    let shadow_fraction = hist[..SHADOW_BELOW].iter().sum::<u64>() as f32 / total;
    let highlight_fraction = hist[HIGHLIGHT_FROM..].iter().sum::<u64>() as f32 / total;

    LightingProfile {
        mean_brightness: mean,
        std_brightness: std,
        shadow_fraction,
        highlight_fraction,
        condition: classify(mean, std, shadow_fraction, highlight_fraction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_dark_wins_first() {
        assert_eq!(classify(40.0, 10.0, 0.9, 0.0), LightingCondition::Dark);
        // dark takes priority over the low-contrast rule
        assert_eq!(classify(79.9, 5.0, 0.0, 0.0), LightingCondition::Dark);
    }

    #[test]
    fn test_overexposed_checked_before_backlit() {
        assert_eq!(classify(200.0, 70.0, 0.1, 0.6), LightingCondition::Overexposed);
        // without highlight mass the same statistics are backlit
        assert_eq!(classify(200.0, 70.0, 0.1, 0.1), LightingCondition::Backlit);
    }

    #[test]
    fn test_remaining_rules() {
        assert_eq!(classify(120.0, 20.0, 0.0, 0.0), LightingCondition::LowContrast);
        assert_eq!(classify(120.0, 90.0, 0.4, 0.3), LightingCondition::MixedLighting);
        assert_eq!(classify(120.0, 50.0, 0.1, 0.1), LightingCondition::Normal);
    }

    #[test]
    fn test_analyze_uniform_images() {
        let dark = RgbImage::from_pixel(16, 16, Rgb([30, 30, 30]));
        let profile = analyze(&dark);
        assert_eq!(profile.condition, LightingCondition::Dark);
        assert!((profile.mean_brightness - 30.0).abs() < 1.0);
        assert_eq!(profile.std_brightness, 0.0);

        let bright = RgbImage::from_pixel(16, 16, Rgb([240, 240, 240]));
        let profile = analyze(&bright);
        assert_eq!(profile.condition, LightingCondition::Overexposed);
        assert!((profile.highlight_fraction - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_analyze_mixed_halves() {
        // half near-black, half near-white: mean ~127, std ~107
        let gray = GrayImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Luma([10])
            } else {
                Luma([245])
            }
        });
        let profile = analyze_gray(&gray);
        assert_eq!(profile.condition, LightingCondition::MixedLighting);
        assert!((profile.shadow_fraction - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_condition_round_trips_through_str() {
        for condition in [
            LightingCondition::Dark,
            LightingCondition::Overexposed,
            LightingCondition::Backlit,
            LightingCondition::LowContrast,
            LightingCondition::MixedLighting,
            LightingCondition::Normal,
        ] {
            assert_eq!(condition.to_string().parse::<LightingCondition>(), Ok(condition));
        }
        assert!("bright".parse::<LightingCondition>().is_err());
    }
}
