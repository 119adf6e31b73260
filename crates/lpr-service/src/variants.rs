//! Lighting-adaptive preprocessing variants for one plate crop.
//!
//! The crop is first enhanced for its lighting condition; every variant is
//! then derived from that enhanced image. Order is fixed and significant: the
//! ranker breaks ties by generation order and the cap drops from the end.

use crate::enhance;
use crate::lighting::{LightingCondition, LightingProfile};
use image::RgbImage;

const RETINEX_SCALES: [f32; 3] = [15.0, 80.0, 250.0];

/// One enhanced candidate image handed to the character detector
#[derive(Debug, Clone)]
pub struct PreprocessingVariant {
    pub name: String,
    pub image: RgbImage,
}

impl PreprocessingVariant {
    fn new(name: impl Into<String>, image: RgbImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }
}

/// Enhancement chain matched to the lighting condition.
pub fn adaptive_enhance(image: &RgbImage, profile: &LightingProfile) -> RgbImage {
    match profile.condition {
        LightingCondition::Dark => {
            let gamma = if profile.mean_brightness < 50.0 { 1.5 } else { 1.2 };
            let out = enhance::adjust_gamma(image, gamma);
            let out = enhance::clahe(&out, 4.0, 8);
            let out = enhance::scale_shift(&out, 1.3, 40.0);
            enhance::unsharp_mask(&out, 1.5)
        }
        LightingCondition::Overexposed => {
            let out = enhance::scale_shift(image, 1.2, -30.0);
            let out = enhance::tone_map(&out, 0.6);
            enhance::clahe(&out, 2.0, 8)
        }
        LightingCondition::Backlit => {
            let out = enhance::shadow_highlight(image, 0.5, -0.3);
            let out = enhance::clahe(&out, 2.0, 8);
            enhance::adaptive_gamma(&out)
        }
        LightingCondition::LowContrast => {
            let out = enhance::percentile_stretch(image, 1.0, 99.0);
            let out = enhance::clahe(&out, 3.0, 8);
            enhance::scale_shift(&out, 1.5, 0.0)
        }
        LightingCondition::MixedLighting => {
            let out = enhance::multi_scale_retinex(image, &RETINEX_SCALES);
            let out = enhance::clahe(&out, 2.0, 8);
            enhance::edge_preserving_filter(&out, 50.0, 0.4)
        }
        LightingCondition::Normal => {
            let out = enhance::scale_shift(image, 1.2, 10.0);
            let out = enhance::unsharp_mask(&out, 1.0);
            enhance::bilateral_filter(&out, 9, 75.0, 75.0)
        }
    }
}

/// Build the ordered, capped variant list for a crop.
///
/// Order: `base`, condition extras, `sharpened`, `bilateral`, then rotations
/// from the smallest angle outward (`rot_-6`, `rot_6`, `rot_-12`, ...).
pub fn generate_variants(
    crop: &RgbImage,
    profile: &LightingProfile,
    rotation_angles: &[f32],
    max_variants: usize,
) -> Vec<PreprocessingVariant> {
    let base = adaptive_enhance(crop, profile);
    let mut variants = Vec::with_capacity(max_variants);

    // Producers only run while the cap still has room.
    let push = |variants: &mut Vec<PreprocessingVariant>, name: String, f: &dyn Fn() -> RgbImage| {
        if variants.len() < max_variants {
            variants.push(PreprocessingVariant::new(name, f()));
        }
    };

    push(&mut variants, "base".into(), &|| base.clone());

    match profile.condition {
        LightingCondition::Dark | LightingCondition::LowContrast => {
            push(&mut variants, "high_gamma".into(), &|| enhance::adjust_gamma(&base, 1.8));
            push(&mut variants, "clahe_aggressive".into(), &|| enhance::clahe(&base, 5.0, 4));
            push(&mut variants, "brightness_boost".into(), &|| {
                enhance::scale_shift(&base, 1.5, 50.0)
            });
        }
        LightingCondition::Overexposed => {
            push(&mut variants, "low_gamma".into(), &|| enhance::adjust_gamma(&base, 0.6));
            push(&mut variants, "tone_mapped".into(), &|| enhance::tone_map(&base, 0.6));
            push(&mut variants, "brightness_reduce".into(), &|| {
                enhance::scale_shift(&base, 1.0, -40.0)
            });
        }
        LightingCondition::Backlit => {
            push(&mut variants, "shadow_adjusted".into(), &|| {
                enhance::shadow_highlight(&base, 0.8, -0.5)
            });
            push(&mut variants, "retinex".into(), &|| {
                enhance::multi_scale_retinex(&base, &RETINEX_SCALES)
            });
            push(&mut variants, "adaptive_eq".into(), &|| enhance::clahe(&base, 2.0, 8));
        }
        LightingCondition::MixedLighting => {
            push(&mut variants, "retinex".into(), &|| {
                enhance::multi_scale_retinex(&base, &RETINEX_SCALES)
            });
            push(&mut variants, "edge_preserving".into(), &|| {
                enhance::edge_preserving_filter(&base, 50.0, 0.4)
            });
            push(&mut variants, "local_eq".into(), &|| enhance::clahe(&base, 2.0, 8));
        }
        LightingCondition::Normal => {}
    }

    push(&mut variants, "sharpened".into(), &|| enhance::unsharp_mask(&base, 1.5));
    push(&mut variants, "bilateral".into(), &|| {
        enhance::bilateral_filter(&base, 9, 75.0, 75.0)
    });

    for angle in rotation_angles {
        for signed in [-angle.abs(), angle.abs()] {
            push(&mut variants, format!("rot_{}", signed), &|| {
                enhance::rotate_replicate(&base, signed)
            });
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lighting;
    use image::Rgb;

    fn crop_with_mean(v: u8) -> RgbImage {
        RgbImage::from_fn(40, 16, |x, _| {
            let jitter = (x % 4) as u8 * 10;
            Rgb([v.saturating_add(jitter); 3])
        })
    }

    fn names(variants: &[PreprocessingVariant]) -> Vec<&str> {
        variants.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_normal_variant_order() {
        let crop = crop_with_mean(100);
        let mut profile = lighting::analyze(&crop);
        profile.condition = LightingCondition::Normal;

        let variants = generate_variants(&crop, &profile, &[6.0, 12.0, 20.0], 12);
        assert_eq!(
            names(&variants),
            vec![
                "base", "sharpened", "bilateral", "rot_-6", "rot_6", "rot_-12", "rot_12",
                "rot_-20", "rot_20"
            ]
        );
    }

    #[test]
    fn test_dark_variants_fill_cap() {
        let crop = crop_with_mean(20);
        let profile = lighting::analyze(&crop);
        assert_eq!(profile.condition, LightingCondition::Dark);

        let variants = generate_variants(&crop, &profile, &[6.0, 12.0, 20.0], 12);
        assert_eq!(variants.len(), 12);
        assert_eq!(&names(&variants)[..4], &["base", "high_gamma", "clahe_aggressive", "brightness_boost"]);
        assert_eq!(variants[11].name, "rot_20");
    }

    #[test]
    fn test_cap_drops_largest_rotations_first() {
        let crop = crop_with_mean(20);
        let profile = lighting::analyze(&crop);
        let variants = generate_variants(&crop, &profile, &[6.0, 12.0, 20.0], 8);
        assert_eq!(variants.len(), 8);
        assert_eq!(variants[6].name, "rot_-6");
        assert_eq!(variants[7].name, "rot_6");
    }

    #[test]
    fn test_variants_keep_crop_size() {
        let crop = crop_with_mean(210);
        let mut profile = lighting::analyze(&crop);
        for condition in [
            LightingCondition::Overexposed,
            LightingCondition::Backlit,
            LightingCondition::MixedLighting,
            LightingCondition::LowContrast,
        ] {
            profile.condition = condition;
            for variant in generate_variants(&crop, &profile, &[6.0], 12) {
                assert_eq!(variant.image.dimensions(), (40, 16), "{}", variant.name);
            }
        }
    }
}
