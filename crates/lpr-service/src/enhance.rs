//! Pixel-level enhancement operators used to build OCR variants.
//!
//! All operators take an RGB image and return a new one of the same size.
//! Luminance-only operators work on the Y plane of a full-range YCbCr
//! conversion and leave chroma untouched.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;

/// Sigma of the blur subtracted by [`unsharp_mask`]
const UNSHARP_SIGMA: f32 = 1.0;
/// Iterations of the recursive domain-transform filter
const DOMAIN_TRANSFORM_ITERATIONS: u32 = 3;

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn map_lut(image: &RgbImage, lut: &[u8; 256]) -> RgbImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        for c in 0..3 {
            p.0[c] = lut[p.0[c] as usize];
        }
    }
    out
}

/// Power-law correction; `gamma > 1` brightens.
pub fn adjust_gamma(image: &RgbImage, gamma: f32) -> RgbImage {
    let inv = 1.0 / gamma.max(f32::EPSILON);
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0) as u8;
    }
    map_lut(image, &lut)
}

/// `v * alpha + beta`, saturated to the u8 range.
pub fn scale_shift(image: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = clamp_u8(i as f32 * alpha + beta);
    }
    map_lut(image, &lut)
}

/// Raise normalized intensities to `power`.
pub fn tone_map(image: &RgbImage, power: f32) -> RgbImage {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(power) * 255.0) as u8;
    }
    map_lut(image, &lut)
}

pub fn unsharp_mask(image: &RgbImage, amount: f32) -> RgbImage {
    let blurred = gaussian_blur_f32(image, UNSHARP_SIGMA);
    let mut out = image.clone();
    for (p, b) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let v = p.0[c] as f32 * (1.0 + amount) - b.0[c] as f32 * amount;
            p.0[c] = clamp_u8(v);
        }
    }
    out
}

/// Run `f` on the luminance plane and recombine with the original chroma.
pub fn map_luma(image: &RgbImage, f: impl FnOnce(&GrayImage) -> GrayImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let mut luma = GrayImage::new(w, h);
    let mut chroma = Vec::with_capacity((w * h) as usize);

    for (x, y, p) in image.enumerate_pixels() {
        let [r, g, b] = p.0.map(f32::from);
        let yv = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        luma.put_pixel(x, y, Luma([clamp_u8(yv)]));
        chroma.push((cb - 128.0, cr - 128.0));
    }

    let mapped = f(&luma);
    let mut out = RgbImage::new(w, h);
    for ((x, y, p), (cb, cr)) in out.enumerate_pixels_mut().zip(chroma) {
        let yv = mapped.get_pixel(x, y).0[0] as f32;
        *p = Rgb([
            clamp_u8(yv + 1.402 * cr),
            clamp_u8(yv - 0.344_136 * cb - 0.714_136 * cr),
            clamp_u8(yv + 1.772 * cb),
        ]);
    }
    out
}

/// Contrast-limited adaptive histogram equalization on a gray plane.
///
/// `tiles` is the grid size per axis; `clip_limit` is relative to a flat
/// histogram (1.0 clips at the uniform bin height).
pub fn clahe_gray(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let tiles = tiles.max(1);
    let tile_w = w.div_ceil(tiles).max(1);
    let tile_h = h.div_ceil(tiles).max(1);
    let nx = w.div_ceil(tile_w) as usize;
    let ny = h.div_ceil(tile_h) as usize;

    let mut luts = vec![[0u8; 256]; nx * ny];
    for ty in 0..ny {
        for tx in 0..nx {
            let x0 = tx as u32 * tile_w;
            let y0 = ty as u32 * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[ty * nx + tx] = clipped_equalization_lut(&mut hist, area, clip_limit);
        }
    }

    let axis = |pos: u32, tile: u32, count: usize| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let i0 = (f.floor().max(0.0) as usize).min(count - 1);
        let i1 = (i0 + 1).min(count - 1);
        let a = (f - i0 as f32).clamp(0.0, 1.0);
        (i0, i1, a)
    };

    let mut out = GrayImage::new(w, h);
    for (x, y, p) in out.enumerate_pixels_mut() {
        let v = gray.get_pixel(x, y).0[0] as usize;
        let (tx0, tx1, ax) = axis(x, tile_w, nx);
        let (ty0, ty1, ay) = axis(y, tile_h, ny);

        let top = luts[ty0 * nx + tx0][v] as f32 * (1.0 - ax) + luts[ty0 * nx + tx1][v] as f32 * ax;
        let bottom =
            luts[ty1 * nx + tx0][v] as f32 * (1.0 - ax) + luts[ty1 * nx + tx1][v] as f32 * ax;
        *p = Luma([clamp_u8(top * (1.0 - ay) + bottom * ay)]);
    }
    out
}

fn clipped_equalization_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let per_bin = excess / 256;
        let residual = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += per_bin + u32::from(i < residual);
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (slot, count) in lut.iter_mut().zip(hist.iter()) {
        cdf += count;
        *slot = clamp_u8(cdf as f32 * scale);
    }
    lut
}

pub fn clahe(image: &RgbImage, clip_limit: f32, tiles: u32) -> RgbImage {
    map_luma(image, |y| clahe_gray(y, clip_limit, tiles))
}

/// Scale dark luminance by `1 + shadow_amount` and bright luminance by
/// `1 + highlight_amount`, pivoting at 127.
pub fn shadow_highlight(image: &RgbImage, shadow_amount: f32, highlight_amount: f32) -> RgbImage {
    map_luma(image, |y| {
        let mut out = y.clone();
        for p in out.pixels_mut() {
            let v = p.0[0] as f32;
            p.0[0] = match p.0[0] {
                0..=126 => clamp_u8(v * (1.0 + shadow_amount)),
                127 => p.0[0],
                _ => clamp_u8(v * (1.0 + highlight_amount)),
            };
        }
        out
    })
}

/// Brighten dark images, darken bright ones, leave the rest.
pub fn adaptive_gamma(image: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let n = gray.pixels().len().max(1) as f32;
    let mean = gray.pixels().map(|p| p.0[0] as f32).sum::<f32>() / n;

    let gamma = if mean < 80.0 {
        1.5
    } else if mean > 180.0 {
        0.7
    } else {
        1.0
    };
    adjust_gamma(image, gamma)
}

fn channel_percentile(hist: &[u32; 256], total: u32, percentile: f32) -> u8 {
    let rank = (percentile / 100.0 * (total.saturating_sub(1)) as f32).round() as u32;
    let mut seen = 0u32;
    for (value, count) in hist.iter().enumerate() {
        seen += count;
        if seen > rank {
            return value as u8;
        }
    }
    255
}

/// Stretch each channel so its `low`..`high` percentiles span 0..255.
pub fn percentile_stretch(image: &RgbImage, low: f32, high: f32) -> RgbImage {
    let total = image.pixels().len() as u32;
    let mut out = image.clone();
    for c in 0..3 {
        let mut hist = [0u32; 256];
        for p in image.pixels() {
            hist[p.0[c] as usize] += 1;
        }
        let lo = channel_percentile(&hist, total, low) as f32;
        let hi = channel_percentile(&hist, total, high) as f32;
        if hi <= lo {
            continue;
        }
        for p in out.pixels_mut() {
            p.0[c] = clamp_u8(255.0 * (p.0[c] as f32 - lo) / (hi - lo));
        }
    }
    out
}

/// Multi-scale retinex: mean of `log(I) - log(blur_sigma(I))` over `scales`,
/// min-max normalized to 0..255 across all channels.
pub fn multi_scale_retinex(image: &RgbImage, scales: &[f32]) -> RgbImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 || scales.is_empty() {
        return image.clone();
    }

    let sigmas: Vec<f32> = scales.iter().copied().filter(|s| *s > 0.0).collect();
    if sigmas.is_empty() {
        return image.clone();
    }

    let mut channels: Vec<Vec<f32>> = Vec::with_capacity(3);
    for c in 0..3 {
        let plane: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
                Luma([(image.get_pixel(x, y).0[c] as f32).max(1.0)])
            });
        let mut acc = vec![0.0f32; w * h];
        for &sigma in &sigmas {
            let blurred = gaussian_blur_f32(&plane, sigma);
            for ((a, v), b) in acc.iter_mut().zip(plane.iter()).zip(blurred.iter()) {
                *a += v.ln() - b.max(1.0).ln();
            }
        }
        let n = sigmas.len() as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        channels.push(acc);
    }

    let (min, max) = channels
        .iter()
        .flatten()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if max - min <= f32::EPSILON {
        return image.clone();
    }

    let mut out = RgbImage::new(w as u32, h as u32);
    for (i, p) in out.pixels_mut().enumerate() {
        for c in 0..3 {
            p.0[c] = clamp_u8((channels[c][i] - min) / (max - min) * 255.0);
        }
    }
    out
}

/// Edge-aware smoothing weighted by spatial and colour distance.
pub fn bilateral_filter(image: &RgbImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let radius = (diameter / 2).max(1) as i64;

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = (dx * dx + dy * dy) as f32;
            if dist2 <= (radius * radius) as f32 {
                offsets.push((dx, dy, (-dist2 / (2.0 * sigma_space * sigma_space)).exp()));
            }
        }
    }
    // L1 colour distance over three channels spans 0..=765
    let color_weights: Vec<f32> = (0..=765)
        .map(|d| {
            let d = d as f32;
            (-(d * d) / (2.0 * sigma_color * sigma_color)).exp()
        })
        .collect();

    let mut out = RgbImage::new(w, h);
    for (x, y, p) in out.enumerate_pixels_mut() {
        let center = image.get_pixel(x, y).0;
        let mut acc = [0.0f32; 3];
        let mut norm = 0.0f32;

        for &(dx, dy, spatial) in &offsets {
            let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
            let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
            let q = image.get_pixel(sx, sy).0;
            let diff: usize = (0..3)
                .map(|c| (center[c] as i32 - q[c] as i32).unsigned_abs() as usize)
                .sum();
            let weight = spatial * color_weights[diff];
            for c in 0..3 {
                acc[c] += q[c] as f32 * weight;
            }
            norm += weight;
        }

        *p = Rgb(acc.map(|a| clamp_u8(a / norm.max(f32::EPSILON))));
    }
    out
}

/// Recursive domain-transform edge-preserving filter.
///
/// `sigma_s` is the spatial extent in pixels, `sigma_r` the range extent on
/// intensities normalized to [0, 1].
pub fn edge_preserving_filter(image: &RgbImage, sigma_s: f32, sigma_r: f32) -> RgbImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w < 2 || h < 2 {
        return image.clone();
    }

    let mut data: Vec<[f32; 3]> = image
        .pixels()
        .map(|p| p.0.map(|v| v as f32 / 255.0))
        .collect();
    let ratio = sigma_s / sigma_r.max(f32::EPSILON);

    // Derivatives of the domain transform, taken from the input image
    let mut dx = vec![1.0f32; w * h];
    let mut dy = vec![1.0f32; w * h];
    for y in 0..h {
        for x in 1..w {
            let (a, b) = (data[y * w + x], data[y * w + x - 1]);
            let d: f32 = (0..3).map(|c| (a[c] - b[c]).abs()).sum();
            dx[y * w + x] = 1.0 + ratio * d;
        }
    }
    for y in 1..h {
        for x in 0..w {
            let (a, b) = (data[y * w + x], data[(y - 1) * w + x]);
            let d: f32 = (0..3).map(|c| (a[c] - b[c]).abs()).sum();
            dy[y * w + x] = 1.0 + ratio * d;
        }
    }

    let n = DOMAIN_TRANSFORM_ITERATIONS;
    for i in 0..n {
        let sigma_h = sigma_s * 3f32.sqrt() * 2f32.powi((n - i - 1) as i32)
            / (4f32.powi(n as i32) - 1.0).sqrt();
        let a = (-(2f32.sqrt()) / sigma_h).exp();

        for y in 0..h {
            let row = y * w;
            for x in 1..w {
                let v = a.powf(dx[row + x]);
                let prev = data[row + x - 1];
                for c in 0..3 {
                    data[row + x][c] += v * (prev[c] - data[row + x][c]);
                }
            }
            for x in (0..w - 1).rev() {
                let v = a.powf(dx[row + x + 1]);
                let next = data[row + x + 1];
                for c in 0..3 {
                    data[row + x][c] += v * (next[c] - data[row + x][c]);
                }
            }
        }

        for x in 0..w {
            for y in 1..h {
                let v = a.powf(dy[y * w + x]);
                let prev = data[(y - 1) * w + x];
                for c in 0..3 {
                    data[y * w + x][c] += v * (prev[c] - data[y * w + x][c]);
                }
            }
            for y in (0..h - 1).rev() {
                let v = a.powf(dy[(y + 1) * w + x]);
                let next = data[(y + 1) * w + x];
                for c in 0..3 {
                    data[y * w + x][c] += v * (next[c] - data[y * w + x][c]);
                }
            }
        }
    }

    let mut out = RgbImage::new(w as u32, h as u32);
    for (p, v) in out.pixels_mut().zip(data) {
        *p = Rgb(v.map(|c| clamp_u8(c * 255.0)));
    }
    out
}

/// Rotate about the centre by `degrees` (counter-clockwise), bilinear
/// sampling, borders replicated from the nearest edge pixel.
pub fn rotate_replicate(image: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (w / 2) as f32;
    let cy = (h / 2) as f32;
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;

    let mut out = RgbImage::new(w, h);
    for (x, y, p) in out.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = (cos * dx - sin * dy + cx).clamp(0.0, max_x);
        let sy = (sin * dx + cos * dy + cy).clamp(0.0, max_y);

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let p00 = image.get_pixel(x0, y0).0;
        let p10 = image.get_pixel(x1, y0).0;
        let p01 = image.get_pixel(x0, y1).0;
        let p11 = image.get_pixel(x1, y1).0;

        let mut px = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            px[c] = clamp_u8(top * (1.0 - fy) + bottom * fy);
        }
        *p = Rgb(px);
    }
    out
}

/// Pad every side by `border` pixels copied from the nearest edge.
pub fn replicate_border(image: &RgbImage, border: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || border == 0 {
        return image.clone();
    }
    RgbImage::from_fn(w + 2 * border, h + 2 * border, |x, y| {
        let sx = x.saturating_sub(border).min(w - 1);
        let sy = y.saturating_sub(border).min(h - 1);
        *image.get_pixel(sx, sy)
    })
}
