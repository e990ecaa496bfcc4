// src/quantize.rs
//
// Palette quantization orchestration. The palette *search* is delegated
// to color_quant's NeuQuant (the quantizer the image crate's own GIF
// encoder uses); this module owns policy: the exact-palette short
// circuit, the fixed uniform palette, spatial sampling, and the dithered
// remap. Alpha is never quantized, only carried through.

use crate::error::BatchError;
use crate::image::Frame;
use crate::policy::{EdgeMode, QuantizeMethod, ResampleFilter};
use color_quant::NeuQuant;
use image::RgbaImage;
use std::collections::HashSet;

/// NeuQuant sample quality. 1 scans every pixel; higher skips. 10 is the
/// conventional speed/quality trade-off.
const NEUQUANT_SAMPLE_FAC: i32 = 10;

pub struct QuantizeParams {
    pub method: QuantizeMethod,
    pub num_colours: usize,
    pub check_exact: bool,
    pub samp_filt: ResampleFilter,
    pub dither: f64,
}

/// Quantize every frame to at most `num_colours` distinct RGB colours.
/// Returns Ok(false) when the exact-palette check short-circuited.
pub fn quantize_frames(frames: &mut [Frame], params: &QuantizeParams) -> Result<bool, BatchError> {
    if frames.is_empty() {
        return Err(BatchError::quantize("image has no frames"));
    }
    if params.check_exact && distinct_at_most(frames, params.num_colours) {
        tracing::debug!(
            limit = params.num_colours,
            "palette already within budget, skipping quantize"
        );
        return Ok(false);
    }

    let palette = build_palette(frames, params)?;
    if palette.is_empty() {
        return Err(BatchError::quantize("degenerate palette"));
    }

    let strength = if params.dither == 0.0 {
        auto_dither_strength(palette.len())
    } else {
        params.dither
    };

    for frame in frames.iter_mut() {
        remap_dithered(&mut frame.pixels, &palette, strength);
    }
    Ok(true)
}

/// True when the frames hold at most `limit` distinct RGB colours.
fn distinct_at_most(frames: &[Frame], limit: usize) -> bool {
    let mut seen: HashSet<[u8; 3]> = HashSet::new();
    for frame in frames {
        for px in frame.pixels.pixels() {
            seen.insert([px.0[0], px.0[1], px.0[2]]);
            if seen.len() > limit {
                return false;
            }
        }
    }
    true
}

fn build_palette(frames: &[Frame], params: &QuantizeParams) -> Result<Vec<[u8; 3]>, BatchError> {
    match params.method {
        QuantizeMethod::Fixed => Ok(fixed_palette(params.num_colours)),
        QuantizeMethod::Neu => {
            let samples = collect_samples(frames, None);
            neuquant_palette(&samples, params.num_colours)
        }
        QuantizeMethod::Spatial => {
            let samples = collect_samples(frames, Some(params.samp_filt));
            neuquant_palette(&samples, params.num_colours)
        }
    }
}

/// Uniform RGB level palette: the largest per-channel level count whose
/// cube still fits the colour budget. Budgets below 8 cannot hold even a
/// 2-level cube and get a grey ramp of exactly `num_colours` entries.
fn fixed_palette(num_colours: usize) -> Vec<[u8; 3]> {
    if num_colours < 8 {
        let step = 255.0 / (num_colours - 1).max(1) as f64;
        return (0..num_colours)
            .map(|i| {
                let v = (i as f64 * step).round() as u8;
                [v, v, v]
            })
            .collect();
    }
    let mut levels = 2usize;
    while (levels + 1).pow(3) <= num_colours {
        levels += 1;
    }
    let mut palette = Vec::with_capacity(levels.pow(3));
    let step = 255.0 / (levels - 1) as f64;
    for r in 0..levels {
        for g in 0..levels {
            for b in 0..levels {
                palette.push([
                    (r as f64 * step).round() as u8,
                    (g as f64 * step).round() as u8,
                    (b as f64 * step).round() as u8,
                ]);
            }
        }
    }
    palette
}

/// Flatten frame pixels into RGBA bytes for the palette search. The
/// spatial method pre-filters each frame down to roughly a quarter of its
/// area with the chosen sampling filter, which pulls sampled colours
/// toward their spatial neighbourhood before the search runs.
fn collect_samples(frames: &[Frame], spatial: Option<ResampleFilter>) -> Vec<u8> {
    let mut samples = Vec::new();
    for frame in frames {
        match spatial {
            Some(filter) => {
                let (w, h) = frame.pixels.dimensions();
                let sw = (w / 2).max(1);
                let sh = (h / 2).max(1);
                let small = crate::image::resample(&frame.pixels, sw, sh, filter, EdgeMode::Clamp);
                samples.extend_from_slice(small.as_raw());
            }
            None => samples.extend_from_slice(frame.pixels.as_raw()),
        }
    }
    samples
}

fn neuquant_palette(samples: &[u8], num_colours: usize) -> Result<Vec<[u8; 3]>, BatchError> {
    if samples.is_empty() {
        return Err(BatchError::quantize("no pixels to sample"));
    }
    let nq = NeuQuant::new(NEUQUANT_SAMPLE_FAC, num_colours, samples);
    let map = nq.color_map_rgb();
    let palette = map.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    Ok(palette)
}

/// Dither strength when the caller asked for auto: stronger as the
/// palette shrinks, never fully off.
fn auto_dither_strength(palette_len: usize) -> f64 {
    (1.0 - palette_len as f64 / 256.0).max(0.25)
}

/// Remap to the palette with Floyd-Steinberg error diffusion, the error
/// scaled by `strength` (0 = plain nearest-colour remap). Alpha passes
/// through untouched.
fn remap_dithered(pixels: &mut RgbaImage, palette: &[[u8; 3]], strength: f64) {
    let (w, h) = pixels.dimensions();
    let (w, h) = (w as usize, h as usize);
    // Working copy in f64 so diffusion can go out of gamut between pixels.
    let mut work: Vec<[f64; 3]> = pixels
        .pixels()
        .map(|p| [p.0[0] as f64, p.0[1] as f64, p.0[2] as f64])
        .collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old = work[idx];
            let chosen = nearest_colour(palette, old);
            let err = [
                (old[0] - chosen[0] as f64) * strength,
                (old[1] - chosen[1] as f64) * strength,
                (old[2] - chosen[2] as f64) * strength,
            ];
            let px = pixels.get_pixel_mut(x as u32, y as u32);
            px.0[0] = chosen[0];
            px.0[1] = chosen[1];
            px.0[2] = chosen[2];

            let mut spread = |dx: i64, dy: i64, weight: f64| {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && (nx as usize) < w && (ny as usize) < h {
                    let nidx = ny as usize * w + nx as usize;
                    for c in 0..3 {
                        work[nidx][c] += err[c] * weight;
                    }
                }
            };
            spread(1, 0, 7.0 / 16.0);
            spread(-1, 1, 3.0 / 16.0);
            spread(0, 1, 5.0 / 16.0);
            spread(1, 1, 1.0 / 16.0);
        }
    }
}

fn nearest_colour(palette: &[[u8; 3]], target: [f64; 3]) -> [u8; 3] {
    let mut best = palette[0];
    let mut best_dist = f64::MAX;
    for &cand in palette {
        let dr = target[0] - cand[0] as f64;
        let dg = target[1] - cand[1] as f64;
        let db = target[2] - cand[2] as f64;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best = cand;
        }
    }
    best
}
