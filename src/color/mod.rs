//! Deterministic pixel-level palette extraction and comparison.
//!
//! Pure functions over raw image bytes: no I/O, no model calls. The rest
//! of the engine treats this module as ground truth for color: whatever a
//! VLM claims about a palette is overwritten with the output of
//! [`extract_palette`] on the actual pixels.
//!
//! Quantization is classic median cut: pixels are gathered into one box,
//! the box with the widest channel range is split at the median of that
//! channel, and splitting repeats until 16 boxes exist. Boxes are then
//! ranked by pixel coverage; the top three averages become the dominant
//! colors and the next two the accents.

use image::GenericImageView;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::PaletteSpec;

/// Number of median-cut bins. Dominant colors come from the 3 widest-
/// coverage bins, accents from the next 2.
const QUANT_BINS: usize = 16;

/// Pixel sampling stride cap: images are sampled down to at most this many
/// pixels before quantization so palette extraction stays cheap on large
/// references while remaining deterministic.
const MAX_SAMPLES: u32 = 1 << 16;

/// Euclidean-RGB distance thresholds for palette comparison labels.
const DIST_EXCELLENT: f64 = 50.0;
const DIST_GOOD: f64 = 100.0;
const DIST_MODERATE: f64 = 150.0;

#[derive(Debug, Error, Diagnostic)]
pub enum ColorError {
    #[error("image decode failed: {0}")]
    #[diagnostic(
        code(styleforge::color::decode),
        help("The analyzer accepts any format the `image` crate can decode to RGB.")
    )]
    Decode(#[from] image::ImageError),

    #[error("image has no pixels")]
    #[diagnostic(code(styleforge::color::empty))]
    Empty,
}

/// Overall saturation class of an image, derived from mean HSV saturation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Saturation {
    Muted,
    #[default]
    Balanced,
    Vibrant,
}

impl Saturation {
    fn from_mean(mean: f64) -> Self {
        if mean < 0.25 {
            Saturation::Muted
        } else if mean < 0.6 {
            Saturation::Balanced
        } else {
            Saturation::Vibrant
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Saturation::Muted => "muted",
            Saturation::Balanced => "balanced",
            Saturation::Vibrant => "vibrant",
        }
    }
}

/// Extract the palette of an encoded image.
///
/// Deterministic for a given byte input. Accepts anything decodable to
/// RGB.
pub fn extract_palette(bytes: &[u8]) -> Result<PaletteSpec, ColorError> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ColorError::Empty);
    }

    let rgb = img.to_rgb8();
    let stride = sample_stride(width * height);
    let pixels: Vec<[u8; 3]> = rgb
        .pixels()
        .step_by(stride)
        .map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    if pixels.is_empty() {
        return Err(ColorError::Empty);
    }

    let ranked = median_cut(&pixels, QUANT_BINS);

    let dominant: Vec<String> = ranked.iter().take(3).map(|c| hex(c.rgb)).collect();
    let accents: Vec<String> = ranked.iter().skip(3).take(2).map(|c| hex(c.rgb)).collect();
    let color_descriptions: Vec<String> = ranked
        .iter()
        .take(3)
        .map(|c| describe_color(c.rgb))
        .collect();

    let (mean_saturation, value_low, value_high) = hsv_stats(&pixels);

    Ok(PaletteSpec {
        dominant_colors: dominant,
        accents,
        color_descriptions,
        saturation: Saturation::from_mean(mean_saturation),
        value_range: describe_value_range(value_low, value_high),
    })
}

/// Compare a reference palette against a candidate palette.
///
/// For each reference color the nearest candidate color is located and the
/// pair is labeled by Euclidean RGB distance. The output is a short
/// human-readable report meant for injection into the critic's prompt.
#[must_use]
pub fn compare_palettes(reference: &PaletteSpec, candidate: &PaletteSpec) -> String {
    let ref_colors: Vec<[u8; 3]> = reference
        .dominant_colors
        .iter()
        .chain(reference.accents.iter())
        .filter_map(|h| parse_hex(h))
        .collect();
    let cand_colors: Vec<[u8; 3]> = candidate
        .dominant_colors
        .iter()
        .chain(candidate.accents.iter())
        .filter_map(|h| parse_hex(h))
        .collect();

    if ref_colors.is_empty() || cand_colors.is_empty() {
        return "PALETTE COMPARISON: insufficient color data on one side.".to_string();
    }

    let mut lines = vec!["PALETTE COMPARISON (pixel-measured, reference vs candidate):".to_string()];
    for rc in &ref_colors {
        let (nearest, dist) = cand_colors
            .iter()
            .map(|cc| (*cc, distance(*rc, *cc)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or(([0, 0, 0], f64::MAX));
        lines.push(format!(
            "  {} -> {} distance {:.0}: {}",
            hex(*rc),
            hex(nearest),
            dist,
            quality_label(dist)
        ));
    }
    lines.push(format!(
        "  saturation: reference {} vs candidate {}",
        reference.saturation.as_str(),
        candidate.saturation.as_str()
    ));
    lines.join("\n")
}

fn quality_label(dist: f64) -> &'static str {
    if dist < DIST_EXCELLENT {
        "EXCELLENT"
    } else if dist < DIST_GOOD {
        "GOOD"
    } else if dist < DIST_MODERATE {
        "MODERATE"
    } else {
        "POOR"
    }
}

fn distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    let dr = a[0] as f64 - b[0] as f64;
    let dg = a[1] as f64 - b[1] as f64;
    let db = a[2] as f64 - b[2] as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

fn sample_stride(total_pixels: u32) -> usize {
    (total_pixels / MAX_SAMPLES).max(1) as usize
}

fn hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

fn parse_hex(s: &str) -> Option<[u8; 3]> {
    let s = s.trim().strip_prefix('#')?;
    if s.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&s[0..2], 16).ok()?;
    let g = u8::from_str_radix(&s[2..4], 16).ok()?;
    let b = u8::from_str_radix(&s[4..6], 16).ok()?;
    Some([r, g, b])
}

struct RankedColor {
    rgb: [u8; 3],
    #[allow(dead_code)]
    coverage: usize,
}

/// Median-cut quantization. Returns box averages sorted by coverage,
/// descending.
fn median_cut(pixels: &[[u8; 3]], bins: usize) -> Vec<RankedColor> {
    let mut boxes: Vec<Vec<[u8; 3]>> = vec![pixels.to_vec()];

    while boxes.len() < bins {
        // Split the box with the widest single-channel range. A zero-range
        // box is single-colored and never split further.
        let Some((idx, channel)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1)
            .map(|(i, b)| {
                let (ch, range) = widest_channel(b);
                (i, ch, range)
            })
            .filter(|(_, _, range)| *range > 0)
            .max_by_key(|(_, _, range)| *range)
            .map(|(i, ch, _)| (i, ch))
        else {
            break;
        };

        let mut bucket = boxes.swap_remove(idx);
        bucket.sort_unstable_by_key(|p| p[channel]);
        let mid = bucket.len() / 2;
        let right = bucket.split_off(mid);
        boxes.push(bucket);
        boxes.push(right);
    }

    let mut ranked: Vec<RankedColor> = boxes
        .into_iter()
        .filter(|b| !b.is_empty())
        .map(|b| {
            let n = b.len() as u64;
            let sum = b.iter().fold([0u64; 3], |acc, p| {
                [
                    acc[0] + p[0] as u64,
                    acc[1] + p[1] as u64,
                    acc[2] + p[2] as u64,
                ]
            });
            RankedColor {
                rgb: [
                    (sum[0] / n) as u8,
                    (sum[1] / n) as u8,
                    (sum[2] / n) as u8,
                ],
                coverage: n as usize,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.coverage.cmp(&a.coverage).then(a.rgb.cmp(&b.rgb)));
    ranked
}

fn widest_channel(pixels: &[[u8; 3]]) -> (usize, u8) {
    let mut min = [255u8; 3];
    let mut max = [0u8; 3];
    for p in pixels {
        for c in 0..3 {
            min[c] = min[c].min(p[c]);
            max[c] = max[c].max(p[c]);
        }
    }
    (0..3)
        .map(|c| (c, max[c] - min[c]))
        .max_by_key(|(_, range)| *range)
        .unwrap_or((0, 0))
}

/// Mean saturation plus the 5th/95th percentile of value, all in 0..1.
fn hsv_stats(pixels: &[[u8; 3]]) -> (f64, f64, f64) {
    let mut sat_sum = 0.0;
    let mut values: Vec<f64> = Vec::with_capacity(pixels.len());
    for p in pixels {
        let (s, v) = saturation_value(*p);
        sat_sum += s;
        values.push(v);
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let pct = |q: f64| values[((values.len() - 1) as f64 * q) as usize];
    (sat_sum / pixels.len() as f64, pct(0.05), pct(0.95))
}

fn saturation_value(rgb: [u8; 3]) -> (f64, f64) {
    let r = rgb[0] as f64 / 255.0;
    let g = rgb[1] as f64 / 255.0;
    let b = rgb[2] as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let s = if max == 0.0 { 0.0 } else { (max - min) / max };
    (s, max)
}

fn describe_value_range(low: f64, high: f64) -> String {
    format!("{} to {}", value_word(low), value_word(high))
}

fn value_word(v: f64) -> &'static str {
    if v < 0.15 {
        "near-black"
    } else if v < 0.4 {
        "dark"
    } else if v < 0.65 {
        "midtone"
    } else if v < 0.9 {
        "bright"
    } else {
        "near-white"
    }
}

/// Rough human name for an RGB color, hue bucket plus qualifiers.
fn describe_color(rgb: [u8; 3]) -> String {
    let r = rgb[0] as f64 / 255.0;
    let g = rgb[1] as f64 / 255.0;
    let b = rgb[2] as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let (s, v) = saturation_value(rgb);
    if s < 0.12 {
        return match v {
            v if v < 0.15 => "black".to_string(),
            v if v < 0.45 => "dark gray".to_string(),
            v if v < 0.8 => "gray".to_string(),
            _ => "white".to_string(),
        };
    }

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let name = match hue {
        h if h < 20.0 => "red",
        h if h < 45.0 => "orange",
        h if h < 70.0 => "yellow",
        h if h < 160.0 => "green",
        h if h < 200.0 => "cyan",
        h if h < 260.0 => "blue",
        h if h < 300.0 => "purple",
        h if h < 340.0 => "magenta",
        _ => "red",
    };

    let mut qualifiers = Vec::new();
    if v < 0.4 {
        qualifiers.push("dark");
    } else if v > 0.85 {
        qualifiers.push("bright");
    }
    if s < 0.35 {
        qualifiers.push("muted");
    }
    qualifiers.push(name);
    qualifiers.join(" ")
}
