//! Watermark robustness under common distortions.
//!
//! Each [`Attack`] distorts a watermarked image; the payload is then
//! extracted again and scored by bit-error-rate. A watermark counts as
//! detected when its BER is below the configured threshold (0.1 by default,
//! i.e. at least 90% of bits agree).

use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{bit_error_rate, is_detected, Watermarker, DEFAULT_DETECTION_THRESHOLD};
use crate::error::{ProvenanceError, Result};

/// A single image distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attack {
    /// Additive Gaussian noise with the given standard deviation in 8-bit units.
    GaussianNoise { sigma: f64 },
    /// JPEG re-encoding at the given quality (1-100).
    Jpeg { quality: u8 },
    /// Resize by `factor`, then back to the original size.
    Resize { factor: f64 },
    /// Rotation about the image center, in degrees.
    Rotate { degrees: f64 },
    /// Gaussian blur with the given sigma in pixels.
    Blur { sigma: f32 },
}

impl fmt::Display for Attack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GaussianNoise { sigma } => write!(f, "gaussian_noise(sigma={})", sigma),
            Self::Jpeg { quality } => write!(f, "jpeg(q={})", quality),
            Self::Resize { factor } => write!(f, "resize(x{})", factor),
            Self::Rotate { degrees } => write!(f, "rotate({}deg)", degrees),
            Self::Blur { sigma } => write!(f, "blur(sigma={})", sigma),
        }
    }
}

impl Attack {
    /// Apply the distortion. `seed` drives any randomness.
    pub fn apply(&self, image: &DynamicImage, seed: u64) -> Result<DynamicImage> {
        match *self {
            Self::GaussianNoise { sigma } => Ok(gaussian_noise(image, sigma, seed)),
            Self::Jpeg { quality } => jpeg_recompress(image, quality),
            Self::Resize { factor } => resize_roundtrip(image, factor),
            Self::Rotate { degrees } => Ok(rotate(image, degrees)),
            Self::Blur { sigma } => Ok(blur(image, sigma)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessConfig {
    pub attacks: Vec<Attack>,
    pub ber_threshold: f64,
    pub seed: u64,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            attacks: vec![
                Attack::GaussianNoise { sigma: 2.0 },
                Attack::GaussianNoise { sigma: 5.0 },
                Attack::Jpeg { quality: 90 },
                Attack::Jpeg { quality: 75 },
                Attack::Jpeg { quality: 50 },
                Attack::Resize { factor: 0.5 },
                Attack::Resize { factor: 0.75 },
                Attack::Rotate { degrees: 1.0 },
                Attack::Rotate { degrees: -1.0 },
            ],
            ber_threshold: DEFAULT_DETECTION_THRESHOLD,
            seed: 0x5EED_F00D,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub attack: Attack,
    pub ber: f64,
    pub detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessReport {
    /// BER with no distortion applied.
    pub clean_ber: f64,
    pub psnr: f64,
    pub ssim: Option<f64>,
    pub attacks: Vec<AttackResult>,
}

impl RobustnessReport {
    /// Fraction of attacks after which the watermark was still detected.
    pub fn detection_rate(&self) -> f64 {
        if self.attacks.is_empty() {
            return 0.0;
        }
        let detected = self.attacks.iter().filter(|a| a.detected).count();
        detected as f64 / self.attacks.len() as f64
    }
}

/// Embed `bitstring`, run every attack in `config` and report per-attack BER.
pub fn evaluate(
    watermarker: &Watermarker,
    image: &DynamicImage,
    bitstring: &str,
    config: &RobustnessConfig,
) -> Result<RobustnessReport> {
    let embedded = watermarker.embed(image, bitstring)?;
    let bit_length = bitstring.len();
    let clean_ber = bit_error_rate(
        bitstring,
        &watermarker.extract(&embedded.watermarked_image, bit_length),
    );

    let mut attacks = Vec::with_capacity(config.attacks.len());
    for (i, attack) in config.attacks.iter().enumerate() {
        let distorted = attack.apply(&embedded.watermarked_image, config.seed.wrapping_add(i as u64))?;
        let ber = bit_error_rate(bitstring, &watermarker.extract(&distorted, bit_length));
        let detected = is_detected(ber, config.ber_threshold);
        debug!(attack = %attack, ber, detected, "robustness attack");
        attacks.push(AttackResult {
            attack: *attack,
            ber,
            detected,
        });
    }

    let report = RobustnessReport {
        clean_ber,
        psnr: embedded.psnr,
        ssim: embedded.ssim,
        attacks,
    };
    info!(
        clean_ber,
        psnr = report.psnr,
        detection_rate = report.detection_rate(),
        "robustness evaluation complete"
    );
    Ok(report)
}

/// Add zero-mean Gaussian noise to every color sample.
pub fn gaussian_noise(image: &DynamicImage, sigma: f64, seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rgb = image.to_rgb8();
    for sample in rgb.iter_mut() {
        let noisy = *sample as f64 + sigma * standard_normal(&mut rng);
        *sample = noisy.round().clamp(0.0, 255.0) as u8;
    }
    DynamicImage::ImageRgb8(rgb)
}

/// Encode to JPEG at `quality` and decode again.
pub fn jpeg_recompress(image: &DynamicImage, quality: u8) -> Result<DynamicImage> {
    if !(1..=100).contains(&quality) {
        return Err(ProvenanceError::InvalidArgument(format!(
            "JPEG quality must be within 1..=100, got {}",
            quality
        )));
    }

    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| ProvenanceError::ImageError(format!("JPEG encoding failed: {}", e)))?;

    image::load_from_memory(&buffer.into_inner())
        .map_err(|e| ProvenanceError::ImageError(format!("JPEG decoding failed: {}", e)))
}

/// Resize by `factor` and back to the original dimensions.
pub fn resize_roundtrip(image: &DynamicImage, factor: f64) -> Result<DynamicImage> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(ProvenanceError::InvalidArgument(format!(
            "resize factor must be positive, got {}",
            factor
        )));
    }
    let (width, height) = (image.width(), image.height());
    let small_w = ((width as f64 * factor).round() as u32).max(1);
    let small_h = ((height as f64 * factor).round() as u32).max(1);

    let small = image.resize_exact(small_w, small_h, FilterType::Triangle);
    Ok(small.resize_exact(width, height, FilterType::Triangle))
}

/// Rotate about the center with bilinear sampling, keeping the original
/// canvas. Samples falling outside are clamped to the nearest edge pixel.
pub fn rotate(image: &DynamicImage, degrees: f64) -> DynamicImage {
    let src = image.to_rgb8();
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 {
        return DynamicImage::ImageRgb8(src);
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;

    let out = RgbImage::from_fn(width, height, |x, y| {
        // Inverse mapping from destination to source.
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let sx = (cos * dx + sin * dy + cx).clamp(0.0, max_x);
        let sy = (-sin * dx + cos * dy + cy).clamp(0.0, max_y);

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fx = sx - x0 as f64;
        let fy = sy - y0 as f64;

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let p00 = src.get_pixel(x0, y0)[c] as f64;
            let p10 = src.get_pixel(x1, y0)[c] as f64;
            let p01 = src.get_pixel(x0, y1)[c] as f64;
            let p11 = src.get_pixel(x1, y1)[c] as f64;
            let top = p00 + (p10 - p00) * fx;
            let bottom = p01 + (p11 - p01) * fx;
            *out = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    });

    DynamicImage::ImageRgb8(out)
}

/// Gaussian blur of the color channels.
pub fn blur(image: &DynamicImage, sigma: f32) -> DynamicImage {
    DynamicImage::ImageRgb8(imageops::blur(&image.to_rgb8(), sigma))
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
