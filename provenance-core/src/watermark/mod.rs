//! Invisible transform-domain watermarking.
//!
//! A short bitstring is carried in the luminance of an image, one bit per
//! non-overlapping 8x8 block in raster order. Each block's DCT coefficient at
//! row 2, column 3 is forced to `+magnitude` for a `1` and `-magnitude` for a
//! `0`, where `magnitude = strength * 50` in 8-bit luminance units. Extraction
//! reads back the sign of the same coefficient.
//!
//! # Components
//!
//! - [`Watermarker`]: embedding, extraction and imperceptibility metrics.
//! - [`metrics`]: PSNR and the optional structural-similarity backend.
//! - [`robustness`]: bit-error-rate under noise, recompression, resizing and
//!   rotation.
//!
//! Embedding is lossy and not meant to be undone; it only leaves a
//! recoverable signal.

pub mod metrics;
pub mod robustness;

pub use metrics::psnr;
#[cfg(feature = "ssim")]
pub use metrics::WindowedSsim;

use image::{DynamicImage, ImageBuffer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{Capabilities, SsimBackend};
use crate::dct::{dct_block, idct_block, BLOCK_LEN, BLOCK_SIZE};
use crate::error::{ProvenanceError, Result};

/// Default embedding strength, the top of the usual 0.05-0.08 range.
///
/// Chroma-preserving reconstruction rounds and clips every color channel,
/// which eats into the margin of weaker marks on busy, saturated content.
pub const DEFAULT_STRENGTH: f64 = 0.08;

/// Coefficient magnitude per unit of strength, in 8-bit luminance units.
pub const MAGNITUDE_SCALE: f64 = 50.0;

/// Mid-frequency coefficient carrying the bit, as (row, column).
pub const WATERMARK_COEFFICIENT: (usize, usize) = (2, 3);

/// Default BER below which a watermark counts as detected.
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.1;

/// Luminance below which chroma cannot be rescaled and the pixel is set gray.
const MIN_LUMA: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    pub strength: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || self.strength <= 0.0 {
            return Err(ProvenanceError::InvalidConfig(format!(
                "strength must be a positive finite number, got {}",
                self.strength
            )));
        }
        Ok(())
    }

    pub fn magnitude(&self) -> f64 {
        self.strength * MAGNITUDE_SCALE
    }
}

/// Output of [`Watermarker::embed`].
#[derive(Debug, Clone)]
pub struct WatermarkResult {
    /// Same dimensions and channel count as the source.
    pub watermarked_image: DynamicImage,
    pub bitstring: String,
    /// PSNR between source and watermarked image, in dB.
    pub psnr: f64,
    /// Structural similarity, `None` without an SSIM backend.
    pub ssim: Option<f64>,
}

/// Embeds and extracts block-DCT watermarks.
pub struct Watermarker {
    config: WatermarkConfig,
    ssim: Option<Box<dyn SsimBackend>>,
}

impl Default for Watermarker {
    fn default() -> Self {
        Self {
            config: WatermarkConfig::default(),
            ssim: default_ssim_backend(),
        }
    }
}

impl std::fmt::Debug for Watermarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermarker")
            .field("config", &self.config)
            .field("ssim", &self.ssim.is_some())
            .finish()
    }
}

impl Watermarker {
    pub fn new(config: WatermarkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ssim: default_ssim_backend(),
        })
    }

    /// Replace the structural-similarity backend.
    pub fn with_ssim_backend(mut self, backend: Box<dyn SsimBackend>) -> Self {
        self.ssim = Some(backend);
        self
    }

    /// Drop the structural-similarity backend; `ssim` is then reported as
    /// unavailable.
    pub fn without_ssim(mut self) -> Self {
        self.ssim = None;
        self
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            ssim: self.ssim.is_some(),
            ..Capabilities::default()
        }
    }

    /// Embed `bitstring` (characters `0`/`1` only) into `image`.
    pub fn embed(&self, image: &DynamicImage, bitstring: &str) -> Result<WatermarkResult> {
        let bits = parse_bitstring(bitstring)?;
        let plane = PixelPlane::from_image(image);
        let available = capacity(plane.width as u32, plane.height as u32);
        if bits.len() > available {
            return Err(ProvenanceError::InvalidArgument(format!(
                "bitstring of {} bits exceeds capacity of {} blocks",
                bits.len(),
                available
            )));
        }

        let luma = plane.luminance();
        let mut marked = luma.clone();
        let magnitude = self.config.magnitude();
        let coefficient = WATERMARK_COEFFICIENT.0 * BLOCK_SIZE + WATERMARK_COEFFICIENT.1;

        for (block, bit) in block_origins(plane.width, plane.height).zip(&bits) {
            let mut coeffs = dct_block(&read_block(&luma, plane.width, block));
            coeffs[coefficient] = if *bit { magnitude } else { -magnitude };
            write_block(&mut marked, plane.width, block, &idct_block(&coeffs));
        }

        let watermarked_image = plane.with_luminance(&luma, &marked).into_image()?;
        let psnr = psnr(image, &watermarked_image)?;
        let ssim = self
            .ssim
            .as_ref()
            .and_then(|backend| backend.ssim(image, &watermarked_image));

        debug!(
            bits = bits.len(),
            strength = self.config.strength,
            psnr,
            ssim = ?ssim,
            "embedded watermark"
        );

        Ok(WatermarkResult {
            watermarked_image,
            bitstring: bitstring.to_string(),
            psnr,
            ssim,
        })
    }

    /// Read `bit_length` bits back from `image`.
    ///
    /// Returns fewer bits when the image has fewer blocks than requested.
    pub fn extract(&self, image: &DynamicImage, bit_length: usize) -> String {
        let plane = PixelPlane::from_image(image);
        let luma = plane.luminance();
        let coefficient = WATERMARK_COEFFICIENT.0 * BLOCK_SIZE + WATERMARK_COEFFICIENT.1;

        let bits: String = block_origins(plane.width, plane.height)
            .take(bit_length)
            .map(|block| {
                let coeffs = dct_block(&read_block(&luma, plane.width, block));
                if coeffs[coefficient] > 0.0 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect();

        if bits.len() < bit_length {
            debug!(
                requested = bit_length,
                recovered = bits.len(),
                "image holds fewer blocks than requested bits"
            );
        }
        bits
    }

    /// SSIM between two images, `None` without a backend.
    pub fn ssim(&self, reference: &DynamicImage, distorted: &DynamicImage) -> Option<f64> {
        self.ssim.as_ref()?.ssim(reference, distorted)
    }
}

/// Embed with a one-off [`Watermarker`] at the given strength.
pub fn embed_watermark(image: &DynamicImage, bitstring: &str, strength: f64) -> Result<WatermarkResult> {
    Watermarker::new(WatermarkConfig { strength })?.embed(image, bitstring)
}

/// Extract `bit_length` bits. Strength does not affect extraction.
pub fn extract_watermark(image: &DynamicImage, bit_length: usize) -> String {
    Watermarker::default().extract(image, bit_length)
}

/// Number of full 8x8 blocks, i.e. the maximum payload in bits.
pub fn capacity(width: u32, height: u32) -> usize {
    (width as usize / BLOCK_SIZE) * (height as usize / BLOCK_SIZE)
}

/// Parse a `0`/`1` string, rejecting anything else.
pub fn parse_bitstring(bitstring: &str) -> Result<Vec<bool>> {
    bitstring
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(ProvenanceError::InvalidBitstring(format!(
                "unexpected character {:?} at position {}",
                other, i
            ))),
        })
        .collect()
}

/// Fraction of mismatched bits, counting any length difference as errors.
///
/// `(mismatches over the overlap + |len(a) - len(b)|) / max(len(a), len(b))`.
/// Two empty strings carry no evidence and score 1.0.
pub fn bit_error_rate(expected: &str, recovered: &str) -> f64 {
    let expected: Vec<char> = expected.chars().collect();
    let recovered: Vec<char> = recovered.chars().collect();
    let longest = expected.len().max(recovered.len());
    if longest == 0 {
        return 1.0;
    }

    let mismatches = expected
        .iter()
        .zip(&recovered)
        .filter(|(a, b)| a != b)
        .count();
    let missing = expected.len().abs_diff(recovered.len());
    (mismatches + missing) as f64 / longest as f64
}

/// A watermark is detected when its BER is strictly below `threshold`.
pub fn is_detected(ber: f64, threshold: f64) -> bool {
    ber < threshold
}

/// Encode bytes as a bitstring, MSB first.
pub fn bitstring_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:08b}", b)).collect()
}

/// Decode a bitstring into bytes, zero-padding the final byte.
pub fn bytes_from_bitstring(bitstring: &str) -> Result<Vec<u8>> {
    let bits = parse_bitstring(bitstring)?;
    Ok(crate::fingerprint::perceptual::pack_bits(&bits))
}

#[cfg(feature = "ssim")]
fn default_ssim_backend() -> Option<Box<dyn SsimBackend>> {
    Some(Box::new(WindowedSsim::default()))
}

#[cfg(not(feature = "ssim"))]
fn default_ssim_backend() -> Option<Box<dyn SsimBackend>> {
    None
}

/// Top-left corners of all full blocks in raster order.
fn block_origins(width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> {
    let blocks_wide = width / BLOCK_SIZE;
    let blocks_tall = height / BLOCK_SIZE;
    (0..blocks_tall).flat_map(move |by| {
        (0..blocks_wide).map(move |bx| (bx * BLOCK_SIZE, by * BLOCK_SIZE))
    })
}

fn read_block(plane: &[f64], width: usize, (x0, y0): (usize, usize)) -> [f64; BLOCK_LEN] {
    let mut block = [0.0f64; BLOCK_LEN];
    for y in 0..BLOCK_SIZE {
        let row = (y0 + y) * width + x0;
        block[y * BLOCK_SIZE..(y + 1) * BLOCK_SIZE].copy_from_slice(&plane[row..row + BLOCK_SIZE]);
    }
    block
}

fn write_block(plane: &mut [f64], width: usize, (x0, y0): (usize, usize), block: &[f64; BLOCK_LEN]) {
    for y in 0..BLOCK_SIZE {
        let row = (y0 + y) * width + x0;
        plane[row..row + BLOCK_SIZE].copy_from_slice(&block[y * BLOCK_SIZE..(y + 1) * BLOCK_SIZE]);
    }
}

/// 8-bit interleaved pixels in one of the four layouts the watermark keeps.
struct PixelPlane {
    width: usize,
    height: usize,
    channels: usize,
    /// Color channels before any alpha: 1 for gray, 3 for RGB.
    color_channels: usize,
    data: Vec<u8>,
}

impl PixelPlane {
    fn from_image(image: &DynamicImage) -> Self {
        let color = image.color();
        let (channels, color_channels, data) = match (color.has_color(), color.has_alpha()) {
            (false, false) => (1, 1, image.to_luma8().into_raw()),
            (false, true) => (2, 1, image.to_luma_alpha8().into_raw()),
            (true, false) => (3, 3, image.to_rgb8().into_raw()),
            (true, true) => (4, 3, image.to_rgba8().into_raw()),
        };
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            channels,
            color_channels,
            data,
        }
    }

    /// BT.601 luma in 8-bit units.
    fn luminance(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.channels)
            .map(|px| {
                if self.color_channels == 1 {
                    px[0] as f64
                } else {
                    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
                }
            })
            .collect()
    }

    /// Apply a new luminance, scaling color by the luma ratio so chroma is
    /// approximately kept. Alpha is left untouched.
    fn with_luminance(mut self, original: &[f64], marked: &[f64]) -> Self {
        let color_channels = self.color_channels;
        for ((px, y), y_new) in self
            .data
            .chunks_exact_mut(self.channels)
            .zip(original)
            .zip(marked)
        {
            if color_channels == 1 {
                px[0] = to_u8(*y_new);
            } else if *y > MIN_LUMA {
                let ratio = y_new / y;
                for c in px.iter_mut().take(color_channels) {
                    *c = to_u8(*c as f64 * ratio);
                }
            } else {
                for c in px.iter_mut().take(color_channels) {
                    *c = to_u8(*y_new);
                }
            }
        }
        self
    }

    fn into_image(self) -> Result<DynamicImage> {
        let (w, h) = (self.width as u32, self.height as u32);
        let image = match self.channels {
            1 => ImageBuffer::from_raw(w, h, self.data).map(DynamicImage::ImageLuma8),
            2 => ImageBuffer::from_raw(w, h, self.data).map(DynamicImage::ImageLumaA8),
            3 => ImageBuffer::from_raw(w, h, self.data).map(DynamicImage::ImageRgb8),
            _ => ImageBuffer::from_raw(w, h, self.data).map(DynamicImage::ImageRgba8),
        };
        image.ok_or_else(|| {
            ProvenanceError::ImageError(format!("pixel buffer does not match {}x{}", w, h))
        })
    }
}

fn to_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
