//! DCT-based perceptual hashing for images.
//!
//! This module computes fingerprints that remain similar for visually similar
//! images even after re-encoding, mild blur or resizing, and change when the
//! content itself changes.
//!
//! # Algorithm
//!
//! 1. Convert to grayscale in `[0, 1]` and resize to `dct_size x dct_size`.
//! 2. Apply a 2-D orthonormal DCT-II.
//! 3. Take the top-left `(hash_size + 1)^2` low-frequency block and drop the
//!    first row and column, which removes the DC term.
//! 4. Set each bit where the coefficient exceeds the median of the block.
//!
//! # Usage
//!
//! ```no_run
//! use provenance_core::fingerprint::{hamming_similarity, phash};
//!
//! let image = image::open("photo.jpg").unwrap();
//! let recompressed = image::open("photo-q70.jpg").unwrap();
//!
//! let a = phash(&image, 8, 32).unwrap();
//! let b = phash(&recompressed, 8, 32).unwrap();
//! let similar = hamming_similarity(&a, &b).unwrap() > 0.9;
//! ```

use image::imageops::{self, FilterType};
use image::DynamicImage;

use crate::dct::dct2;
use crate::error::{ProvenanceError, Result};

/// Default hash side: 8 x 8 = 64 bits.
pub const DEFAULT_HASH_SIZE: u32 = 8;

/// Default side of the resized grayscale image fed to the DCT.
pub const DEFAULT_DCT_SIZE: u32 = 32;

/// Default resolutions for the multi-scale hash.
pub const DEFAULT_SCALES: [u32; 3] = [32, 48, 64];

/// Largest accepted resize target.
pub const MAX_DCT_SIZE: u32 = 1024;

/// Compute the pHash bits of an image.
///
/// Returns `hash_size^2` bits.
pub fn phash(image: &DynamicImage, hash_size: u32, dct_size: u32) -> Result<Vec<bool>> {
    validate_sizes(hash_size, dct_size)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ProvenanceError::InvalidArgument(
            "Cannot hash an empty image".into(),
        ));
    }

    let gray = image.to_luma32f();
    let resized = imageops::resize(&gray, dct_size, dct_size, FilterType::Triangle);
    let n = dct_size as usize;
    let pixels: Vec<f64> = resized
        .as_raw()
        .iter()
        .map(|v| v.clamp(0.0, 1.0) as f64)
        .collect();

    let coeffs = dct2(&pixels, n, n);

    let side = hash_size as usize;
    let mut low = Vec::with_capacity(side * side);
    for y in 1..=side {
        for x in 1..=side {
            low.push(coeffs[y * n + x]);
        }
    }

    let med = median(&low);
    Ok(low.iter().map(|c| *c > med).collect())
}

/// Concatenate pHash bits computed independently at each resize target.
pub fn multiscale_phash(image: &DynamicImage, hash_size: u32, scales: &[u32]) -> Result<Vec<bool>> {
    if scales.is_empty() {
        return Err(ProvenanceError::InvalidArgument(
            "Multi-scale hash needs at least one scale".into(),
        ));
    }
    for &scale in scales {
        validate_sizes(hash_size, scale)?;
    }

    let side = hash_size as usize;
    let mut bits = Vec::with_capacity(side * side * scales.len());
    for &scale in scales {
        bits.extend(phash(image, hash_size, scale)?);
    }
    Ok(bits)
}

/// Compute the Hamming distance between two bit sequences of equal length.
pub fn hamming_distance(a: &[bool], b: &[bool]) -> Result<u32> {
    if a.len() != b.len() {
        return Err(ProvenanceError::ShapeMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.iter().zip(b).filter(|(x, y)| x != y).count() as u32)
}

/// `1 - distance / length`. Two empty hashes are identical.
pub fn hamming_similarity(a: &[bool], b: &[bool]) -> Result<f64> {
    let distance = hamming_distance(a, b)?;
    if a.is_empty() {
        return Ok(1.0);
    }
    Ok(1.0 - distance as f64 / a.len() as f64)
}

/// Pack bits MSB-first into bytes; the last byte is zero-padded.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, bit)| if *bit { acc | (0x80 >> i) } else { acc })
        })
        .collect()
}

/// `hash_size` must be positive and leave room for the DC row and column
/// inside a resize target of at most [`MAX_DCT_SIZE`].
pub(crate) fn validate_sizes(hash_size: u32, dct_size: u32) -> Result<()> {
    if hash_size == 0 {
        return Err(ProvenanceError::InvalidArgument(
            "hash_size must be positive".into(),
        ));
    }
    if dct_size > MAX_DCT_SIZE {
        return Err(ProvenanceError::InvalidArgument(format!(
            "dct_size {} exceeds the maximum of {}",
            dct_size, MAX_DCT_SIZE
        )));
    }
    if hash_size >= dct_size {
        return Err(ProvenanceError::InvalidArgument(format!(
            "dct_size {} too small for hash_size {}",
            dct_size, hash_size
        )));
    }
    Ok(())
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
