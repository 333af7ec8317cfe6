//! Optional backends and the runtime capability report.
//!
//! Semantic embeddings and structural similarity are optional. A backend that
//! is not installed is reported as unavailable here, and every call that would
//! use it returns `None` instead of failing. Callers branch on
//! [`Capabilities`] rather than on errors.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Which optional backends are usable in this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// A semantic (vision) embedding backend is installed.
    pub semantic_embedding: bool,
    /// A structural-similarity backend is installed.
    pub ssim: bool,
}

/// A semantic embedding model.
///
/// Implementations return `None` when the model cannot embed the given
/// image (not loaded, unsupported input). The returned vector does not need
/// to be normalized; the fingerprinter normalizes it.
pub trait EmbeddingBackend: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &str;

    fn embed(&self, image: &DynamicImage) -> Option<Vec<f32>>;
}

/// A structural-similarity metric between two equally sized images.
pub trait SsimBackend: Send + Sync {
    /// Returns a value in `[0, 1]`, or `None` if the pair cannot be compared.
    fn ssim(&self, reference: &DynamicImage, distorted: &DynamicImage) -> Option<f64>;
}

/// Scale `vector` to unit L2 norm.
///
/// Returns `None` for an empty, zero or non-finite vector.
pub fn normalize_embedding(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    if vector.is_empty() {
        return None;
    }
    let norm = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }
    for v in vector.iter_mut() {
        *v = (*v as f64 / norm) as f32;
    }
    Some(vector)
}

/// Cosine similarity of two embeddings, `None` if their lengths differ or
/// either is degenerate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na <= f64::EPSILON || nb <= f64::EPSILON {
        return None;
    }
    Some(dot / (na * nb))
}
