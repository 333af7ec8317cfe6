//! Hamming threshold calibration from labeled image pairs.
//!
//! Positive pairs show the same content under a perturbation, negative pairs
//! show different content. Every threshold `t` in `0..=hash_len` is scored by
//!
//! - `FPR(t) = P(distance <= t | negative)`
//! - `TPR(t) = P(distance <= t | positive)`
//!
//! and the smallest `t` with `FPR(t) <= target_fpr` and `TPR(t) >= 0.9` is
//! selected. When no threshold qualifies, the most permissive one
//! (`hash_len`) is returned.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::perceptual::hamming_distance;
use super::Fingerprinter;
use crate::error::{ProvenanceError, Result};

/// Minimum true-positive rate a calibrated threshold must reach.
pub const MIN_TPR: f64 = 0.9;

/// One point of the ROC sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: u32,
    pub fpr: f64,
    pub tpr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCalibration {
    /// Selected maximum Hamming distance for a match.
    pub threshold: u32,
    pub fpr: f64,
    pub tpr: f64,
    /// `false` when no threshold met both targets and the fallback was used.
    pub met_target: bool,
    /// Sweep in increasing threshold order.
    pub roc: Vec<RocPoint>,
    /// Trapezoidal area under the ROC curve, anchored at (0, 0).
    pub auc: f64,
}

/// Select a Hamming threshold from precomputed pair distances.
pub fn calibrate_threshold(
    positive_distances: &[u32],
    negative_distances: &[u32],
    hash_len: u32,
    target_fpr: f64,
) -> Result<ThresholdCalibration> {
    if positive_distances.is_empty() || negative_distances.is_empty() {
        return Err(ProvenanceError::InvalidArgument(
            "Calibration needs at least one positive and one negative pair".into(),
        ));
    }
    if !(0.0..=1.0).contains(&target_fpr) {
        return Err(ProvenanceError::InvalidArgument(format!(
            "target_fpr must be within [0, 1], got {}",
            target_fpr
        )));
    }

    let rate = |distances: &[u32], t: u32| {
        distances.iter().filter(|d| **d <= t).count() as f64 / distances.len() as f64
    };

    let roc: Vec<RocPoint> = (0..=hash_len)
        .map(|threshold| RocPoint {
            threshold,
            fpr: rate(negative_distances, threshold),
            tpr: rate(positive_distances, threshold),
        })
        .collect();

    let selected = roc
        .iter()
        .find(|p| p.fpr <= target_fpr && p.tpr >= MIN_TPR)
        .copied();

    let (chosen, met_target) = match selected {
        Some(point) => (point, true),
        None => {
            warn!(target_fpr, "no threshold meets the target, using the most permissive");
            (
                RocPoint {
                    threshold: hash_len,
                    fpr: rate(negative_distances, hash_len),
                    tpr: rate(positive_distances, hash_len),
                },
                false,
            )
        }
    };

    let auc = area_under_curve(&roc);
    debug!(
        threshold = chosen.threshold,
        fpr = chosen.fpr,
        tpr = chosen.tpr,
        auc,
        "calibrated hamming threshold"
    );

    Ok(ThresholdCalibration {
        threshold: chosen.threshold,
        fpr: chosen.fpr,
        tpr: chosen.tpr,
        met_target,
        roc,
        auc,
    })
}

/// Hash every pair with `fingerprinter` and calibrate on the pHash distances.
pub fn calibrate_pairs(
    fingerprinter: &Fingerprinter,
    positives: &[(DynamicImage, DynamicImage)],
    negatives: &[(DynamicImage, DynamicImage)],
    target_fpr: f64,
) -> Result<ThresholdCalibration> {
    let distances = |pairs: &[(DynamicImage, DynamicImage)]| -> Result<Vec<u32>> {
        pairs
            .iter()
            .map(|(a, b)| hamming_distance(&fingerprinter.phash(a)?, &fingerprinter.phash(b)?))
            .collect()
    };

    let positive_distances = distances(positives)?;
    let negative_distances = distances(negatives)?;
    calibrate_threshold(
        &positive_distances,
        &negative_distances,
        fingerprinter.config().hash_bits() as u32,
        target_fpr,
    )
}

fn area_under_curve(roc: &[RocPoint]) -> f64 {
    let mut previous = (0.0f64, 0.0f64);
    let mut area = 0.0;
    for point in roc {
        area += (point.fpr - previous.0) * (point.tpr + previous.1) / 2.0;
        previous = (point.fpr, point.tpr);
    }
    area
}
