//! Fusion configuration.
//!
//! Handles loading the scorer's weights and thresholds from environment
//! variables or JSON, with the documented defaults.

use serde::{Deserialize, Serialize};

use crate::error::{ProvenanceError, Result};

/// Weights, category thresholds and log floor for the fusion scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight of `1 - BER` of the watermark (default: 1.0)
    pub weight_watermark: f64,
    /// Weight of the perceptual hash similarity (default: 1.0)
    pub weight_phash: f64,
    /// Weight of ledger integrity (default: 0.5)
    pub weight_ledger: f64,
    /// Weight of the semantic similarity (default: 0.5)
    pub weight_semantic: f64,
    /// Minimum score for "high" (default: 0.85)
    pub high_threshold: f64,
    /// Minimum score for "medium" (default: 0.60)
    pub medium_threshold: f64,
    /// Floor applied to components before taking logarithms (default: 1e-6)
    pub eps: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weight_watermark: 1.0,
            weight_phash: 1.0,
            weight_ledger: 0.5,
            weight_semantic: 0.5,
            high_threshold: 0.85,
            medium_threshold: 0.60,
            eps: 1e-6,
        }
    }
}

impl FusionConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            weight_watermark: env_f64("PROVENANCE_WEIGHT_WATERMARK", defaults.weight_watermark),
            weight_phash: env_f64("PROVENANCE_WEIGHT_PHASH", defaults.weight_phash),
            weight_ledger: env_f64("PROVENANCE_WEIGHT_LEDGER", defaults.weight_ledger),
            weight_semantic: env_f64("PROVENANCE_WEIGHT_SEMANTIC", defaults.weight_semantic),
            high_threshold: env_f64("PROVENANCE_HIGH_THRESHOLD", defaults.high_threshold),
            medium_threshold: env_f64("PROVENANCE_MEDIUM_THRESHOLD", defaults.medium_threshold),
            eps: env_f64("PROVENANCE_EPS", defaults.eps),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON object; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProvenanceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("weight_watermark", self.weight_watermark),
            ("weight_phash", self.weight_phash),
            ("weight_ledger", self.weight_ledger),
            ("weight_semantic", self.weight_semantic),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ProvenanceError::InvalidConfig(format!(
                    "{} must be a non-negative finite number, got {}",
                    name, weight
                )));
            }
        }

        for (name, threshold) in [
            ("high_threshold", self.high_threshold),
            ("medium_threshold", self.medium_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ProvenanceError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, threshold
                )));
            }
        }
        if self.high_threshold <= self.medium_threshold {
            return Err(ProvenanceError::InvalidConfig(format!(
                "high_threshold ({}) must exceed medium_threshold ({})",
                self.high_threshold, self.medium_threshold
            )));
        }

        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(ProvenanceError::InvalidConfig(format!(
                "eps must be within (0, 1), got {}",
                self.eps
            )));
        }

        Ok(())
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
