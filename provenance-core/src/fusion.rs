//! Fail-closed fusion of provenance signals.
//!
//! Any subset of four signals can be supplied:
//!
//! | component   | input                          | confidence            |
//! |-------------|--------------------------------|-----------------------|
//! | `watermark` | (embedded, extracted) bits     | `1 - BER`             |
//! | `phash`     | perceptual similarity          | clamped to `[0, 1]`   |
//! | `ledger`    | chain intact                   | `1.0` / `0.0`         |
//! | `semantic`  | semantic similarity            | clamped to `[0, 1]`   |
//!
//! The score is the weighted geometric mean of the supplied confidences,
//!
//! ```text
//! score = exp( sum(w_i * ln(max(eps, c_i))) / sum(w_i) )
//! ```
//!
//! so a single confidence near zero pulls the score toward zero no matter
//! how strong the others are. Signals that were not supplied are left out
//! entirely rather than replaced by a neutral value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FusionConfig;
use crate::error::{ProvenanceError, Result};
use crate::watermark::bit_error_rate;

/// Confidence category of a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    High,
    Medium,
    Low,
    /// No signal was supplied.
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the fused signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    Watermark,
    Phash,
    Ledger,
    Semantic,
}

impl Component {
    /// Key used in [`FusionResult::components`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Watermark => "watermark",
            Self::Phash => "phash",
            Self::Ledger => "ledger",
            Self::Semantic => "semantic",
        }
    }

    fn weight(&self, config: &FusionConfig) -> f64 {
        match self {
            Self::Watermark => config.weight_watermark,
            Self::Phash => config.weight_phash,
            Self::Ledger => config.weight_ledger,
            Self::Semantic => config.weight_semantic,
        }
    }
}

/// Signals supplied to [`FusionScorer::fuse`]. `None` means not supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionInputs {
    /// (embedded bitstring, extracted bitstring)
    pub watermark_bits: Option<(String, String)>,
    pub phash_similarity: Option<f64>,
    /// `true` when the ledger chain verified.
    pub ledger_integrity: Option<bool>,
    pub semantic_similarity: Option<f64>,
}

impl FusionInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark_bits(mut self, original: impl Into<String>, extracted: impl Into<String>) -> Self {
        self.watermark_bits = Some((original.into(), extracted.into()));
        self
    }

    pub fn with_phash_similarity(mut self, similarity: f64) -> Self {
        self.phash_similarity = Some(similarity);
        self
    }

    pub fn with_ledger_integrity(mut self, intact: bool) -> Self {
        self.ledger_integrity = Some(intact);
        self
    }

    /// Accepts the output of an optional backend directly; `None` leaves the
    /// component out.
    pub fn with_semantic_similarity(mut self, similarity: Option<f64>) -> Self {
        self.semantic_similarity = similarity;
        self
    }

    /// Normalized confidences of the supplied components.
    pub fn components(&self) -> Vec<(Component, f64)> {
        let mut components = Vec::with_capacity(4);
        if let Some((original, extracted)) = &self.watermark_bits {
            components.push((Component::Watermark, 1.0 - bit_error_rate(original, extracted)));
        }
        if let Some(similarity) = self.phash_similarity {
            components.push((Component::Phash, unit_clamp(similarity)));
        }
        if let Some(intact) = self.ledger_integrity {
            components.push((Component::Ledger, if intact { 1.0 } else { 0.0 }));
        }
        if let Some(similarity) = self.semantic_similarity {
            components.push((Component::Semantic, unit_clamp(similarity)));
        }
        components
    }
}

/// The report returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    /// Fused confidence in `[0, 1]`.
    pub score: f64,
    pub category: Category,
    /// Normalized confidence of each supplied component, keyed by name.
    pub components: BTreeMap<String, f64>,
}

impl FusionResult {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProvenanceError::SerializationError(e.to_string()))
    }
}

/// Weighted geometric-mean scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionScorer {
    config: FusionConfig,
}

impl FusionScorer {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn fuse(&self, inputs: &FusionInputs) -> FusionResult {
        let supplied = inputs.components();
        let components: BTreeMap<String, f64> = supplied
            .iter()
            .map(|(component, value)| (component.name().to_string(), *value))
            .collect();

        let total_weight: f64 = supplied.iter().map(|(c, _)| c.weight(&self.config)).sum();
        if supplied.is_empty() || total_weight <= 0.0 {
            debug!(supplied = supplied.len(), "no weighted evidence to fuse");
            return FusionResult {
                score: 0.0,
                category: Category::Unknown,
                components,
            };
        }

        let log_sum: f64 = supplied
            .iter()
            .map(|(component, value)| component.weight(&self.config) * value.max(self.config.eps).ln())
            .sum();
        let score = (log_sum / total_weight).exp().clamp(0.0, 1.0);
        let category = self.categorize(score);

        debug!(score, category = %category, components = ?components, "fused provenance signals");

        FusionResult {
            score,
            category,
            components,
        }
    }

    pub fn categorize(&self, score: f64) -> Category {
        if score >= self.config.high_threshold {
            Category::High
        } else if score >= self.config.medium_threshold {
            Category::Medium
        } else {
            Category::Low
        }
    }
}

/// Fuse with a one-off scorer.
pub fn fuse(inputs: &FusionInputs, config: &FusionConfig) -> Result<FusionResult> {
    Ok(FusionScorer::new(*config)?.fuse(inputs))
}

/// Clamp to `[0, 1]`; NaN counts as no confidence.
fn unit_clamp(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
