//! Provenance Core - media integrity and traceability scoring
//!
//! This crate decides whether an image is authentic, untampered and traceable
//! to a recorded processing history, and explains the decision as a single
//! score with per-signal evidence.
//!
//! # Features
//!
//! - DCT perceptual hashing (single and multi-scale) with threshold calibration
//! - Invisible block-DCT watermarking with PSNR/SSIM and robustness evaluation
//! - Append-only HMAC-SHA256 chained ledger with JSON-lines persistence
//! - Fail-closed fusion of all available signals via a weighted geometric mean
//! - Optional semantic-embedding and SSIM backends, reported as capabilities
//!
//! # Example
//!
//! ```no_run
//! use provenance_core::{
//!     hamming_similarity, FusionInputs, FusionScorer, Fingerprinter, Ledger, Watermarker,
//! };
//!
//! # fn example() -> provenance_core::Result<()> {
//! let image = image::open("output.png").unwrap();
//!
//! // Record the pipeline step and mark the output
//! let ledger = Ledger::open("shared-secret", "provenance.jsonl")?;
//! ledger.append(&serde_json::json!({"step": "upscale", "model": "x4"}))?;
//! let marked = Watermarker::default().embed(&image, "1011001110001111")?;
//!
//! // Later: collect evidence for a candidate image and fuse it
//! let candidate = &marked.watermarked_image;
//! let fingerprinter = Fingerprinter::default();
//! let similarity = hamming_similarity(&fingerprinter.phash(&image)?, &fingerprinter.phash(candidate)?)?;
//! let extracted = Watermarker::default().extract(candidate, 16);
//!
//! let report = FusionScorer::default().fuse(
//!     &FusionInputs::new()
//!         .with_watermark_bits("1011001110001111", extracted)
//!         .with_phash_similarity(similarity)
//!         .with_ledger_integrity(!ledger.tamper_detected()),
//! );
//! println!("{} ({:.3})", report.category, report.score);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod dct;
pub mod error;
pub mod fingerprint;
pub mod fusion;
pub mod ledger;
pub mod watermark;

// Re-export main types for convenience
pub use capability::{Capabilities, EmbeddingBackend, SsimBackend};
pub use config::FusionConfig;
pub use error::{ProvenanceError, Result};
pub use fingerprint::{
    calibrate_threshold, compare, hamming_distance, hamming_similarity, multiscale_phash, phash,
    Fingerprint, FingerprintComparison, FingerprintConfig, Fingerprinter, ThresholdCalibration,
};
pub use fusion::{fuse, Category, FusionInputs, FusionResult, FusionScorer};
pub use ledger::{Ledger, LedgerConfig, LedgerRecord, GENESIS};
pub use watermark::{
    bit_error_rate, embed_watermark, extract_watermark, psnr, WatermarkConfig, WatermarkResult,
    Watermarker,
};
