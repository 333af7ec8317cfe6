//! Image fingerprints.
//!
//! A [`Fingerprint`] bundles everything the engine can say about an image's
//! content on its own:
//!
//! - **Perceptual hash** at the default resolution, for near-duplicate checks.
//! - **Multi-scale hash**, the pHash recomputed at several resize targets.
//! - **Content digest**, a SHA3-256 over the decoded pixels for exact matches.
//! - **Semantic embedding**, only when an [`EmbeddingBackend`] is installed.
//!
//! Two fingerprints can only be compared when they were produced with the
//! same [`FingerprintConfig`].

pub mod calibration;
pub mod perceptual;

pub use calibration::{calibrate_pairs, calibrate_threshold, RocPoint, ThresholdCalibration};
pub use perceptual::{
    hamming_distance, hamming_similarity, multiscale_phash, phash, DEFAULT_DCT_SIZE,
    DEFAULT_HASH_SIZE, DEFAULT_SCALES, MAX_DCT_SIZE,
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tracing::debug;

use crate::capability::{cosine_similarity, normalize_embedding, Capabilities, EmbeddingBackend};
use crate::error::{ProvenanceError, Result};

/// Parameters that determine fingerprint shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintConfig {
    pub hash_size: u32,
    pub dct_size: u32,
    pub scales: Vec<u32>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            hash_size: DEFAULT_HASH_SIZE,
            dct_size: DEFAULT_DCT_SIZE,
            scales: DEFAULT_SCALES.to_vec(),
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<()> {
        perceptual::validate_sizes(self.hash_size, self.dct_size)
            .map_err(|e| ProvenanceError::InvalidConfig(e.to_string()))?;
        if self.scales.is_empty() {
            return Err(ProvenanceError::InvalidConfig(
                "scales must not be empty".into(),
            ));
        }
        for &scale in &self.scales {
            perceptual::validate_sizes(self.hash_size, scale)
                .map_err(|e| ProvenanceError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    /// Bits in the single-scale hash.
    pub fn hash_bits(&self) -> usize {
        (self.hash_size as usize).pow(2)
    }
}

/// Perceptual summary of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// `hash_size^2` bits at `dct_size`.
    pub phash: Vec<bool>,
    /// `hash_size^2 * scales.len()` bits.
    pub multiscale_phash: Vec<bool>,
    /// Unit-norm embedding, present only with an embedding backend.
    pub semantic_embedding: Option<Vec<f32>>,
    /// SHA3-256 over dimensions and decoded pixel bytes, hex encoded.
    pub content_digest: String,
    pub hash_size: u32,
    pub dct_size: u32,
    pub scales: Vec<u32>,
}

impl Fingerprint {
    /// The single-scale hash packed to hex.
    pub fn phash_hex(&self) -> String {
        hex::encode(perceptual::pack_bits(&self.phash))
    }

    /// Whether `other` was produced with the same shape parameters.
    pub fn is_comparable(&self, other: &Self) -> bool {
        self.hash_size == other.hash_size
            && self.dct_size == other.dct_size
            && self.scales == other.scales
    }

    /// Serialize the fingerprint to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProvenanceError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize a fingerprint from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| ProvenanceError::SerializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProvenanceError::SerializationError(e.to_string()))
    }
}

/// Result of comparing two fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintComparison {
    pub phash_distance: u32,
    pub phash_similarity: f64,
    pub multiscale_similarity: f64,
    /// Both fingerprints hash the exact same pixels.
    pub exact_match: bool,
    /// Cosine similarity of the embeddings, when both carry one.
    pub semantic_similarity: Option<f64>,
}

/// Computes fingerprints with a fixed configuration.
pub struct Fingerprinter {
    config: FingerprintConfig,
    embedder: Option<Box<dyn EmbeddingBackend>>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            config: FingerprintConfig::default(),
            embedder: None,
        }
    }
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("config", &self.config)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            embedder: None,
        })
    }

    /// Install a semantic embedding backend.
    pub fn with_embedding_backend(mut self, backend: Box<dyn EmbeddingBackend>) -> Self {
        debug!(backend = backend.name(), "semantic embedding backend installed");
        self.embedder = Some(backend);
        self
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            semantic_embedding: self.embedder.is_some(),
            ..Capabilities::default()
        }
    }

    pub fn phash(&self, image: &DynamicImage) -> Result<Vec<bool>> {
        phash(image, self.config.hash_size, self.config.dct_size)
    }

    pub fn multiscale_phash(&self, image: &DynamicImage) -> Result<Vec<bool>> {
        multiscale_phash(image, self.config.hash_size, &self.config.scales)
    }

    /// Unit-norm semantic embedding, or `None` when no backend is available
    /// or the backend could not embed this image.
    pub fn semantic_embedding(&self, image: &DynamicImage) -> Option<Vec<f32>> {
        let backend = self.embedder.as_ref()?;
        let embedding = backend.embed(image).and_then(normalize_embedding);
        if embedding.is_none() {
            debug!(backend = backend.name(), "semantic embedding unavailable for image");
        }
        embedding
    }

    pub fn fingerprint(&self, image: &DynamicImage) -> Result<Fingerprint> {
        let phash = self.phash(image)?;
        let multiscale_phash = self.multiscale_phash(image)?;
        let semantic_embedding = self.semantic_embedding(image);
        let content_digest = content_digest(image);

        debug!(
            width = image.width(),
            height = image.height(),
            bits = phash.len(),
            semantic = semantic_embedding.is_some(),
            "computed fingerprint"
        );

        Ok(Fingerprint {
            phash,
            multiscale_phash,
            semantic_embedding,
            content_digest,
            hash_size: self.config.hash_size,
            dct_size: self.config.dct_size,
            scales: self.config.scales.clone(),
        })
    }
}

/// Compare two fingerprints produced with the same configuration.
pub fn compare(a: &Fingerprint, b: &Fingerprint) -> Result<FingerprintComparison> {
    if !a.is_comparable(b) {
        return Err(ProvenanceError::ShapeMismatch {
            left: a.multiscale_phash.len(),
            right: b.multiscale_phash.len(),
        });
    }

    let phash_distance = hamming_distance(&a.phash, &b.phash)?;
    let semantic_similarity = match (&a.semantic_embedding, &b.semantic_embedding) {
        (Some(x), Some(y)) => cosine_similarity(x, y),
        _ => None,
    };

    Ok(FingerprintComparison {
        phash_distance,
        phash_similarity: hamming_similarity(&a.phash, &b.phash)?,
        multiscale_similarity: hamming_similarity(&a.multiscale_phash, &b.multiscale_phash)?,
        exact_match: a.content_digest == b.content_digest,
        semantic_similarity,
    })
}

fn content_digest(image: &DynamicImage) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_bytes());
    hex::encode(hasher.finalize())
}
