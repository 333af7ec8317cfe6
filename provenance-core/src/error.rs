use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("Invalid bitstring: {0}")]
    InvalidBitstring(String),

    #[error("Shape mismatch: left has {left} bits, right has {right} bits")]
    ShapeMismatch { left: usize, right: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Ledger secret key is missing or empty")]
    MissingSecret,

    #[error("Ledger integrity violation at record {index}: {reason}")]
    IntegrityViolation { index: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProvenanceError>;
