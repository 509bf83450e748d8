//! Error types for Touchstone.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Touchstone operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or running a model.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid model or generation configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A required parameter is absent from the weight map.
    #[error("missing parameter `{key}`")]
    MissingParameter { key: String },

    /// A required weight file does not exist in the weight directory.
    #[error("missing weight file for `{key}`: {}", .path.display())]
    MissingWeightFile { key: String, path: PathBuf },

    /// A weight file exists but cannot be decoded, or its tensor has the wrong shape.
    #[error("malformed weight {}: {reason}", .path.display())]
    MalformedWeight { path: PathBuf, reason: String },

    /// Tensors whose shapes violate an operation's contract.
    #[error("shape mismatch in {op}: {details}")]
    ShapeMismatch { op: &'static str, details: String },

    /// Token id outside the embedding table.
    #[error("token id {id} out of range (vocab_size = {vocab_size})")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    /// Sequence longer than the position table.
    #[error("sequence length {len} exceeds context length {max}")]
    ContextOverflow { len: usize, max: usize },

    /// A forward pass was requested for zero tokens.
    #[error("empty token sequence")]
    EmptySequence,

    /// Vocabulary file could not be interpreted.
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(op: &'static str, details: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            op,
            details: details.into(),
        }
    }
}
