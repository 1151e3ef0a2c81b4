//! Error Handling Module
//!
//! Defines the error type shared by every stage of the banknote pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for banknote training operations
#[derive(Error, Debug)]
pub enum BanknoteError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoadError(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or checkpoint loading
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Error while writing export artifacts
    #[error("Export error: {0}")]
    Export(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for BanknoteError {
    fn from(err: serde_json::Error) -> Self {
        BanknoteError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for BanknoteError {
    fn from(err: csv::Error) -> Self {
        BanknoteError::Serialization(err.to_string())
    }
}

impl From<prost::EncodeError> for BanknoteError {
    fn from(err: prost::EncodeError) -> Self {
        BanknoteError::Serialization(err.to_string())
    }
}

/// Convenience Result type for banknote pipeline operations
pub type Result<T> = std::result::Result<T, BanknoteError>;
