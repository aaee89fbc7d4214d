//! Error Handling Module
//!
//! Library-level error type. Binaries wrap these in `anyhow` at the boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for LeafGuard operations
#[derive(Error, Debug)]
pub enum LeafGuardError {
    /// An image could not be opened or decoded
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Uploaded bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Dataset layout or content problem
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    /// Model artifact missing, unreadable, or inconsistent with its labels
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inference error: {0}")]
    Inference(String),

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

impl From<serde_json::Error> for LeafGuardError {
    fn from(err: serde_json::Error) -> Self {
        LeafGuardError::Serialization(err.to_string())
    }
}

/// Convenience Result type for LeafGuard operations
pub type Result<T> = std::result::Result<T, LeafGuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LeafGuardError::Dataset("no classes".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no classes");
    }

    #[test]
    fn test_image_load_error_mentions_path() {
        let err = LeafGuardError::ImageLoad(
            PathBuf::from("/data/train/Tomato___healthy/leaf.jpg"),
            "truncated".to_string(),
        );
        assert!(format!("{}", err).contains("leaf.jpg"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: LeafGuardError = io.into();
        assert!(matches!(err, LeafGuardError::Io(_)));
    }
}
