//! Error types for the ovpn-panel core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::ca::CaError;

/// Result type alias using the panel [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for panel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The referenced client or bundle does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The external certificate authority tool failed.
    #[error(transparent)]
    Ca(#[from] CaError),

    /// One or more PKI artifacts required for a bundle are absent.
    #[error("Certificate files not found: {}", display_paths(.0))]
    MissingArtifacts(Vec<PathBuf>),

    /// The bundle could not be encoded as a QR image.
    #[error("Could not generate QR code: {0}")]
    QrEncode(String),

    /// Password hashing or hash parsing failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
