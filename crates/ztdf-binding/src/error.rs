//! Error types for trust material loading and policy signing.
//!
//! Verification of a specific document never surfaces these errors; it is
//! reported through [`crate::types::SignatureVerificationResult`] instead.

use std::path::{Path, PathBuf};

/// PKI and binding errors.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// A required certificate file does not exist.
    #[error("certificate not found: {}", path.display())]
    CertificateNotFound { path: PathBuf },

    /// A required private key file does not exist.
    #[error("private key not found: {}", path.display())]
    KeyNotFound { path: PathBuf },

    /// Reading trust material failed for a reason other than absence.
    #[error("failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// PEM or X.509 structure could not be parsed.
    #[error("invalid certificate {}: {reason}", path.display())]
    CertificateParse { path: PathBuf, reason: String },

    /// Private key PEM could not be parsed.
    #[error("invalid private key: {reason}")]
    KeyParse { reason: String },

    /// Certificate carries a key type this crate cannot verify with.
    #[error("unsupported key: {reason}")]
    UnsupportedKey { reason: String },

    /// Signature algorithm name is not recognised for the requested scheme.
    #[error("unsupported signature algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Policy could not be turned into canonical bytes.
    #[error("canonicalization failed: {reason}")]
    Canonicalize { reason: String },

    /// Producing a signature failed.
    #[error("signing failed: {reason}")]
    Signing { reason: String },

    /// Building a development certificate failed.
    #[error("certificate issuance failed: {reason}")]
    Issuance { reason: String },

    /// Configuration value is invalid.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl PkiError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Missing trust material / config
            Self::CertificateNotFound { .. } => 2,
            Self::KeyNotFound { .. } => 2,
            Self::Config { .. } => 2,
            Self::Io { .. } => 2,

            // Malformed material
            Self::CertificateParse { .. } => 3,
            Self::KeyParse { .. } => 3,
            Self::UnsupportedKey { .. } => 3,
            Self::UnsupportedAlgorithm { .. } => 3,

            // Operation failures
            Self::Canonicalize { .. } => 4,
            Self::Signing { .. } => 4,
            Self::Issuance { .. } => 4,
        }
    }

    pub(crate) fn certificate_read(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::CertificateNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }

    pub(crate) fn key_read(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::KeyNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for PkiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Canonicalize {
            reason: err.to_string(),
        }
    }
}

/// Result type for PKI operations.
pub type PkiResult<T> = Result<T, PkiError>;
