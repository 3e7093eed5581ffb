//! Signature scheme selection.
//!
//! The `algorithm` string of a `policySignature` block is parsed once into a
//! [`SignatureScheme`] at the verification entry point.
//!
//! | Wire name | Scheme |
//! |-----------|--------|
//! | `SHA384`, `SHA512` | X.509 (RSA PKCS#1 v1.5) |
//! | `hmac` | HMAC-SHA384 |
//! | `sha384`, `sha512` | HMAC |
//! | `auto` | undeclared; try X.509 then HMAC |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PkiError;

/// Digest used by either signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Name used for X.509 signatures (`SHA384`).
    pub fn x509_name(self) -> &'static str {
        match self {
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// Name used for HMAC signatures (`sha384`).
    pub fn hmac_name(self) -> &'static str {
        match self {
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.x509_name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PkiError;

    /// Case-insensitive; accepts `sha-384` style spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(PkiError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// How a policy signature is to be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    X509(HashAlgorithm),
    Hmac(HashAlgorithm),
    /// Algorithm was declared as `auto`.
    Auto,
}

impl SignatureScheme {
    /// Parse the wire `algorithm` field. Case matters: `SHA384` is X.509,
    /// `sha384` is HMAC.
    pub fn from_algorithm(algorithm: &str) -> Result<Self, PkiError> {
        match algorithm {
            "SHA384" => Ok(Self::X509(HashAlgorithm::Sha384)),
            "SHA512" => Ok(Self::X509(HashAlgorithm::Sha512)),
            // Legacy name: plain "hmac" always meant SHA-384
            "hmac" | "sha384" => Ok(Self::Hmac(HashAlgorithm::Sha384)),
            "sha512" => Ok(Self::Hmac(HashAlgorithm::Sha512)),
            "auto" => Ok(Self::Auto),
            other => Err(PkiError::UnsupportedAlgorithm {
                algorithm: other.to_string(),
            }),
        }
    }

    /// Wire name written into a new signature block.
    pub fn algorithm_name(self) -> &'static str {
        match self {
            Self::X509(h) => h.x509_name(),
            Self::Hmac(h) => h.hmac_name(),
            Self::Auto => "auto",
        }
    }
}
