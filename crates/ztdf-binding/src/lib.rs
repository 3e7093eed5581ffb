//! Cryptographic binding of security policies to ZTDF objects.
//!
//! This crate provides:
//!
//! - A three-tier PKI trust chain store (root → intermediate → signing) with a
//!   TTL certificate cache and clock-skew tolerant chain validation
//! - Deterministic policy canonicalization
//! - X.509 (RSA PKCS#1 v1.5) and HMAC policy signatures
//! - An auto-detecting, fail-secure verification entry point
//! - Development hierarchy generation
//!
//! # Quick Start
//!
//! ```no_run
//! use ztdf_binding::{Policy, PolicyBindingService};
//!
//! # async fn example(policy: Policy) -> anyhow::Result<()> {
//! let service = PolicyBindingService::from_env();
//!
//! let signed = service.sign_with_default(&policy).await?;
//! let result = service.verify_auto(&signed).await;
//! assert!(result.valid);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PKI_DIR` | Hub PKI directory (default: `certs`) |
//! | `PKI_INSTANCES_DIR` | Spoke PKI base directory (default: `instances`) |
//! | `INSTANCE_CODE` | This node's instance code; unset means hub |
//! | `PKI_HUB_INSTANCE_CODE` | Hub instance code (default: `USA`) |
//! | `PKI_*_PATH` | Per-file overrides, see [`PkiConfig::from_env`] |
//! | `PKI_CERTIFICATE_CACHE_TTL_MS` | Certificate cache TTL (default: 3600000) |
//! | `PKI_CLOCK_SKEW_TOLERANCE_MS` | Chain validation skew (default: 300000) |
//! | `POLICY_SIGNATURE_CERT_PATH` | Certificate for `verify_auto` X.509 checks |
//! | `POLICY_SIGNATURE_HMAC_SECRET` | Secret for `verify_auto` HMAC checks |
//! | `POLICY_SIGNATURE_ALGORITHM` | `SHA384` (default) or `SHA512` |
//! | `POLICY_SIGNATURE_VERIFY_CHAIN` | Chain validation in `verify_auto` (default: true) |
//! | `POLICY_BINDING_PROFILE` | `development` (default) or `production` |
//! | `POLICY_VERIFY_CONCURRENCY` | `verify_batch` worker limit (default: 8) |

pub mod binding;
pub mod canonicalize;
pub mod certificate;
pub mod clock;
pub mod config;
pub mod devpki;
pub mod error;
pub mod keys;
pub mod paths;
pub mod scheme;
pub mod signing;
pub mod source;
pub mod trust;
pub mod types;

// Re-export main types
pub use binding::PolicyBindingService;
pub use canonicalize::{canonical_digest, canonicalize, canonicalize_value};
pub use certificate::{Certificate, CertificateInfo, KeyUsageFlag};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BindingConfig, DeploymentProfile, HmacSecret, PathOverrides, PkiConfig};
pub use devpki::{DevHierarchy, DevPkiOptions};
pub use error::{PkiError, PkiResult};
pub use keys::load_private_key_pem;
pub use paths::{
    resolve_certificate_paths, resolve_certificate_paths_with, CertificatePaths, NodeRole,
};
pub use scheme::{HashAlgorithm, SignatureScheme};
pub use source::{FsPemSource, MemoryPemSource, PemSource};
pub use trust::{
    validate_chain_at, CacheEntry, CertificateSummary, CertificateTier, ChainValidation,
    ThreeTierHierarchy, TrustChainStore,
};
pub use types::{
    FailureKind, Policy, PolicySignature, SecurityLabel, SignatureType,
    SignatureVerificationResult, VerificationStatus, SIGNATURE_FIELD,
};
