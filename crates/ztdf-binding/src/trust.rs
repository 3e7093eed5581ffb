//! Three-tier trust chain store.
//!
//! Loads the root, intermediate and signing certificates, caches parsed
//! certificates per path with a TTL, and validates the chain:
//! - validity windows, with a bounded clock-skew tolerance
//! - cryptographic issuance (signing ← intermediate ← root ← root)
//! - issuer/subject DN linkage (advisory only)

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rsa::RsaPrivateKey;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::certificate::Certificate;
use crate::clock::{Clock, SystemClock};
use crate::config::PkiConfig;
use crate::error::{PkiError, PkiResult};
use crate::keys::read_private_key;
use crate::paths::{resolve_certificate_paths, CertificatePaths};
use crate::source::{FsPemSource, PemSource};

/// Certificates expiring sooner than this produce a warning.
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Position of a certificate in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateTier {
    Root,
    Intermediate,
    Signing,
}

impl CertificateTier {
    fn label(self) -> &'static str {
        match self {
            Self::Root => "Root CA",
            Self::Intermediate => "Intermediate CA",
            Self::Signing => "Signing certificate",
        }
    }
}

impl fmt::Display for CertificateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cached certificate.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub certificate: Arc<Certificate>,
    pub loaded_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// The loaded hierarchy. Built fresh on every load.
#[derive(Debug, Clone)]
pub struct ThreeTierHierarchy {
    pub root: Arc<Certificate>,
    pub intermediate: Arc<Certificate>,
    pub signing: Arc<Certificate>,
}

/// Outcome of chain validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Health view of one tier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub tier: CertificateTier,
    pub path: PathBuf,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trust chain store handle. Clones share one cache.
#[derive(Debug, Clone)]
pub struct TrustChainStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    config: PkiConfig,
    paths: CertificatePaths,
    clock: Arc<dyn Clock>,
    source: Arc<dyn PemSource>,
    /// Path -> parsed certificate
    cache: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl TrustChainStore {
    /// Store reading from the filesystem at paths resolved from `config`.
    pub fn new(config: PkiConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Store configured from environment variables.
    pub fn from_env() -> Self {
        Self::new(PkiConfig::from_env())
    }

    /// Filesystem store with an injected clock.
    pub fn with_clock(config: PkiConfig, clock: Arc<dyn Clock>) -> Self {
        let paths = resolve_certificate_paths(&config);
        Self::from_parts(config, paths, clock, Arc::new(FsPemSource))
    }

    /// Fully injected store.
    pub fn from_parts(
        config: PkiConfig,
        paths: CertificatePaths,
        clock: Arc<dyn Clock>,
        source: Arc<dyn PemSource>,
    ) -> Self {
        tracing::debug!(
            role = %paths.role,
            base_dir = %paths.base_dir.display(),
            ttl_ms = config.cache_ttl_ms,
            "trust chain store initialised"
        );
        Self {
            inner: Arc::new(StoreInner {
                config,
                paths,
                clock,
                source,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &PkiConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &CertificatePaths {
        &self.inner.paths
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub(crate) fn source(&self) -> &dyn PemSource {
        self.inner.source.as_ref()
    }

    /// Load a certificate, from cache when fresh.
    pub async fn load_certificate(&self, path: &Path) -> PkiResult<Arc<Certificate>> {
        let now = self.now();
        self.evict_stale(now).await;

        if let Some(entry) = self.inner.cache.read().await.get(path) {
            tracing::debug!(path = %path.display(), "certificate cache hit");
            return Ok(Arc::clone(&entry.certificate));
        }

        tracing::debug!(path = %path.display(), "certificate cache miss");
        let pem = self
            .inner
            .source
            .read_pem(path)
            .await
            .map_err(|e| PkiError::certificate_read(path, e))?;
        let certificate = Arc::new(Certificate::from_pem_at(&pem, path)?);

        // Concurrent misses may both parse; last writer wins.
        self.inner.cache.write().await.insert(
            path.to_path_buf(),
            CacheEntry {
                certificate: Arc::clone(&certificate),
                loaded_at: now,
                path: path.to_path_buf(),
            },
        );
        Ok(certificate)
    }

    async fn evict_stale(&self, now: DateTime<Utc>) {
        let ttl = self.inner.config.cache_ttl();
        let is_stale = |entry: &CacheEntry| now - entry.loaded_at > ttl;
        if !self.inner.cache.read().await.values().any(is_stale) {
            return;
        }

        let mut cache = self.inner.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| !is_stale(entry));
        let evicted = before - cache.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted stale certificates");
        }
    }

    /// Load root, intermediate and signing certificates.
    pub async fn load_three_tier_hierarchy(&self) -> PkiResult<ThreeTierHierarchy> {
        let paths = self.paths();
        let root = self.load_certificate(&paths.root_cert).await?;
        let intermediate = self.load_certificate(&paths.intermediate_cert).await?;
        let signing = self.load_certificate(&paths.signing_cert).await?;
        Ok(ThreeTierHierarchy {
            root,
            intermediate,
            signing,
        })
    }

    /// Validate a chain at the store's current time and skew tolerance.
    pub fn validate_chain(
        &self,
        signing: &Certificate,
        intermediate: &Certificate,
        root: &Certificate,
    ) -> ChainValidation {
        validate_chain_at(
            signing,
            intermediate,
            root,
            self.now(),
            self.inner.config.clock_skew_tolerance(),
        )
    }

    /// Load the configured hierarchy and validate it.
    pub async fn validate_three_tier_chain(&self) -> PkiResult<ChainValidation> {
        let h = self.load_three_tier_hierarchy().await?;
        let result = self.validate_chain(&h.signing, &h.intermediate, &h.root);
        if result.valid {
            tracing::info!(warnings = result.warnings.len(), "trust chain valid");
        } else {
            tracing::warn!(errors = ?result.errors, "trust chain invalid");
        }
        Ok(result)
    }

    /// Check that `certificate_pem` chains to the configured intermediate and
    /// root. Signature checks only; any failure yields `false`.
    pub async fn verify_certificate_chain(&self, certificate_pem: &str) -> bool {
        match Certificate::from_pem(certificate_pem) {
            Ok(leaf) => self.verify_certificate_chain_for(&leaf).await,
            Err(e) => {
                tracing::warn!(error = %e, "chain check: certificate does not parse");
                false
            }
        }
    }

    /// [`TrustChainStore::verify_certificate_chain`] for a parsed certificate.
    pub async fn verify_certificate_chain_for(&self, leaf: &Certificate) -> bool {
        let paths = self.paths();
        let intermediate = match self.load_certificate(&paths.intermediate_cert).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "chain check: intermediate CA unavailable");
                return false;
            }
        };
        let root = match self.load_certificate(&paths.root_cert).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "chain check: root CA unavailable");
                return false;
            }
        };

        let checks = [
            leaf.verify_issued_by(&intermediate),
            intermediate.verify_issued_by(&root),
            root.verify_self_signed(),
        ];
        for check in checks {
            if let Err(e) = check {
                tracing::warn!(subject = %leaf.subject(), error = %e, "chain check failed");
                return false;
            }
        }
        true
    }

    /// Read the system signing key. The key is not cached.
    pub async fn load_signing_key(&self) -> PkiResult<RsaPrivateKey> {
        read_private_key(self.source(), &self.paths().signing_key).await
    }

    /// Per-tier summaries; failures are reported per entry.
    pub async fn list_certificates(&self) -> Vec<CertificateSummary> {
        let now = self.now();
        let paths = self.paths();
        let tiers = [
            (CertificateTier::Root, &paths.root_cert),
            (CertificateTier::Intermediate, &paths.intermediate_cert),
            (CertificateTier::Signing, &paths.signing_cert),
        ];

        let mut summaries = Vec::with_capacity(tiers.len());
        for (tier, path) in tiers {
            let summary = match self.load_certificate(path).await {
                Ok(cert) => CertificateSummary {
                    tier,
                    path: path.clone(),
                    loaded: true,
                    subject: Some(cert.subject().to_string()),
                    issuer: Some(cert.issuer().to_string()),
                    serial_number: Some(cert.serial_number().to_string()),
                    valid_from: Some(cert.valid_from()),
                    valid_to: Some(cert.valid_to()),
                    days_remaining: Some((cert.valid_to() - now).num_days()),
                    error: None,
                },
                Err(e) => CertificateSummary {
                    tier,
                    path: path.clone(),
                    loaded: false,
                    subject: None,
                    issuer: None,
                    serial_number: None,
                    valid_from: None,
                    valid_to: None,
                    days_remaining: None,
                    error: Some(e.to_string()),
                },
            };
            summaries.push(summary);
        }
        summaries
    }

    /// Drop every cached certificate.
    pub async fn clear_cache(&self) {
        self.inner.cache.write().await.clear();
        tracing::debug!("certificate cache cleared");
    }

    /// Snapshot of the cache.
    pub async fn cache_entries(&self) -> Vec<CacheEntry> {
        self.inner.cache.read().await.values().cloned().collect()
    }
}

/// Validate a chain at `now`.
///
/// A certificate outside its window by no more than `skew` is accepted with a
/// warning. Issuer/subject DN mismatches are warnings; signature failures are errors.
pub fn validate_chain_at(
    signing: &Certificate,
    intermediate: &Certificate,
    root: &Certificate,
    now: DateTime<Utc>,
    skew: Duration,
) -> ChainValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (tier, cert) in [
        (CertificateTier::Signing, signing),
        (CertificateTier::Intermediate, intermediate),
        (CertificateTier::Root, root),
    ] {
        check_validity(tier, cert, now, skew, &mut errors, &mut warnings);
    }

    if let Err(e) = signing.verify_issued_by(intermediate) {
        errors.push(format!("Signing certificate not issued by Intermediate CA: {}", e));
    }
    if let Err(e) = intermediate.verify_issued_by(root) {
        errors.push(format!("Intermediate CA not issued by Root CA: {}", e));
    }
    if let Err(e) = root.verify_self_signed() {
        errors.push(format!("Root CA is not self-signed: {}", e));
    }

    if signing.issuer() != intermediate.subject() {
        warnings.push(format!(
            "Signing certificate issuer '{}' does not match Intermediate CA subject '{}'",
            signing.issuer(),
            intermediate.subject()
        ));
    }
    if intermediate.issuer() != root.subject() {
        warnings.push(format!(
            "Intermediate CA issuer '{}' does not match Root CA subject '{}'",
            intermediate.issuer(),
            root.subject()
        ));
    }

    ChainValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_validity(
    tier: CertificateTier,
    cert: &Certificate,
    now: DateTime<Utc>,
    skew: Duration,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let from = cert.valid_from();
    let to = cert.valid_to();

    if now < from - skew {
        errors.push(format!(
            "{} '{}' is not yet valid (valid from {})",
            tier,
            cert.subject(),
            from
        ));
        return;
    }
    if now > to + skew {
        errors.push(format!("{} '{}' expired at {}", tier, cert.subject(), to));
        return;
    }

    if now < from {
        warnings.push(format!(
            "{} '{}' is not yet valid (valid from {}), accepted within clock skew tolerance",
            tier,
            cert.subject(),
            from
        ));
    } else if now > to {
        warnings.push(format!(
            "{} '{}' expired at {}, accepted within clock skew tolerance",
            tier,
            cert.subject(),
            to
        ));
    } else if to - now < Duration::days(EXPIRY_WARNING_DAYS) {
        warnings.push(format!(
            "{} '{}' expires in {} days",
            tier,
            cert.subject(),
            (to - now).num_days()
        ));
    }
}
