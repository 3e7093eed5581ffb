//! Configuration for the trust chain store and the binding service.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::scheme::HashAlgorithm;

/// Trust chain store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiConfig {
    /// Hub PKI directory.
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Base directory holding per-instance PKI for spokes.
    #[serde(default = "default_instances_dir")]
    pub instances_dir: PathBuf,

    /// This node's instance code. Absent means hub.
    #[serde(default)]
    pub instance_code: Option<String>,

    /// Instance code that is treated as the hub.
    #[serde(default = "default_hub_instance_code")]
    pub hub_instance_code: String,

    /// Explicit per-file locations; each wins over the derived path.
    #[serde(default)]
    pub overrides: PathOverrides,

    /// Certificate cache TTL in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Clock skew tolerated by chain validation, in milliseconds.
    #[serde(default = "default_clock_skew_tolerance_ms")]
    pub clock_skew_tolerance_ms: u64,
}

/// Per-file path overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOverrides {
    pub root_cert: Option<PathBuf>,
    pub root_key: Option<PathBuf>,
    pub intermediate_cert: Option<PathBuf>,
    pub intermediate_key: Option<PathBuf>,
    pub signing_cert: Option<PathBuf>,
    pub signing_key: Option<PathBuf>,
    pub chain: Option<PathBuf>,
}

fn default_pki_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_instances_dir() -> PathBuf {
    PathBuf::from("instances")
}

fn default_hub_instance_code() -> String {
    "USA".to_string()
}

fn default_cache_ttl_ms() -> u64 {
    3_600_000
}

fn default_clock_skew_tolerance_ms() -> u64 {
    300_000
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            pki_dir: default_pki_dir(),
            instances_dir: default_instances_dir(),
            instance_code: None,
            hub_instance_code: default_hub_instance_code(),
            overrides: PathOverrides::default(),
            cache_ttl_ms: default_cache_ttl_ms(),
            clock_skew_tolerance_ms: default_clock_skew_tolerance_ms(),
        }
    }
}

impl PkiConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PKI_DIR` | Hub PKI directory |
    /// | `PKI_INSTANCES_DIR` | Base directory for spoke-local PKI |
    /// | `INSTANCE_CODE` | This node's instance code |
    /// | `PKI_HUB_INSTANCE_CODE` | Instance code of the hub |
    /// | `PKI_ROOT_CA_PATH`, `PKI_ROOT_CA_KEY_PATH` | Root CA overrides |
    /// | `PKI_INTERMEDIATE_CA_PATH`, `PKI_INTERMEDIATE_CA_KEY_PATH` | Intermediate CA overrides |
    /// | `PKI_SIGNING_CERT_PATH`, `PKI_SIGNING_KEY_PATH` | Signing identity overrides |
    /// | `PKI_CHAIN_PATH` | Chain bundle override |
    /// | `PKI_CERTIFICATE_CACHE_TTL_MS` | Cache TTL |
    /// | `PKI_CLOCK_SKEW_TOLERANCE_MS` | Chain validation skew |
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`PkiConfig::from_env`] with an injected variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str| get(key).map(PathBuf::from);

        Self {
            pki_dir: path("PKI_DIR").unwrap_or_else(default_pki_dir),
            instances_dir: path("PKI_INSTANCES_DIR").unwrap_or_else(default_instances_dir),
            instance_code: get("INSTANCE_CODE").map(|v| v.trim().to_string()),
            hub_instance_code: get("PKI_HUB_INSTANCE_CODE")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(default_hub_instance_code),
            overrides: PathOverrides {
                root_cert: path("PKI_ROOT_CA_PATH"),
                root_key: path("PKI_ROOT_CA_KEY_PATH"),
                intermediate_cert: path("PKI_INTERMEDIATE_CA_PATH"),
                intermediate_key: path("PKI_INTERMEDIATE_CA_KEY_PATH"),
                signing_cert: path("PKI_SIGNING_CERT_PATH"),
                signing_key: path("PKI_SIGNING_KEY_PATH"),
                chain: path("PKI_CHAIN_PATH"),
            },
            cache_ttl_ms: parse_or(get("PKI_CERTIFICATE_CACHE_TTL_MS"), default_cache_ttl_ms),
            clock_skew_tolerance_ms: parse_or(
                get("PKI_CLOCK_SKEW_TOLERANCE_MS"),
                default_clock_skew_tolerance_ms,
            ),
        }
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        millis(self.cache_ttl_ms)
    }

    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        millis(self.clock_skew_tolerance_ms)
    }

    /// Set the hub PKI directory.
    pub fn with_pki_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pki_dir = dir.into();
        self
    }

    /// Set the instances base directory.
    pub fn with_instances_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.instances_dir = dir.into();
        self
    }

    /// Set this node's instance code.
    pub fn with_instance_code(mut self, code: impl Into<String>) -> Self {
        self.instance_code = Some(code.into());
        self
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    /// Set the chain validation skew tolerance.
    pub fn with_clock_skew_tolerance_ms(mut self, skew_ms: u64) -> Self {
        self.clock_skew_tolerance_ms = skew_ms;
        self
    }
}

/// Deployment profile. Production turns configuration gaps into failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    #[default]
    Development,
    Production,
}

impl DeploymentProfile {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl FromStr for DeploymentProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown deployment profile '{}'", other)),
        }
    }
}

/// Shared HMAC secret. Zeroized on drop; never printed.
#[derive(Clone)]
pub struct HmacSecret(Zeroizing<Vec<u8>>);

impl HmacSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for HmacSecret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl From<String> for HmacSecret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl fmt::Debug for HmacSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HmacSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Policy binding service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Certificate used by `verify_auto` for X.509 signatures.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Secret used by `verify_auto` for HMAC signatures.
    #[serde(skip)]
    pub hmac_secret: Option<HmacSecret>,

    /// Hash for new X.509 signatures, and for `auto` on the X.509 path.
    #[serde(default)]
    pub default_algorithm: HashAlgorithm,

    /// Whether `verify_auto` validates the trust chain on the X.509 path.
    #[serde(default = "default_true")]
    pub verify_chain: bool,

    #[serde(default)]
    pub profile: DeploymentProfile,

    /// Worker limit for `verify_batch`.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_batch_concurrency() -> usize {
    8
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            certificate_path: None,
            hmac_secret: None,
            default_algorithm: HashAlgorithm::default(),
            verify_chain: true,
            profile: DeploymentProfile::default(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl BindingConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `POLICY_SIGNATURE_CERT_PATH` | Certificate for X.509 verification |
    /// | `POLICY_SIGNATURE_HMAC_SECRET` | Secret for HMAC verification |
    /// | `POLICY_SIGNATURE_ALGORITHM` | `SHA384` or `SHA512` |
    /// | `POLICY_SIGNATURE_VERIFY_CHAIN` | Chain validation in `verify_auto` |
    /// | `POLICY_BINDING_PROFILE` | `production` or `development` |
    /// | `POLICY_VERIFY_CONCURRENCY` | `verify_batch` worker limit |
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`BindingConfig::from_env`] with an injected variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default_algorithm = match get("POLICY_SIGNATURE_ALGORITHM") {
            Some(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %v, "unsupported POLICY_SIGNATURE_ALGORITHM, using SHA384");
                HashAlgorithm::default()
            }),
            None => HashAlgorithm::default(),
        };

        // Unknown values fail closed.
        let profile = match get("POLICY_BINDING_PROFILE") {
            Some(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "treating unrecognised binding profile as production");
                DeploymentProfile::Production
            }),
            None => DeploymentProfile::default(),
        };

        Self {
            certificate_path: get("POLICY_SIGNATURE_CERT_PATH").map(PathBuf::from),
            hmac_secret: get("POLICY_SIGNATURE_HMAC_SECRET").map(HmacSecret::from),
            default_algorithm,
            verify_chain: get("POLICY_SIGNATURE_VERIFY_CHAIN")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(true),
            profile,
            batch_concurrency: parse_or::<usize>(
                get("POLICY_VERIFY_CONCURRENCY"),
                default_batch_concurrency,
            )
            .max(1),
        }
    }

    /// True when at least one verification mechanism is configured.
    pub fn has_verification_mechanism(&self) -> bool {
        self.certificate_path.is_some() || self.hmac_secret.is_some()
    }

    /// Set the X.509 verification certificate.
    pub fn with_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_path = Some(path.into());
        self
    }

    /// Set the HMAC secret.
    pub fn with_hmac_secret(mut self, secret: impl Into<HmacSecret>) -> Self {
        self.hmac_secret = Some(secret.into());
        self
    }

    pub fn with_profile(mut self, profile: DeploymentProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_default_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    pub fn with_verify_chain(mut self, verify: bool) -> Self {
        self.verify_chain = verify;
        self
    }

    pub fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T: FromStr>(value: Option<String>, default: fn() -> T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(default)
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn pki_defaults() {
        let config = PkiConfig::from_lookup(lookup(&[]));
        assert_eq!(config, PkiConfig::default());
        assert_eq!(config.cache_ttl(), chrono::Duration::hours(1));
        assert_eq!(config.clock_skew_tolerance(), chrono::Duration::minutes(5));
        assert_eq!(config.hub_instance_code, "USA");
    }

    #[test]
    fn pki_env_values() {
        let config = PkiConfig::from_lookup(lookup(&[
            ("PKI_DIR", "/etc/dive/pki"),
            ("INSTANCE_CODE", " FRA "),
            ("PKI_SIGNING_KEY_PATH", "/run/secrets/signer.key"),
            ("PKI_CERTIFICATE_CACHE_TTL_MS", "1000"),
            ("PKI_CLOCK_SKEW_TOLERANCE_MS", "not-a-number"),
            ("PKI_CHAIN_PATH", ""),
        ]));
        assert_eq!(config.pki_dir, PathBuf::from("/etc/dive/pki"));
        assert_eq!(config.instance_code.as_deref(), Some("FRA"));
        assert_eq!(
            config.overrides.signing_key,
            Some(PathBuf::from("/run/secrets/signer.key"))
        );
        assert_eq!(config.overrides.chain, None);
        assert_eq!(config.cache_ttl_ms, 1000);
        assert_eq!(config.clock_skew_tolerance_ms, 300_000);
    }

    #[test]
    fn binding_env_values() {
        let config = BindingConfig::from_lookup(lookup(&[
            ("POLICY_SIGNATURE_HMAC_SECRET", "S"),
            ("POLICY_SIGNATURE_ALGORITHM", "SHA512"),
            ("POLICY_SIGNATURE_VERIFY_CHAIN", "false"),
            ("POLICY_BINDING_PROFILE", "production"),
            ("POLICY_VERIFY_CONCURRENCY", "0"),
        ]));
        assert_eq!(config.hmac_secret.unwrap().as_bytes(), b"S");
        assert_eq!(config.default_algorithm, HashAlgorithm::Sha512);
        assert!(!config.verify_chain);
        assert!(config.profile.is_production());
        assert_eq!(config.batch_concurrency, 1);
    }

    #[test]
    fn unknown_profile_fails_closed() {
        let config = BindingConfig::from_lookup(lookup(&[("POLICY_BINDING_PROFILE", "staging")]));
        assert_eq!(config.profile, DeploymentProfile::Production);

        let config = BindingConfig::from_lookup(lookup(&[]));
        assert_eq!(config.profile, DeploymentProfile::Development);
        assert!(!config.has_verification_mechanism());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = HmacSecret::from("super-secret-value");
        let dbg = format!("{:?}", secret);
        assert!(!dbg.contains("super-secret-value"));

        let config = BindingConfig::default().with_hmac_secret("super-secret-value");
        assert!(!format!("{:?}", config).contains("super-secret-value"));
    }

    #[test]
    #[serial]
    fn from_env_reads_process_environment() {
        std::env::set_var("PKI_HUB_INSTANCE_CODE", "GBR");
        std::env::set_var("POLICY_SIGNATURE_CERT_PATH", "/certs/signing/policy-signer.crt");

        let pki = PkiConfig::from_env();
        let binding = BindingConfig::from_env();

        std::env::remove_var("PKI_HUB_INSTANCE_CODE");
        std::env::remove_var("POLICY_SIGNATURE_CERT_PATH");

        assert_eq!(pki.hub_instance_code, "GBR");
        assert_eq!(
            binding.certificate_path,
            Some(PathBuf::from("/certs/signing/policy-signer.crt"))
        );
    }
}
