//! Certificate and key locations.
//!
//! The hub keeps its hierarchy under `PKI_DIR`. A spoke prefers its own
//! `{PKI_INSTANCES_DIR}/{code}/certs` when that directory exists and falls
//! back to the shared hub directory otherwise. Explicit overrides win per file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::PkiConfig;

/// Whether this node is the coalition hub or a spoke instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum NodeRole {
    Hub,
    Spoke { instance_code: String },
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub => f.write_str("hub"),
            Self::Spoke { instance_code } => write!(f, "spoke ({})", instance_code),
        }
    }
}

impl NodeRole {
    /// Hub when no instance code is set or it matches the hub code (case-insensitive).
    pub fn from_config(config: &PkiConfig) -> Self {
        match config.instance_code.as_deref().map(str::trim) {
            None | Some("") => Self::Hub,
            Some(code) if code.eq_ignore_ascii_case(config.hub_instance_code.trim()) => Self::Hub,
            Some(code) => Self::Spoke {
                instance_code: code.to_ascii_uppercase(),
            },
        }
    }
}

/// Resolved file locations of the three-tier hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificatePaths {
    pub role: NodeRole,
    /// Directory the derived paths were built from.
    pub base_dir: PathBuf,
    pub root_cert: PathBuf,
    pub root_key: PathBuf,
    pub intermediate_cert: PathBuf,
    pub intermediate_key: PathBuf,
    pub signing_cert: PathBuf,
    pub signing_key: PathBuf,
    pub chain: PathBuf,
}

impl CertificatePaths {
    /// Standard layout under `dir`, no overrides.
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        Self::layout(NodeRole::Hub, dir.into())
    }

    fn layout(role: NodeRole, base: PathBuf) -> Self {
        let ca = base.join("ca");
        let signing = base.join("signing");
        Self {
            role,
            root_cert: ca.join("root.crt"),
            root_key: ca.join("root.key"),
            intermediate_cert: ca.join("intermediate.crt"),
            intermediate_key: ca.join("intermediate.key"),
            signing_cert: signing.join("policy-signer.crt"),
            signing_key: signing.join("policy-signer.key"),
            chain: ca.join("chain.pem"),
            base_dir: base,
        }
    }

    /// Labelled paths, in hierarchy order.
    pub fn entries(&self) -> [(&'static str, &Path); 7] {
        [
            ("root_cert", &self.root_cert),
            ("root_key", &self.root_key),
            ("intermediate_cert", &self.intermediate_cert),
            ("intermediate_key", &self.intermediate_key),
            ("signing_cert", &self.signing_cert),
            ("signing_key", &self.signing_key),
            ("chain", &self.chain),
        ]
    }
}

/// Resolve paths, probing the filesystem for a spoke-local directory.
pub fn resolve_certificate_paths(config: &PkiConfig) -> CertificatePaths {
    resolve_certificate_paths_with(config, Path::is_dir)
}

/// Resolve paths with an injected directory probe.
pub fn resolve_certificate_paths_with(
    config: &PkiConfig,
    dir_exists: impl Fn(&Path) -> bool,
) -> CertificatePaths {
    let role = NodeRole::from_config(config);

    let base = match &role {
        NodeRole::Hub => config.pki_dir.clone(),
        NodeRole::Spoke { instance_code } => {
            let local = config
                .instances_dir
                .join(instance_code.to_ascii_lowercase())
                .join("certs");
            if dir_exists(&local) {
                local
            } else {
                tracing::debug!(
                    instance = %instance_code,
                    missing = %local.display(),
                    "no spoke-local PKI, using hub directory"
                );
                config.pki_dir.clone()
            }
        }
    };

    let mut paths = CertificatePaths::layout(role, base);
    let o = &config.overrides;
    let apply = |slot: &mut PathBuf, value: &Option<PathBuf>| {
        if let Some(v) = value {
            *slot = v.clone();
        }
    };
    apply(&mut paths.root_cert, &o.root_cert);
    apply(&mut paths.root_key, &o.root_key);
    apply(&mut paths.intermediate_cert, &o.intermediate_cert);
    apply(&mut paths.intermediate_key, &o.intermediate_key);
    apply(&mut paths.signing_cert, &o.signing_cert);
    apply(&mut paths.signing_key, &o.signing_key);
    apply(&mut paths.chain, &o.chain);
    paths
}
