//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use ztdf_binding::{
    BindingConfig, CertificatePaths, DevHierarchy, DevPkiOptions, FsPemSource, ManualClock,
    PkiConfig, Policy, PolicyBindingService, TrustChainStore,
};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// RSA generation is slow; one hierarchy per test binary.
pub fn hierarchy() -> &'static DevHierarchy {
    static HIERARCHY: OnceLock<DevHierarchy> = OnceLock::new();
    HIERARCHY.get_or_init(|| {
        let options = DevPkiOptions {
            key_bits: 2048,
            ..DevPkiOptions::default()
        };
        DevHierarchy::generate(&options, epoch()).expect("generate hierarchy")
    })
}

/// SECRET // FVEY, releasable to USA and GBR.
pub fn secret_fvey_policy() -> Policy {
    serde_json::from_value(json!({
        "policyVersion": "1.0",
        "uuid": "0d4f6a2e-8c1b-4d8e-9a57-3f0b2c6e1d90",
        "securityLabel": {
            "classification": "SECRET",
            "releasabilityTo": ["USA", "GBR"],
            "COI": ["FVEY"],
            "coiOperator": "ALL",
            "caveats": [],
            "originatingCountry": "USA",
            "creationDate": "2026-01-01T00:00:00.000Z",
            "displayMarking": "SECRET//FVEY//REL TO USA, GBR"
        },
        "policyAssertions": [
            {"type": "handling", "value": "ORCON"}
        ]
    }))
    .expect("valid policy")
}

/// Write the shared hierarchy under `dir` in the standard layout.
pub async fn write_pki(dir: &Path) -> CertificatePaths {
    let paths = CertificatePaths::under(dir);
    hierarchy().write_to(&paths).await.expect("write hierarchy");
    paths
}

pub fn store(config: PkiConfig, paths: CertificatePaths, clock: &ManualClock) -> TrustChainStore {
    TrustChainStore::from_parts(
        config,
        paths,
        Arc::new(clock.clone()),
        Arc::new(FsPemSource),
    )
}

pub fn service(
    config: BindingConfig,
    paths: CertificatePaths,
    clock: &ManualClock,
) -> PolicyBindingService {
    PolicyBindingService::new(config, store(PkiConfig::default(), paths, clock))
}
