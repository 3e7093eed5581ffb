//! Integration tests for TrustChainStore against an on-disk hierarchy.

mod common;

use std::sync::Arc;

use chrono::Duration;
use serial_test::serial;
use ztdf_binding::devpki::{issue_certificate, CertificateKind, CertificateRequest};
use ztdf_binding::{
    BindingConfig, Certificate, FailureKind, ManualClock, NodeRole, PkiConfig, PkiError,
    PolicyBindingService, TrustChainStore,
};

use common::{epoch, hierarchy, secret_fvey_policy};

#[tokio::test]
async fn hierarchy_on_disk_validates() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let store = common::store(PkiConfig::default(), paths, &ManualClock::new(epoch()));

    let h = store.load_three_tier_hierarchy().await.unwrap();
    assert_eq!(h.signing.issuer(), h.intermediate.subject());

    let result = store.validate_three_tier_chain().await.unwrap();
    assert!(result.valid, "{:?}", result.errors);
}

#[tokio::test]
async fn forged_intermediate_breaks_transitivity() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let clock = ManualClock::new(epoch());

    // Replace the intermediate with one carrying identical names but a key
    // that never signed the leaf.
    let genuine = Certificate::from_pem(&hierarchy().intermediate.certificate_pem).unwrap();
    let rogue_key = ztdf_binding::devpki::generate_key(2048).unwrap();
    let root_key =
        ztdf_binding::load_private_key_pem(&hierarchy().root.private_key_pem).unwrap();
    let forged = issue_certificate(
        &CertificateRequest {
            kind: CertificateKind::Intermediate,
            subject: genuine.subject(),
            issuer: genuine.issuer(),
            subject_key: &rogue_key.to_public_key(),
            not_before: genuine.valid_from(),
            not_after: genuine.valid_to(),
        },
        &root_key,
    )
    .unwrap();
    tokio::fs::write(&paths.intermediate_cert, forged).await.unwrap();

    let store = common::store(PkiConfig::default(), paths.clone(), &clock);
    let result = store.validate_three_tier_chain().await.unwrap();
    assert!(!result.valid);
    // Root still vouches for the forged intermediate; only the leaf link fails
    assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
    assert!(result.errors[0].starts_with("Signing certificate not issued"));

    assert!(
        !store
            .verify_certificate_chain(&hierarchy().signing.certificate_pem)
            .await
    );

    // A genuinely signed policy is rejected because its certificate no longer chains
    let signer = common::service(BindingConfig::default(), paths.clone(), &clock);
    let signed = signer.sign_with_default(&secret_fvey_policy()).await.unwrap();
    let svc = PolicyBindingService::new(BindingConfig::default(), store);
    let verdict = svc.verify_with_default(&signed).await;
    assert_eq!(verdict.failure, Some(FailureKind::ChainValidation));
}

#[tokio::test]
async fn clock_skew_boundary_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let signing = Certificate::from_pem(&hierarchy().signing.certificate_pem).unwrap();

    let clock = ManualClock::new(signing.valid_to() + Duration::minutes(4));
    let store = common::store(PkiConfig::default(), paths.clone(), &clock);
    let result = store.validate_three_tier_chain().await.unwrap();
    assert!(result.valid, "{:?}", result.errors);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("clock skew tolerance")));

    // Signature verification uses the strict window
    let signer_clock = ManualClock::new(epoch());
    let signed = common::service(BindingConfig::default(), paths.clone(), &signer_clock)
        .sign_with_default(&secret_fvey_policy())
        .await
        .unwrap();
    let svc = PolicyBindingService::new(BindingConfig::default(), store.clone());
    assert_eq!(
        svc.verify_with_default(&signed).await.failure,
        Some(FailureKind::CertificateExpired)
    );

    clock.advance(Duration::minutes(2));
    let result = store.validate_three_tier_chain().await.unwrap();
    assert!(!result.valid);
    assert!(result.errors.iter().any(|e| e.contains("expired")));
}

#[tokio::test]
async fn custom_skew_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let signing = Certificate::from_pem(&hierarchy().signing.certificate_pem).unwrap();
    let clock = ManualClock::new(signing.valid_to() + Duration::minutes(4));

    let config = PkiConfig::default().with_clock_skew_tolerance_ms(60_000);
    let store = common::store(config, paths, &clock);
    assert!(!store.validate_three_tier_chain().await.unwrap().valid);
}

#[tokio::test]
async fn cache_ttl_with_manual_clock() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let clock = ManualClock::new(epoch());
    let config = PkiConfig::default().with_cache_ttl_ms(1_000);
    let store = common::store(config, paths.clone(), &clock);

    store.load_certificate(&paths.root_cert).await.unwrap();
    tokio::fs::remove_file(&paths.root_cert).await.unwrap();

    clock.advance(Duration::milliseconds(1_000));
    store.load_certificate(&paths.root_cert).await.unwrap();
    assert_eq!(store.cache_entries().await.len(), 1);

    clock.advance(Duration::milliseconds(1));
    let err = store.load_certificate(&paths.root_cert).await.unwrap_err();
    assert!(matches!(err, PkiError::CertificateNotFound { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn cache_is_shared_across_clones_and_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let store = common::store(PkiConfig::default(), paths.clone(), &ManualClock::new(epoch()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.load_three_tier_hierarchy().await.map(|h| h.root)
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(store.cache_entries().await.len(), 3);

    store.clear_cache().await;
    assert!(store.cache_entries().await.is_empty());
}

#[tokio::test]
async fn spoke_prefers_local_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let hub = dir.path().join("certs");
    let local = dir.path().join("instances").join("fra").join("certs");
    common::write_pki(&local).await;

    let config = PkiConfig::default()
        .with_pki_dir(&hub)
        .with_instances_dir(dir.path().join("instances"))
        .with_instance_code("FRA");
    let store = TrustChainStore::with_clock(config, Arc::new(ManualClock::new(epoch())));

    assert_eq!(
        store.paths().role,
        NodeRole::Spoke {
            instance_code: "FRA".into()
        }
    );
    assert_eq!(store.paths().base_dir, local);
    assert!(store.validate_three_tier_chain().await.unwrap().valid);

    // Another spoke without local PKI falls back to the (empty) hub directory
    let config = PkiConfig::default()
        .with_pki_dir(&hub)
        .with_instances_dir(dir.path().join("instances"))
        .with_instance_code("DEU");
    let store = TrustChainStore::with_clock(config, Arc::new(ManualClock::new(epoch())));
    assert_eq!(store.paths().base_dir, hub);
    let err = store.load_three_tier_hierarchy().await.unwrap_err();
    assert!(matches!(err, PkiError::CertificateNotFound { .. }));
}

#[tokio::test]
#[serial]
async fn store_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;

    std::env::set_var("PKI_DIR", dir.path());
    std::env::set_var("INSTANCE_CODE", "usa");
    let store = TrustChainStore::from_env();
    std::env::remove_var("PKI_DIR");
    std::env::remove_var("INSTANCE_CODE");

    assert_eq!(store.paths().role, NodeRole::Hub);
    assert_eq!(store.paths().signing_cert, paths.signing_cert);
    let summaries = store.list_certificates().await;
    assert!(summaries.iter().all(|s| s.loaded));
}
