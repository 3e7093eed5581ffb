//! Integration tests for PolicyBindingService.
//!
//! Covers tamper sensitivity, sign/verify round trips for both schemes, HMAC
//! determinism, wrong-key rejection, deployment profiles, batch ordering and
//! documents signed by other producers.

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use proptest::prelude::*;
use serde_json::{json, Value};
use sha2::Sha384;
use ztdf_binding::{
    canonicalize, canonicalize_value, load_private_key_pem, BindingConfig, CertificatePaths, DeploymentProfile, FailureKind,
    HashAlgorithm, HmacSecret, ManualClock, Policy, SignatureType, VerificationStatus,
};

use common::{epoch, hierarchy, secret_fvey_policy, service};

fn hmac_service(secret: &str, profile: DeploymentProfile) -> ztdf_binding::PolicyBindingService {
    let config = BindingConfig::default()
        .with_hmac_secret(secret)
        .with_profile(profile);
    // HMAC paths never touch the store
    service(
        config,
        CertificatePaths::under("/nonexistent"),
        &ManualClock::new(epoch()),
    )
}

#[tokio::test]
async fn x509_roundtrip_and_tamper_sensitivity() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let svc = service(BindingConfig::default(), paths, &ManualClock::new(epoch()));

    let signed = svc.sign_with_default(&secret_fvey_policy()).await.unwrap();
    assert!(svc.verify_with_default(&signed).await.is_tamper_checked());

    let mutations: [fn(&mut Policy); 8] = [
        |p| p.security_label.classification = "UNCLASSIFIED".into(),
        |p| p.security_label.releasability_to.push("FRA".into()),
        |p| p.security_label.coi.clear(),
        |p| p.security_label.coi_operator = Some("ANY".into()),
        |p| p.security_label.originating_country = "GBR".into(),
        |p| p.policy_version = "1.1".into(),
        |p| {
            p.extensions.insert("uuid".into(), json!("tampered"));
        },
        |p| p.policy_assertions.clear(),
    ];
    for (i, mutate) in mutations.into_iter().enumerate() {
        let mut tampered = signed.clone();
        mutate(&mut tampered);
        let result = svc.verify_with_default(&tampered).await;
        assert!(!result.valid, "mutation {} was not detected", i);
        assert_eq!(result.failure, Some(FailureKind::SignatureMismatch));
    }
}

#[tokio::test]
async fn x509_sha512_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let config = BindingConfig::default().with_default_algorithm(HashAlgorithm::Sha512);
    let svc = service(config, paths, &ManualClock::new(epoch()));

    let signed = svc.sign_with_default(&secret_fvey_policy()).await.unwrap();
    assert_eq!(signed.signature().unwrap().algorithm, "SHA512");

    let result = svc
        .verify_x509(&signed, &hierarchy().signing.certificate_pem, true)
        .await;
    assert!(result.is_tamper_checked(), "{:?}", result);
}

#[tokio::test]
async fn x509_wrong_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let svc = service(BindingConfig::default(), paths, &ManualClock::new(epoch()));

    // Signed by the intermediate CA key, verified against the signing certificate
    let intermediate_key = load_private_key_pem(&hierarchy().intermediate.private_key_pem).unwrap();
    let policy = secret_fvey_policy();
    let value = svc
        .sign_x509(&policy, &intermediate_key, HashAlgorithm::Sha384)
        .unwrap();
    let signed = ztdf_binding::signing::attach_signature(
        &policy,
        ztdf_binding::SignatureScheme::X509(HashAlgorithm::Sha384),
        value,
        "CN=Impostor",
        epoch(),
    );

    let result = svc
        .verify_x509(&signed, &hierarchy().signing.certificate_pem, false)
        .await;
    assert!(!result.valid);
    assert_eq!(result.failure, Some(FailureKind::SignatureMismatch));
    assert_eq!(result.signature_type, SignatureType::X509);
}

#[test]
fn hmac_is_deterministic() {
    let svc = hmac_service("S", DeploymentProfile::Development);
    let secret = HmacSecret::from("S");
    let policy = secret_fvey_policy();

    let a = svc.sign_hmac(&policy, &secret, HashAlgorithm::Sha384).unwrap();
    let b = svc.sign_hmac(&policy, &secret, HashAlgorithm::Sha384).unwrap();
    assert_eq!(a, b);

    // The embedded signature does not feed back into the next signature
    let signed = svc
        .sign_hmac_policy(&policy, &secret, HashAlgorithm::Sha384, "hub")
        .unwrap();
    let c = svc.sign_hmac(&signed, &secret, HashAlgorithm::Sha384).unwrap();
    assert_eq!(a, c);
}

#[tokio::test]
async fn secret_fvey_scenario() {
    let svc = hmac_service("S", DeploymentProfile::Production);
    let signed = svc
        .sign_hmac_policy(
            &secret_fvey_policy(),
            &HmacSecret::from("S"),
            HashAlgorithm::Sha384,
            "USA-hub",
        )
        .unwrap();

    let ok = svc.verify_hmac(&signed, &HmacSecret::from("S"));
    assert!(ok.valid);
    assert_eq!(ok.signature_type, SignatureType::Hmac);
    assert!(svc.verify_auto(&signed).await.is_tamper_checked());

    let wrong = svc.verify_hmac(&signed, &HmacSecret::from("wrong"));
    assert!(!wrong.valid);
    assert_eq!(wrong.failure, Some(FailureKind::SignatureMismatch));

    let mut downgraded = signed.clone();
    downgraded.security_label.classification = "UNCLASSIFIED".into();
    assert!(!svc.verify_auto(&downgraded).await.valid);

    let mut widened = signed.clone();
    widened.security_label.releasability_to.push("FRA".into());
    assert!(!svc.verify_auto(&widened).await.valid);
}

#[tokio::test]
async fn hmac_sha512_and_legacy_name() {
    let svc = hmac_service("S", DeploymentProfile::Production);
    let secret = HmacSecret::from("S");
    let policy = secret_fvey_policy();

    let signed = svc
        .sign_hmac_policy(&policy, &secret, HashAlgorithm::Sha512, "hub")
        .unwrap();
    assert_eq!(signed.signature().unwrap().algorithm, "sha512");
    assert!(svc.verify_auto(&signed).await.is_tamper_checked());

    // "hmac" is SHA-384
    let mut legacy = svc
        .sign_hmac_policy(&policy, &secret, HashAlgorithm::Sha384, "hub")
        .unwrap();
    if let Some(sig) = legacy.policy_signature.as_mut() {
        sig.algorithm = "hmac".into();
    }
    assert!(svc.verify_auto(&legacy).await.is_tamper_checked());
}

#[tokio::test]
async fn unsigned_policy_by_profile() {
    let dev = hmac_service("S", DeploymentProfile::Development);
    let result = dev.verify_auto(&secret_fvey_policy()).await;
    assert!(result.valid);
    assert_eq!(result.status, VerificationStatus::Unsigned);
    assert!(!result.is_tamper_checked());

    let prod = hmac_service("S", DeploymentProfile::Production);
    let result = prod.verify_auto(&secret_fvey_policy()).await;
    assert!(!result.valid);
    assert_eq!(result.failure, Some(FailureKind::NoSignature));
}

#[tokio::test]
async fn x509_signature_without_certificate_configured() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let clock = ManualClock::new(epoch());
    let signer = service(BindingConfig::default(), paths.clone(), &clock);
    let signed = signer.sign_with_default(&secret_fvey_policy()).await.unwrap();

    // Only an HMAC secret: X.509 signature cannot be checked
    let dev = service(BindingConfig::default().with_hmac_secret("S"), paths.clone(), &clock);
    let result = dev.verify_auto(&signed).await;
    assert!(result.valid);
    assert_eq!(result.status, VerificationStatus::Unverified);
    assert_eq!(result.warnings.len(), 1);

    let prod = service(
        BindingConfig::default()
            .with_hmac_secret("S")
            .with_profile(DeploymentProfile::Production),
        paths.clone(),
        &clock,
    );
    let result = prod.verify_auto(&signed).await;
    assert!(!result.valid);
    assert_eq!(result.failure, Some(FailureKind::Configuration));

    // With the certificate configured, verify_auto checks it (chain included)
    let configured = service(
        BindingConfig::default()
            .with_certificate_path(&paths.signing_cert)
            .with_profile(DeploymentProfile::Production),
        paths,
        &clock,
    );
    assert!(configured.verify_auto(&signed).await.is_tamper_checked());
}

#[tokio::test]
async fn missing_certificate_is_recovered_into_result() {
    let dir = tempfile::tempdir().unwrap();
    let paths = common::write_pki(dir.path()).await;
    let clock = ManualClock::new(epoch());
    let signed = service(BindingConfig::default(), paths.clone(), &clock)
        .sign_with_default(&secret_fvey_policy())
        .await
        .unwrap();

    let svc = service(
        BindingConfig::default().with_certificate_path(dir.path().join("absent.crt")),
        paths,
        &clock,
    );
    let result = svc.verify_auto(&signed).await;
    assert!(!result.valid);
    assert_eq!(result.failure, Some(FailureKind::CertificateUnavailable));
}

#[tokio::test]
async fn batch_preserves_input_order() {
    let svc = {
        let config = BindingConfig::default()
            .with_hmac_secret("S")
            .with_profile(DeploymentProfile::Production)
            .with_batch_concurrency(3);
        service(
            config,
            CertificatePaths::under("/nonexistent"),
            &ManualClock::new(epoch()),
        )
    };
    let secret = HmacSecret::from("S");

    let policies: Vec<Policy> = (0..20)
        .map(|i| {
            let mut p = svc
                .sign_hmac_policy(&secret_fvey_policy(), &secret, HashAlgorithm::Sha384, "hub")
                .unwrap();
            if i % 2 == 1 {
                p.security_label.caveats.push(format!("CAVEAT-{}", i));
            }
            p
        })
        .collect();

    let results = svc.verify_batch(policies).await;
    assert_eq!(results.len(), 20);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.valid, i % 2 == 0, "index {}", i);
    }

    assert!(svc.verify_batch(Vec::new()).await.is_empty());
}

/// Sign `doc` the way an independent producer would: HMAC-SHA384 straight
/// over the canonical bytes of the raw JSON, then embed the block.
fn externally_signed(mut doc: Value, secret: &str) -> Value {
    let mut mac = Hmac::<Sha384>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(&canonicalize_value(&doc).unwrap());
    let value = BASE64.encode(mac.finalize().into_bytes());
    doc["policySignature"] = json!({
        "algorithm": "sha384",
        "value": value,
        "signerId": "GBR-hub",
        "timestamp": "2026-01-01T00:00:00.000Z"
    });
    doc
}

fn external_documents() -> Vec<Value> {
    vec![
        json!({
            "policyVersion": "1.0",
            "securityLabel": {
                "classification": "SECRET",
                "originatingCountry": "GBR",
                "releasabilityTo": ["GBR", "USA"],
                "COI": ["FVEY"]
            },
            "policyAssertions": []
        }),
        json!({
            "policyVersion": "1.0",
            "securityLabel": {
                "classification": "CONFIDENTIAL",
                "originatingCountry": "GBR"
            }
        }),
        json!({
            "securityLabel": {
                "classification": "SECRET",
                "releasabilityTo": ["GBR"],
                "coiOperator": null,
                "originatingCountry": "GBR",
                "displayMarking": null
            },
            "policyVersion": "1.0",
            "uuid": "8b1e0f4c-2d7a-4f3b-9c61-5a0e7d2b4c18"
        }),
    ]
}

#[tokio::test]
async fn externally_signed_documents_verify() {
    let svc = hmac_service("S", DeploymentProfile::Production);
    let secret = HmacSecret::from("S");

    let mut policies = Vec::new();
    for doc in external_documents() {
        let signed = externally_signed(doc, "S");
        let policy: Policy = serde_json::from_value(signed.clone()).unwrap();
        assert_eq!(
            canonicalize(&policy).unwrap(),
            canonicalize_value(&signed).unwrap(),
            "{signed}"
        );

        let result = svc.verify_hmac(&policy, &secret);
        assert!(result.valid, "{signed}: {:?}", result.error);
        assert!(svc.verify_auto(&policy).await.is_tamper_checked());

        let mut downgraded = policy.clone();
        downgraded.security_label.classification = "UNCLASSIFIED".into();
        assert!(!svc.verify_hmac(&downgraded, &secret).valid);

        policies.push(policy);
    }

    let results = svc.verify_batch(policies).await;
    assert!(results.iter().all(|r| r.is_tamper_checked()));
}

#[test]
fn signed_here_verifies_after_transport() {
    let svc = hmac_service("S", DeploymentProfile::Production);
    let secret = HmacSecret::from("S");

    for doc in external_documents() {
        let policy: Policy = serde_json::from_value(doc).unwrap();
        let signed = svc
            .sign_hmac_policy(&policy, &secret, HashAlgorithm::Sha384, "USA-hub")
            .unwrap();

        let wire = serde_json::to_string(&signed).unwrap();
        let raw: Value = serde_json::from_str(&wire).unwrap();
        let received: Policy = serde_json::from_str(&wire).unwrap();

        assert!(svc.verify_hmac(&received, &secret).valid, "{wire}");
        assert_eq!(
            svc.sign_hmac(&received, &secret, HashAlgorithm::Sha384).unwrap(),
            {
                let mut mac = Hmac::<Sha384>::new_from_slice(b"S").unwrap();
                mac.update(&canonicalize_value(&raw).unwrap());
                BASE64.encode(mac.finalize().into_bytes())
            }
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_label_change_breaks_hmac(
        classification in "[A-Z]{1,12}",
        extra_country in "[A-Z]{3}",
    ) {
        let svc = hmac_service("S", DeploymentProfile::Production);
        let secret = HmacSecret::from("S");
        let signed = svc
            .sign_hmac_policy(&secret_fvey_policy(), &secret, HashAlgorithm::Sha384, "hub")
            .unwrap();

        let mut relabelled = signed.clone();
        relabelled.security_label.classification = classification.clone();
        let result = svc.verify_hmac(&relabelled, &secret);
        prop_assert_eq!(result.valid, classification == "SECRET");

        let mut widened = signed.clone();
        widened.security_label.releasability_to.push(extra_country);
        prop_assert!(!svc.verify_hmac(&widened, &secret).valid);
    }
}
