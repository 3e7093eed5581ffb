//! Signature primitives over canonical policy bytes.
//!
//! X.509 signatures are RSA PKCS#1 v1.5 with SHA-384 or SHA-512. HMAC
//! signatures are keyed with a shared secret and compared in constant time.
//! Everything here is synchronous and free of I/O; orchestration lives in
//! [`crate::binding`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha384, Sha512};

use crate::canonicalize::canonicalize;
use crate::certificate::{rsa_verify, RsaDigest};
use crate::config::HmacSecret;
use crate::error::{PkiError, PkiResult};
use crate::scheme::{HashAlgorithm, SignatureScheme};
use crate::types::{Policy, PolicySignature};

/// RSA PKCS#1 v1.5 signature over the canonical policy, base64 encoded.
pub fn sign_x509(
    policy: &Policy,
    private_key: &RsaPrivateKey,
    hash: HashAlgorithm,
) -> PkiResult<String> {
    let canonical = canonicalize(policy)?;
    let signature = match hash {
        HashAlgorithm::Sha384 => RsaSigningKey::<Sha384>::new(private_key.clone())
            .try_sign(&canonical)
            .map(|s| s.to_vec()),
        HashAlgorithm::Sha512 => RsaSigningKey::<Sha512>::new(private_key.clone())
            .try_sign(&canonical)
            .map(|s| s.to_vec()),
    }
    .map_err(|e| PkiError::Signing {
        reason: format!("RSA signing failed: {}", e),
    })?;
    Ok(BASE64.encode(signature))
}

/// Check an RSA signature over the canonical policy. Only canonicalization can error.
pub fn verify_x509_signature(
    policy: &Policy,
    public_key: &RsaPublicKey,
    hash: HashAlgorithm,
    signature: &[u8],
) -> PkiResult<bool> {
    let canonical = canonicalize(policy)?;
    Ok(rsa_verify(
        public_key,
        RsaDigest::from(hash),
        &canonical,
        signature,
    ))
}

/// HMAC over the canonical policy, base64 encoded. Deterministic.
pub fn sign_hmac(policy: &Policy, secret: &HmacSecret, hash: HashAlgorithm) -> PkiResult<String> {
    if secret.is_empty() {
        return Err(PkiError::Config {
            message: "HMAC secret is empty".to_string(),
        });
    }
    let canonical = canonicalize(policy)?;
    let tag = match hash {
        HashAlgorithm::Sha384 => {
            let mut mac = new_mac::<Hmac<Sha384>>(secret)?;
            mac.update(&canonical);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac = new_mac::<Hmac<Sha512>>(secret)?;
            mac.update(&canonical);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(BASE64.encode(tag))
}

/// Recompute the HMAC and compare in constant time.
pub fn verify_hmac_signature(
    policy: &Policy,
    secret: &HmacSecret,
    hash: HashAlgorithm,
    signature: &[u8],
) -> PkiResult<bool> {
    let canonical = canonicalize(policy)?;
    let matches = match hash {
        HashAlgorithm::Sha384 => {
            let mut mac = new_mac::<Hmac<Sha384>>(secret)?;
            mac.update(&canonical);
            mac.verify_slice(signature).is_ok()
        }
        HashAlgorithm::Sha512 => {
            let mut mac = new_mac::<Hmac<Sha512>>(secret)?;
            mac.update(&canonical);
            mac.verify_slice(signature).is_ok()
        }
    };
    Ok(matches)
}

fn new_mac<M: Mac + hmac::digest::KeyInit>(secret: &HmacSecret) -> PkiResult<M> {
    <M as Mac>::new_from_slice(secret.as_bytes()).map_err(|e| PkiError::Signing {
        reason: format!("invalid HMAC key: {}", e),
    })
}

/// Decode the base64 `value` of a signature block.
pub fn decode_signature_value(value: &str) -> Result<Vec<u8>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("signature value is empty".to_string());
    }
    let bytes = BASE64
        .decode(value)
        .map_err(|e| format!("invalid base64 signature: {}", e))?;
    if bytes.is_empty() {
        return Err("signature value is empty".to_string());
    }
    Ok(bytes)
}

/// Copy of `policy` carrying a new signature block.
pub fn attach_signature(
    policy: &Policy,
    scheme: SignatureScheme,
    value: String,
    signer_id: impl Into<String>,
    signed_at: DateTime<Utc>,
) -> Policy {
    policy.with_signature(PolicySignature {
        algorithm: scheme.algorithm_name().to_string(),
        value,
        signer_id: signer_id.into(),
        timestamp: format_timestamp(signed_at),
    })
}

/// HMAC-sign `policy` and embed the signature block.
pub fn sign_hmac_policy(
    policy: &Policy,
    secret: &HmacSecret,
    hash: HashAlgorithm,
    signer_id: impl Into<String>,
    signed_at: DateTime<Utc>,
) -> PkiResult<Policy> {
    let value = sign_hmac(policy, secret, hash)?;
    Ok(attach_signature(
        policy,
        SignatureScheme::Hmac(hash),
        value,
        signer_id,
        signed_at,
    ))
}

/// ISO-8601 with millisecond precision and `Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
