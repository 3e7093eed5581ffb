//! Parsed X.509 certificates.
//!
//! Certificates are consumed as pre-issued PEM. Only RSA subject keys are
//! supported; certificate signatures may be `sha{256,384,512}WithRSAEncryption`.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Decode, Encode, EncodePem};
use x509_cert::ext::pkix::KeyUsage;
use x509_cert::time::Time;

use crate::error::{PkiError, PkiResult};
use crate::scheme::HashAlgorithm;

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// Origin label used when a certificate did not come from a file.
const INLINE_ORIGIN: &str = "<inline>";

/// X.509 key usage bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsageFlag {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    #[serde(rename = "cRLSign")]
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

/// Audit view of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub key_usage: Vec<KeyUsageFlag>,
    pub fingerprint_sha256: String,
}

/// Digest of an RSA PKCS#1 v1.5 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RsaDigest {
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashAlgorithm> for RsaDigest {
    fn from(h: HashAlgorithm) -> Self {
        match h {
            HashAlgorithm::Sha384 => Self::Sha384,
            HashAlgorithm::Sha512 => Self::Sha512,
        }
    }
}

/// Verify an RSA PKCS#1 v1.5 signature. Malformed signatures verify as false.
pub(crate) fn rsa_verify(key: &RsaPublicKey, digest: RsaDigest, msg: &[u8], sig: &[u8]) -> bool {
    let Ok(signature) = RsaSignature::try_from(sig) else {
        return false;
    };
    match digest {
        RsaDigest::Sha256 => RsaVerifyingKey::<Sha256>::new(key.clone())
            .verify(msg, &signature)
            .is_ok(),
        RsaDigest::Sha384 => RsaVerifyingKey::<Sha384>::new(key.clone())
            .verify(msg, &signature)
            .is_ok(),
        RsaDigest::Sha512 => RsaVerifyingKey::<Sha512>::new(key.clone())
            .verify(msg, &signature)
            .is_ok(),
    }
}

/// A parsed, immutable X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    inner: x509_cert::Certificate,
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial_number: String,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    key_usage: Option<Vec<KeyUsageFlag>>,
    public_key: RsaPublicKey,
    fingerprint: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial_number", &self.serial_number)
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Parse the first certificate of a PEM document.
    pub fn from_pem(pem: &str) -> PkiResult<Self> {
        Self::from_pem_at(pem, Path::new(INLINE_ORIGIN))
    }

    /// Parse PEM read from `origin`; `origin` is only used in error messages.
    pub fn from_pem_at(pem: &str, origin: &Path) -> PkiResult<Self> {
        let parse_err = |reason: String| PkiError::CertificateParse {
            path: origin.to_path_buf(),
            reason,
        };

        let mut chain = x509_cert::Certificate::load_pem_chain(pem.trim().as_bytes())
            .map_err(|e| parse_err(format!("invalid PEM/DER: {}", e)))?;
        if chain.is_empty() {
            return Err(parse_err("no CERTIFICATE block found".to_string()));
        }
        let inner = chain.swap_remove(0);
        Self::from_parsed(inner, origin)
    }

    /// Parse DER bytes.
    pub fn from_der(der: &[u8]) -> PkiResult<Self> {
        let inner = x509_cert::Certificate::from_der(der).map_err(|e| PkiError::CertificateParse {
            path: INLINE_ORIGIN.into(),
            reason: format!("invalid DER: {}", e),
        })?;
        Self::from_parsed(inner, Path::new(INLINE_ORIGIN))
    }

    fn from_parsed(inner: x509_cert::Certificate, origin: &Path) -> PkiResult<Self> {
        let parse_err = |reason: String| PkiError::CertificateParse {
            path: origin.to_path_buf(),
            reason,
        };
        let tbs = &inner.tbs_certificate;

        let der = inner
            .to_der()
            .map_err(|e| parse_err(format!("re-encoding failed: {}", e)))?;

        let valid_from = time_to_utc(tbs.validity.not_before).map_err(parse_err)?;
        let valid_to = time_to_utc(tbs.validity.not_after).map_err(parse_err)?;

        let spki_der = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| parse_err(format!("invalid subject public key info: {}", e)))?;
        let public_key =
            RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| PkiError::UnsupportedKey {
                reason: format!(
                    "subject key algorithm {} is not RSA: {}",
                    tbs.subject_public_key_info.algorithm.oid, e
                ),
            })?;

        let key_usage = parse_key_usage(&inner).map_err(parse_err)?;

        Ok(Self {
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial_number: format_serial(tbs.serial_number.as_bytes()),
            fingerprint: hex::encode(Sha256::digest(&der)),
            valid_from,
            valid_to,
            key_usage,
            public_key,
            der,
            inner,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Lowercase colon-separated hex.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_to(&self) -> DateTime<Utc> {
        self.valid_to
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Key usage bits; empty when the extension is absent.
    pub fn key_usage(&self) -> &[KeyUsageFlag] {
        self.key_usage.as_deref().unwrap_or(&[])
    }

    pub fn has_key_usage(&self, flag: KeyUsageFlag) -> bool {
        self.key_usage().contains(&flag)
    }

    /// Hex SHA-256 of the DER encoding.
    pub fn fingerprint_sha256(&self) -> &str {
        &self.fingerprint
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> PkiResult<String> {
        self.inner
            .to_pem(LineEnding::LF)
            .map_err(|e| PkiError::CertificateParse {
                path: INLINE_ORIGIN.into(),
                reason: format!("PEM encoding failed: {}", e),
            })
    }

    /// Strict validity check, no skew.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_to
    }

    pub fn info(&self) -> CertificateInfo {
        CertificateInfo {
            subject: self.subject.clone(),
            issuer: self.issuer.clone(),
            serial_number: self.serial_number.clone(),
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            key_usage: self.key_usage().to_vec(),
            fingerprint_sha256: self.fingerprint.clone(),
        }
    }

    /// Check that this certificate's signature was made with `issuer`'s key.
    ///
    /// This is a cryptographic check over the TBS bytes; names are not compared.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<(), String> {
        let oid = self.inner.signature_algorithm.oid;
        let digest = if oid == SHA256_WITH_RSA {
            RsaDigest::Sha256
        } else if oid == SHA384_WITH_RSA {
            RsaDigest::Sha384
        } else if oid == SHA512_WITH_RSA {
            RsaDigest::Sha512
        } else {
            return Err(format!("unsupported certificate signature algorithm {}", oid));
        };

        let tbs = self
            .inner
            .tbs_certificate
            .to_der()
            .map_err(|e| format!("cannot encode TBS certificate: {}", e))?;
        let signature = self
            .inner
            .signature
            .as_bytes()
            .ok_or_else(|| "signature bit string is not octet aligned".to_string())?;

        if rsa_verify(&issuer.public_key, digest, &tbs, signature) {
            Ok(())
        } else {
            Err(format!(
                "signature of '{}' does not verify under key of '{}'",
                self.subject, issuer.subject
            ))
        }
    }

    /// Self-signed: verifies under its own public key.
    pub fn verify_self_signed(&self) -> Result<(), String> {
        self.verify_issued_by(self)
    }
}

fn time_to_utc(time: Time) -> Result<DateTime<Utc>, String> {
    let secs = time.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or_else(|| format!("validity time out of range: {} seconds", secs))
}

fn format_serial(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_key_usage(cert: &x509_cert::Certificate) -> Result<Option<Vec<KeyUsageFlag>>, String> {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return Ok(None);
    };
    let Some(ext) = extensions.iter().find(|e| e.extn_id == KeyUsage::OID) else {
        return Ok(None);
    };

    let ku = KeyUsage::from_der(ext.extn_value.as_bytes())
        .map_err(|e| format!("invalid keyUsage extension: {}", e))?;

    let mut flags = Vec::new();
    let bits = [
        (ku.digital_signature(), KeyUsageFlag::DigitalSignature),
        (ku.non_repudiation(), KeyUsageFlag::NonRepudiation),
        (ku.key_encipherment(), KeyUsageFlag::KeyEncipherment),
        (ku.data_encipherment(), KeyUsageFlag::DataEncipherment),
        (ku.key_agreement(), KeyUsageFlag::KeyAgreement),
        (ku.key_cert_sign(), KeyUsageFlag::KeyCertSign),
        (ku.crl_sign(), KeyUsageFlag::CrlSign),
        (ku.encipher_only(), KeyUsageFlag::EncipherOnly),
        (ku.decipher_only(), KeyUsageFlag::DecipherOnly),
    ];
    for (set, flag) in bits {
        if set {
            flags.push(flag);
        }
    }
    Ok(Some(flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devpki::testkit;

    #[test]
    fn parses_dev_hierarchy() {
        let h = testkit::hierarchy();
        let root = Certificate::from_pem(&h.root.certificate_pem).unwrap();
        let signing = Certificate::from_pem(&h.signing.certificate_pem).unwrap();

        assert!(root.subject().contains("CN=DIVE V3 Root CA"));
        assert_eq!(root.subject(), root.issuer());
        assert!(signing.has_key_usage(KeyUsageFlag::DigitalSignature));
        assert!(root.has_key_usage(KeyUsageFlag::KeyCertSign));
        assert_eq!(root.fingerprint_sha256().len(), 64);
        assert!(root.valid_from() < root.valid_to());
    }

    #[test]
    fn chain_signatures_verify_cryptographically() {
        let h = testkit::hierarchy();
        let root = Certificate::from_pem(&h.root.certificate_pem).unwrap();
        let intermediate = Certificate::from_pem(&h.intermediate.certificate_pem).unwrap();
        let signing = Certificate::from_pem(&h.signing.certificate_pem).unwrap();

        root.verify_self_signed().unwrap();
        intermediate.verify_issued_by(&root).unwrap();
        signing.verify_issued_by(&intermediate).unwrap();

        // Skipping a tier fails even though all certs are genuine
        assert!(signing.verify_issued_by(&root).is_err());
        assert!(intermediate.verify_self_signed().is_err());
    }

    #[test]
    fn pem_roundtrip_keeps_fingerprint() {
        let h = testkit::hierarchy();
        let cert = Certificate::from_pem(&h.intermediate.certificate_pem).unwrap();
        let again = Certificate::from_pem(&cert.to_pem().unwrap()).unwrap();
        assert_eq!(cert.fingerprint_sha256(), again.fingerprint_sha256());
        assert_eq!(
            Certificate::from_der(cert.der()).unwrap().serial_number(),
            cert.serial_number()
        );
    }

    #[test]
    fn garbage_pem_is_parse_error() {
        let err = Certificate::from_pem("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----")
            .unwrap_err();
        assert!(matches!(err, PkiError::CertificateParse { .. }));

        let err = Certificate::from_pem("not a pem at all").unwrap_err();
        assert!(matches!(err, PkiError::CertificateParse { .. }));
    }

    #[test]
    fn serial_formatting() {
        assert_eq!(format_serial(&[0x01, 0xab, 0x0f]), "01:ab:0f");
    }
}
