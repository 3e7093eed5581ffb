//! Policy binding service.
//!
//! Signs policies and verifies embedded `policySignature` blocks. Every
//! verification entry point returns a [`SignatureVerificationResult`]; failures
//! never surface as errors. Only signing operations return [`PkiResult`].

use std::path::Path;
use std::sync::Arc;

use rsa::RsaPrivateKey;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::canonicalize::{canonical_digest, canonicalize};
use crate::certificate::{Certificate, KeyUsageFlag};
use crate::config::{BindingConfig, HmacSecret};
use crate::error::PkiResult;
use crate::scheme::{HashAlgorithm, SignatureScheme};
use crate::signing::{
    attach_signature, decode_signature_value, sign_hmac, sign_hmac_policy, sign_x509,
    verify_hmac_signature, verify_x509_signature,
};
use crate::trust::TrustChainStore;
use crate::types::{
    FailureKind, Policy, PolicySignature, SignatureType, SignatureVerificationResult,
};

/// Signs and verifies policy bindings. Clones share configuration and store.
#[derive(Debug, Clone)]
pub struct PolicyBindingService {
    inner: Arc<ServiceInner>,
}

#[derive(Debug)]
struct ServiceInner {
    config: BindingConfig,
    store: TrustChainStore,
}

impl PolicyBindingService {
    pub fn new(config: BindingConfig, store: TrustChainStore) -> Self {
        if !config.has_verification_mechanism() {
            if config.profile.is_production() {
                tracing::error!(
                    "no policy signature verification configured; signed policies will be rejected"
                );
            } else {
                tracing::warn!(
                    "no policy signature verification configured; signed policies will be accepted unverified"
                );
            }
        }
        Self {
            inner: Arc::new(ServiceInner { config, store }),
        }
    }

    /// Service and store configured from environment variables.
    pub fn from_env() -> Self {
        Self::new(BindingConfig::from_env(), TrustChainStore::from_env())
    }

    pub fn config(&self) -> &BindingConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &TrustChainStore {
        &self.inner.store
    }

    /// Canonical bytes of `policy`, excluding its signature.
    pub fn canonicalize(&self, policy: &Policy) -> PkiResult<Vec<u8>> {
        canonicalize(policy)
    }

    /// Base64 RSA signature over the canonical policy.
    pub fn sign_x509(
        &self,
        policy: &Policy,
        private_key: &RsaPrivateKey,
        hash: HashAlgorithm,
    ) -> PkiResult<String> {
        sign_x509(policy, private_key, hash)
    }

    /// Base64 HMAC over the canonical policy.
    pub fn sign_hmac(
        &self,
        policy: &Policy,
        secret: &HmacSecret,
        hash: HashAlgorithm,
    ) -> PkiResult<String> {
        sign_hmac(policy, secret, hash)
    }

    /// HMAC-sign and embed the signature block, timestamped by the store clock.
    pub fn sign_hmac_policy(
        &self,
        policy: &Policy,
        secret: &HmacSecret,
        hash: HashAlgorithm,
        signer_id: &str,
    ) -> PkiResult<Policy> {
        let signed = sign_hmac_policy(policy, secret, hash, signer_id, self.store().now())?;
        let digest = canonical_digest(policy)?;
        tracing::info!(
            algorithm = hash.hmac_name(),
            signer_id,
            digest = %digest,
            "policy signed (HMAC)"
        );
        Ok(signed)
    }

    /// Sign with the system identity: signing key and certificate from the store.
    pub async fn sign_with_default(&self, policy: &Policy) -> PkiResult<Policy> {
        let store = self.store();
        let certificate = store.load_certificate(&store.paths().signing_cert).await?;
        let hash = self.config().default_algorithm;

        let value = {
            let key = store.load_signing_key().await?;
            sign_x509(policy, &key, hash)?
        };

        let digest = canonical_digest(policy)?;
        tracing::info!(
            algorithm = hash.x509_name(),
            signer_id = %certificate.subject(),
            digest = %digest,
            "policy signed (X.509)"
        );
        Ok(attach_signature(
            policy,
            SignatureScheme::X509(hash),
            value,
            certificate.subject(),
            store.now(),
        ))
    }

    /// Verify against the system signing certificate, with chain validation.
    pub async fn verify_with_default(&self, policy: &Policy) -> SignatureVerificationResult {
        let (sig, hash, signature) = match self.x509_signature_parts(policy) {
            Ok(parts) => parts,
            Err(result) => return result,
        };
        let store = self.store();
        match store.load_certificate(&store.paths().signing_cert).await {
            Ok(cert) => {
                self.verify_x509_certificate(policy, sig, hash, &signature, &cert, true)
                    .await
            }
            Err(e) => failed_logged(
                SignatureType::X509,
                FailureKind::CertificateUnavailable,
                e.to_string(),
            ),
        }
    }

    /// Verify an X.509 signature against `certificate_pem`.
    pub async fn verify_x509(
        &self,
        policy: &Policy,
        certificate_pem: &str,
        verify_chain: bool,
    ) -> SignatureVerificationResult {
        let (sig, hash, signature) = match self.x509_signature_parts(policy) {
            Ok(parts) => parts,
            Err(result) => return result,
        };
        match Certificate::from_pem(certificate_pem) {
            Ok(cert) => {
                self.verify_x509_certificate(policy, sig, hash, &signature, &cert, verify_chain)
                    .await
            }
            Err(e) => failed_logged(
                SignatureType::X509,
                FailureKind::CertificateInvalid,
                format!("Invalid signing certificate: {}", e),
            ),
        }
    }

    /// Signature block, hash and decoded bytes of an X.509 signature.
    /// Runs before any certificate is parsed or loaded.
    fn x509_signature_parts<'p>(
        &self,
        policy: &'p Policy,
    ) -> Result<(&'p PolicySignature, HashAlgorithm, Vec<u8>), SignatureVerificationResult> {
        let Some(sig) = policy.signature() else {
            return Err(SignatureVerificationResult::unsigned(false));
        };

        let hash = match SignatureScheme::from_algorithm(&sig.algorithm) {
            Ok(SignatureScheme::X509(h)) => h,
            Ok(SignatureScheme::Auto) => self.config().default_algorithm,
            Ok(SignatureScheme::Hmac(_)) => {
                return Err(failed_logged(
                    SignatureType::X509,
                    FailureKind::UnsupportedAlgorithm,
                    format!("'{}' is not an X.509 signature algorithm", sig.algorithm),
                ))
            }
            Err(e) => {
                return Err(failed_logged(
                    SignatureType::X509,
                    FailureKind::UnsupportedAlgorithm,
                    e.to_string(),
                ))
            }
        };

        let signature = decode_signature_value(&sig.value).map_err(|reason| {
            failed_logged(SignatureType::X509, FailureKind::MalformedSignature, reason)
        })?;
        Ok((sig, hash, signature))
    }

    async fn verify_x509_certificate(
        &self,
        policy: &Policy,
        sig: &PolicySignature,
        hash: HashAlgorithm,
        signature: &[u8],
        cert: &Certificate,
        verify_chain: bool,
    ) -> SignatureVerificationResult {
        let now = self.store().now();
        if !cert.is_valid_at(now) {
            return failed_logged(
                SignatureType::X509,
                FailureKind::CertificateExpired,
                format!(
                    "Signing certificate is not valid at {} (valid from {} to {})",
                    now,
                    cert.valid_from(),
                    cert.valid_to()
                ),
            );
        }

        if verify_chain && !self.store().verify_certificate_chain_for(cert).await {
            return failed_logged(
                SignatureType::X509,
                FailureKind::ChainValidation,
                "Certificate chain validation failed",
            );
        }

        match verify_x509_signature(policy, cert.public_key(), hash, signature) {
            Ok(true) => {
                let mut result = SignatureVerificationResult::verified(SignatureType::X509);
                result.certificate_info = Some(cert.info());
                if !cert.has_key_usage(KeyUsageFlag::DigitalSignature) {
                    result = result.with_warning(
                        "Signing certificate does not assert digitalSignature key usage",
                    );
                }
                tracing::info!(
                    algorithm = hash.x509_name(),
                    signer_id = %sig.signer_id,
                    valid = true,
                    "policy signature verified (X.509)"
                );
                result
            }
            Ok(false) => failed_logged(
                SignatureType::X509,
                FailureKind::SignatureMismatch,
                "Signature verification failed",
            ),
            Err(e) => failed_logged(
                SignatureType::X509,
                FailureKind::MalformedSignature,
                e.to_string(),
            ),
        }
    }

    /// Verify an HMAC signature with `secret`.
    pub fn verify_hmac(&self, policy: &Policy, secret: &HmacSecret) -> SignatureVerificationResult {
        let Some(sig) = policy.signature() else {
            return SignatureVerificationResult::unsigned(false);
        };

        let hash = match SignatureScheme::from_algorithm(&sig.algorithm) {
            Ok(SignatureScheme::Hmac(h)) => h,
            // `auto` on the HMAC path means the legacy default
            Ok(SignatureScheme::Auto) => HashAlgorithm::Sha384,
            Ok(SignatureScheme::X509(_)) => {
                return failed_logged(
                    SignatureType::Hmac,
                    FailureKind::UnsupportedAlgorithm,
                    format!("'{}' is not an HMAC signature algorithm", sig.algorithm),
                )
            }
            Err(e) => {
                return failed_logged(
                    SignatureType::Hmac,
                    FailureKind::UnsupportedAlgorithm,
                    e.to_string(),
                )
            }
        };

        if secret.is_empty() {
            return failed_logged(
                SignatureType::Hmac,
                FailureKind::Configuration,
                "HMAC secret is empty",
            );
        }

        let signature = match decode_signature_value(&sig.value) {
            Ok(bytes) => bytes,
            Err(reason) => {
                return failed_logged(
                    SignatureType::Hmac,
                    FailureKind::MalformedSignature,
                    reason,
                )
            }
        };

        match verify_hmac_signature(policy, secret, hash, &signature) {
            Ok(true) => {
                tracing::info!(
                    algorithm = hash.hmac_name(),
                    signer_id = %sig.signer_id,
                    valid = true,
                    "policy signature verified (HMAC)"
                );
                SignatureVerificationResult::verified(SignatureType::Hmac)
            }
            Ok(false) => failed_logged(
                SignatureType::Hmac,
                FailureKind::SignatureMismatch,
                "HMAC signature mismatch",
            ),
            Err(e) => failed_logged(
                SignatureType::Hmac,
                FailureKind::MalformedSignature,
                e.to_string(),
            ),
        }
    }

    /// Verify with whatever mechanism the signature declares and the service has.
    pub async fn verify_auto(&self, policy: &Policy) -> SignatureVerificationResult {
        let config = self.config();
        let Some(sig) = policy.signature() else {
            return if config.profile.is_production() {
                tracing::warn!("unsigned policy rejected (production profile)");
                SignatureVerificationResult::unsigned(false)
            } else {
                SignatureVerificationResult::unsigned(true).with_warning("Policy is not signed")
            };
        };

        let scheme = match SignatureScheme::from_algorithm(&sig.algorithm) {
            Ok(s) => s,
            Err(e) => {
                return failed_logged(
                    SignatureType::None,
                    FailureKind::UnsupportedAlgorithm,
                    e.to_string(),
                )
            }
        };

        match scheme {
            SignatureScheme::X509(_) => match &config.certificate_path {
                Some(path) => self.verify_x509_at_path(policy, path).await,
                None => self.unconfigured(
                    "X.509 policy signature present but no verification certificate is configured",
                ),
            },
            SignatureScheme::Hmac(_) => match &config.hmac_secret {
                Some(secret) => self.verify_hmac(policy, secret),
                None => self.unconfigured(
                    "HMAC policy signature present but no HMAC secret is configured",
                ),
            },
            SignatureScheme::Auto => {
                if !config.has_verification_mechanism() {
                    return self.unconfigured(
                        "Policy signature present but no verification mechanism is configured",
                    );
                }
                if let Some(path) = &config.certificate_path {
                    let result = self.verify_x509_at_path(policy, path).await;
                    if result.valid || config.hmac_secret.is_none() {
                        return result;
                    }
                    tracing::debug!(
                        error = ?result.error,
                        "X.509 attempt failed for 'auto' signature, trying HMAC"
                    );
                }
                match &config.hmac_secret {
                    Some(secret) => self.verify_hmac(policy, secret),
                    None => self.unconfigured("No HMAC secret configured"),
                }
            }
        }
    }

    async fn verify_x509_at_path(&self, policy: &Policy, path: &Path) -> SignatureVerificationResult {
        let (sig, hash, signature) = match self.x509_signature_parts(policy) {
            Ok(parts) => parts,
            Err(result) => return result,
        };
        match self.store().load_certificate(path).await {
            Ok(cert) => {
                let verify_chain = self.config().verify_chain;
                self.verify_x509_certificate(policy, sig, hash, &signature, &cert, verify_chain)
                    .await
            }
            Err(e) => failed_logged(
                SignatureType::X509,
                FailureKind::CertificateUnavailable,
                e.to_string(),
            ),
        }
    }

    fn unconfigured(&self, message: &str) -> SignatureVerificationResult {
        if self.config().profile.is_production() {
            tracing::error!(reason = message, "policy signature cannot be verified");
            SignatureVerificationResult::unverified(false, message)
        } else {
            tracing::warn!(reason = message, "policy signature accepted unverified");
            SignatureVerificationResult::unverified(true, message)
        }
    }

    /// [`PolicyBindingService::verify_auto`] over many policies with bounded
    /// concurrency. Results are in input order.
    pub async fn verify_batch(&self, policies: Vec<Policy>) -> Vec<SignatureVerificationResult> {
        let total = policies.len();
        let sem = Arc::new(Semaphore::new(self.config().batch_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, policy) in policies.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&sem).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            join_set.spawn(async move {
                let _permit = permit;
                (index, this.verify_auto(&policy).await)
            });
        }

        let mut results: Vec<Option<SignatureVerificationResult>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "verification task failed"),
            }
        }

        let results: Vec<_> = results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    SignatureVerificationResult::failed(
                        SignatureType::None,
                        FailureKind::Configuration,
                        "Verification did not complete",
                    )
                })
            })
            .collect();

        let failed = results.iter().filter(|r| !r.valid).count();
        tracing::info!(total, failed, "batch verification complete");
        results
    }
}

fn failed_logged(
    signature_type: SignatureType,
    failure: FailureKind,
    error: impl Into<String>,
) -> SignatureVerificationResult {
    let result = SignatureVerificationResult::failed(signature_type, failure, error);
    tracing::warn!(
        signature_type = ?signature_type,
        failure = ?failure,
        error = result.error.as_deref().unwrap_or_default(),
        valid = false,
        "policy signature verification failed"
    );
    result
}
