//! Development three-tier hierarchy.
//!
//! Issues real X.509 certificates (root CA, intermediate CA with path length
//! 0, and a `digitalSignature`/`nonRepudiation` signing leaf) for local
//! deployments and tests. Production hierarchies are issued by an external PKI.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use rand::RngCore;
use rsa::pkcs8::{EncodePrivateKey, LineEnding as KeyLineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha384;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};
use zeroize::Zeroizing;

use crate::error::{PkiError, PkiResult};
use crate::paths::CertificatePaths;

/// Key size used when none is requested.
pub const DEFAULT_KEY_BITS: usize = 3072;

/// Which tier a certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    Root,
    Intermediate,
    Signing,
}

/// Parameters of one issued certificate.
#[derive(Debug, Clone)]
pub struct CertificateRequest<'a> {
    pub kind: CertificateKind,
    /// RFC 4514 subject, e.g. `CN=Policy Signer,O=DIVE V3,C=US`.
    pub subject: &'a str,
    /// Issuer DN. Ignored for [`CertificateKind::Root`].
    pub issuer: &'a str,
    pub subject_key: &'a RsaPublicKey,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Certificate and private key of one tier.
pub struct IssuedIdentity {
    pub subject: String,
    pub certificate_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("subject", &self.subject)
            .field("private_key_pem", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Options for [`DevHierarchy::generate`].
#[derive(Debug, Clone)]
pub struct DevPkiOptions {
    pub organization: String,
    /// Two-letter country for the `C=` attribute.
    pub country: String,
    pub key_bits: usize,
    pub root_validity_days: i64,
    pub intermediate_validity_days: i64,
    pub signing_validity_days: i64,
}

impl Default for DevPkiOptions {
    fn default() -> Self {
        Self {
            organization: "DIVE V3".to_string(),
            country: "US".to_string(),
            key_bits: DEFAULT_KEY_BITS,
            root_validity_days: 3650,
            intermediate_validity_days: 1825,
            signing_validity_days: 365,
        }
    }
}

impl DevPkiOptions {
    fn dn(&self, common_name: &str) -> String {
        format!(
            "CN={},O={},C={}",
            common_name, self.organization, self.country
        )
    }
}

/// Root, intermediate and signing identities.
#[derive(Debug)]
pub struct DevHierarchy {
    pub root: IssuedIdentity,
    pub intermediate: IssuedIdentity,
    pub signing: IssuedIdentity,
}

impl DevHierarchy {
    /// Generate fresh keys and issue all three tiers, valid from `now`.
    pub fn generate(options: &DevPkiOptions, now: DateTime<Utc>) -> PkiResult<Self> {
        // Backdate slightly so a freshly written hierarchy is valid on hosts
        // whose clocks lag this one.
        let not_before = now - Duration::minutes(1);

        let root_key = generate_key(options.key_bits)?;
        let intermediate_key = generate_key(options.key_bits)?;
        let signing_key = generate_key(options.key_bits)?;

        let root_dn = options.dn(&format!("{} Root CA", options.organization));
        let intermediate_dn = options.dn(&format!("{} Intermediate CA", options.organization));
        let signing_dn = options.dn(&format!("{} Policy Signer", options.organization));

        let root_pem = issue_certificate(
            &CertificateRequest {
                kind: CertificateKind::Root,
                subject: &root_dn,
                issuer: &root_dn,
                subject_key: &root_key.to_public_key(),
                not_before,
                not_after: now + Duration::days(options.root_validity_days),
            },
            &root_key,
        )?;
        let intermediate_pem = issue_certificate(
            &CertificateRequest {
                kind: CertificateKind::Intermediate,
                subject: &intermediate_dn,
                issuer: &root_dn,
                subject_key: &intermediate_key.to_public_key(),
                not_before,
                not_after: now + Duration::days(options.intermediate_validity_days),
            },
            &root_key,
        )?;
        let signing_pem = issue_certificate(
            &CertificateRequest {
                kind: CertificateKind::Signing,
                subject: &signing_dn,
                issuer: &intermediate_dn,
                subject_key: &signing_key.to_public_key(),
                not_before,
                not_after: now + Duration::days(options.signing_validity_days),
            },
            &intermediate_key,
        )?;

        tracing::info!(
            organization = %options.organization,
            key_bits = options.key_bits,
            "generated development PKI hierarchy"
        );

        Ok(Self {
            root: IssuedIdentity {
                subject: root_dn,
                certificate_pem: root_pem,
                private_key_pem: encode_private_key(&root_key)?,
            },
            intermediate: IssuedIdentity {
                subject: intermediate_dn,
                certificate_pem: intermediate_pem,
                private_key_pem: encode_private_key(&intermediate_key)?,
            },
            signing: IssuedIdentity {
                subject: signing_dn,
                certificate_pem: signing_pem,
                private_key_pem: encode_private_key(&signing_key)?,
            },
        })
    }

    /// Bundle ordered signing, intermediate, root.
    pub fn chain_pem(&self) -> String {
        let mut bundle = String::new();
        for pem in [
            &self.signing.certificate_pem,
            &self.intermediate.certificate_pem,
            &self.root.certificate_pem,
        ] {
            bundle.push_str(pem.trim_end());
            bundle.push('\n');
        }
        bundle
    }

    /// Write certificates, keys (PKCS#8, mode 0600 on unix) and the chain bundle.
    pub async fn write_to(&self, paths: &CertificatePaths) -> PkiResult<()> {
        write_file(&paths.root_cert, self.root.certificate_pem.as_bytes()).await?;
        write_key(&paths.root_key, &self.root.private_key_pem).await?;
        write_file(
            &paths.intermediate_cert,
            self.intermediate.certificate_pem.as_bytes(),
        )
        .await?;
        write_key(&paths.intermediate_key, &self.intermediate.private_key_pem).await?;
        write_file(&paths.signing_cert, self.signing.certificate_pem.as_bytes()).await?;
        write_key(&paths.signing_key, &self.signing.private_key_pem).await?;
        write_file(&paths.chain, self.chain_pem().as_bytes()).await?;

        tracing::info!(root = %paths.root_cert.display(), "wrote development PKI hierarchy");
        Ok(())
    }
}

/// Generate an RSA private key.
pub fn generate_key(bits: usize) -> PkiResult<RsaPrivateKey> {
    if bits < 2048 {
        return Err(PkiError::Config {
            message: format!("RSA key size {} is below the 2048-bit minimum", bits),
        });
    }
    RsaPrivateKey::new(&mut rand::thread_rng(), bits).map_err(|e| PkiError::Issuance {
        reason: format!("RSA key generation failed: {}", e),
    })
}

/// Issue one certificate signed (SHA-384, PKCS#1 v1.5) by `issuer_key`. Returns PEM.
pub fn issue_certificate(
    request: &CertificateRequest<'_>,
    issuer_key: &RsaPrivateKey,
) -> PkiResult<String> {
    let subject = parse_name(request.subject)?;
    let profile = match request.kind {
        CertificateKind::Root => Profile::Root,
        CertificateKind::Intermediate => Profile::SubCA {
            issuer: parse_name(request.issuer)?,
            path_len_constraint: Some(0),
        },
        CertificateKind::Signing => Profile::Leaf {
            issuer: parse_name(request.issuer)?,
            enable_key_agreement: false,
            enable_key_encipherment: false,
        },
    };

    let validity = Validity {
        not_before: to_x509_time(request.not_before)?,
        not_after: to_x509_time(request.not_after)?,
    };
    let spki = SubjectPublicKeyInfoOwned::from_key(request.subject_key.clone())
        .map_err(|e| issuance(format!("cannot encode subject key: {}", e)))?;
    let signer = rsa::pkcs1v15::SigningKey::<Sha384>::new(issuer_key.clone());

    let builder = CertificateBuilder::new(
        profile,
        random_serial()?,
        validity,
        subject,
        spki,
        &signer,
    )
    .map_err(|e| issuance(format!("builder rejected '{}': {}", request.subject, e)))?;
    let certificate = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| issuance(format!("signing '{}' failed: {}", request.subject, e)))?;

    certificate
        .to_pem(LineEnding::LF)
        .map_err(|e| issuance(format!("PEM encoding failed: {}", e)))
}

fn issuance(reason: String) -> PkiError {
    PkiError::Issuance { reason }
}

fn parse_name(dn: &str) -> PkiResult<Name> {
    Name::from_str(dn).map_err(|e| issuance(format!("invalid distinguished name '{}': {}", dn, e)))
}

/// 128-bit positive serial with a non-zero leading byte.
fn random_serial() -> PkiResult<SerialNumber> {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    SerialNumber::new(&bytes).map_err(|e| issuance(format!("invalid serial number: {}", e)))
}

/// UTCTime through 2049, GeneralizedTime after (RFC 5280 §4.1.2.5).
fn to_x509_time(at: DateTime<Utc>) -> PkiResult<Time> {
    let secs = u64::try_from(at.timestamp())
        .map_err(|_| issuance(format!("validity time {} precedes the epoch", at)))?;
    let since_epoch = StdDuration::from_secs(secs);
    let time = if at.year() < 2050 {
        UtcTime::from_unix_duration(since_epoch).map(Time::UtcTime)
    } else {
        GeneralizedTime::from_unix_duration(since_epoch).map(Time::GeneralTime)
    };
    time.map_err(|e| issuance(format!("invalid validity time {}: {}", at, e)))
}

fn encode_private_key(key: &RsaPrivateKey) -> PkiResult<Zeroizing<String>> {
    key.to_pkcs8_pem(KeyLineEnding::LF)
        .map_err(|e| issuance(format!("cannot encode private key: {}", e)))
}

async fn write_file(path: &Path, contents: &[u8]) -> PkiResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PkiError::Io {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?;
        }
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PkiError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

async fn write_key(path: &Path, pem: &Zeroizing<String>) -> PkiResult<()> {
    write_file(path, pem.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| PkiError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}
