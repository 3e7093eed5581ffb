//! Policy documents and verification results.
//!
//! Field names follow the ZTDF JSON wire format (camelCase, `COI`). Scalar
//! label fields are kept as strings so a parsed document re-serializes to the
//! same bytes it was signed over.
//!
//! A [`Policy`] parsed from JSON keeps the document as received. Serializing
//! lays the typed values over that document: member order, explicit `null`s
//! and omitted arrays come back exactly as the signer wrote them.

use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::certificate::CertificateInfo;

/// Name of the embedded signature field, excluded from the canonical form.
pub const SIGNATURE_FIELD: &str = "policySignature";

/// A ZTDF policy object.
#[derive(Debug, Clone)]
pub struct Policy {
    pub policy_version: String,

    pub security_label: SecurityLabel,

    pub policy_assertions: Vec<Value>,

    pub policy_signature: Option<PolicySignature>,

    /// Fields this crate does not model. Still covered by the signature.
    pub extensions: Map<String, Value>,

    /// Document as received, when parsed from JSON.
    source: Option<Map<String, Value>>,
}

impl Policy {
    /// A policy built in code, with no assertions or signature.
    pub fn new(policy_version: impl Into<String>, security_label: SecurityLabel) -> Self {
        Self {
            policy_version: policy_version.into(),
            security_label,
            policy_assertions: Vec::new(),
            policy_signature: None,
            extensions: Map::new(),
            source: None,
        }
    }

    /// The embedded signature, if any.
    pub fn signature(&self) -> Option<&PolicySignature> {
        self.policy_signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.policy_signature.is_some()
    }

    /// Copy of this policy with `signature` embedded (replacing any existing one).
    pub fn with_signature(&self, signature: PolicySignature) -> Self {
        let mut policy = self.clone();
        policy.policy_signature = Some(signature);
        policy
    }

    /// Copy of this policy with the signature block removed.
    pub fn without_signature(&self) -> Self {
        let mut policy = self.clone();
        policy.policy_signature = None;
        policy
    }

    /// The JSON document this policy serializes to.
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_document(), other.to_document()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyFields {
    policy_version: String,
    security_label: SecurityLabel,
    #[serde(default)]
    policy_assertions: Vec<Value>,
    #[serde(default)]
    policy_signature: Option<PolicySignature>,
    #[serde(flatten)]
    extensions: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyView<'a> {
    policy_version: &'a str,
    security_label: &'a SecurityLabel,
    policy_assertions: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_signature: Option<&'a PolicySignature>,
    #[serde(flatten)]
    extensions: &'a Map<String, Value>,
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = Map::<String, Value>::deserialize(deserializer)?;
        let fields: PolicyFields =
            serde_json::from_value(Value::Object(source.clone())).map_err(de::Error::custom)?;
        Ok(Self {
            policy_version: fields.policy_version,
            security_label: fields.security_label,
            policy_assertions: fields.policy_assertions,
            policy_signature: fields.policy_signature,
            extensions: fields.extensions,
            source: Some(source),
        })
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let view = PolicyView {
            policy_version: &self.policy_version,
            security_label: &self.security_label,
            policy_assertions: &self.policy_assertions,
            policy_signature: self.policy_signature.as_ref(),
            extensions: &self.extensions,
        };
        let typed = serde_json::to_value(view).map_err(ser::Error::custom)?;
        match (&self.source, typed) {
            (Some(source), Value::Object(typed)) => overlay(source, &typed).serialize(serializer),
            (_, typed) => typed.serialize(serializer),
        }
    }
}

/// Merge `typed` into the layout of `source`.
///
/// Source members keep their position and take the typed value. A member
/// the typed view no longer emits survives only as an explicit `null`. Typed
/// members the source never had are appended, except empty arrays, which are
/// serde defaults rather than content.
fn overlay(source: &Map<String, Value>, typed: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Map::with_capacity(typed.len());
    for (key, original) in source {
        match (typed.get(key), original) {
            (Some(Value::Object(inner)), Value::Object(outer)) => {
                merged.insert(key.clone(), Value::Object(overlay(outer, inner)));
            }
            (Some(value), _) => {
                merged.insert(key.clone(), value.clone());
            }
            (None, Value::Null) => {
                merged.insert(key.clone(), Value::Null);
            }
            (None, _) => {}
        }
    }
    for (key, value) in typed {
        if source.contains_key(key) || matches!(value, Value::Array(items) if items.is_empty()) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Classification, releasability and COI markings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLabel {
    pub classification: String,

    #[serde(default)]
    pub releasability_to: Vec<String>,

    #[serde(rename = "COI", default)]
    pub coi: Vec<String>,

    /// `ALL` or `ANY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coi_operator: Option<String>,

    #[serde(default)]
    pub caveats: Vec<String>,

    pub originating_country: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_marking: Option<String>,

    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// The `policySignature` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySignature {
    /// `SHA384`, `SHA512`, `hmac`, `sha384`, `sha512` or `auto`.
    pub algorithm: String,

    /// Base64 signature bytes.
    pub value: String,

    /// Signer identity, e.g. the signing certificate subject.
    pub signer_id: String,

    /// ISO-8601 signing time.
    pub timestamp: String,
}

/// Which mechanism produced a verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    X509,
    Hmac,
    None,
}

/// Outcome category of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// Signature checked cryptographically and matched.
    Verified,
    /// Signature checked and rejected, or could not be checked.
    Failed,
    /// No signature present.
    Unsigned,
    /// Signature present but no verification mechanism was configured.
    Unverified,
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoSignature,
    MalformedSignature,
    UnsupportedAlgorithm,
    CertificateInvalid,
    CertificateExpired,
    CertificateUnavailable,
    ChainValidation,
    SignatureMismatch,
    Configuration,
    /// Input could not be read or is not a policy document.
    InvalidDocument,
}

/// Result of verifying one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureVerificationResult {
    pub valid: bool,

    pub status: VerificationStatus,

    pub signature_type: SignatureType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_info: Option<CertificateInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SignatureVerificationResult {
    pub fn verified(signature_type: SignatureType) -> Self {
        Self {
            valid: true,
            status: VerificationStatus::Verified,
            signature_type,
            error: None,
            failure: None,
            certificate_info: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(
        signature_type: SignatureType,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            status: VerificationStatus::Failed,
            signature_type,
            error: Some(error.into()),
            failure: Some(failure),
            certificate_info: None,
            warnings: Vec::new(),
        }
    }

    /// No signature block on the policy.
    pub fn unsigned(valid: bool) -> Self {
        Self {
            valid,
            status: VerificationStatus::Unsigned,
            signature_type: SignatureType::None,
            error: (!valid).then(|| "No signature present".to_string()),
            failure: (!valid).then_some(FailureKind::NoSignature),
            certificate_info: None,
            warnings: Vec::new(),
        }
    }

    /// Signature present but nothing was configured to check it.
    pub fn unverified(valid: bool, warning: impl Into<String>) -> Self {
        let warning = warning.into();
        Self {
            valid,
            status: VerificationStatus::Unverified,
            signature_type: SignatureType::None,
            error: (!valid).then(|| warning.clone()),
            failure: (!valid).then_some(FailureKind::Configuration),
            certificate_info: None,
            warnings: vec![warning],
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// True only when a signature was cryptographically checked and matched.
    ///
    /// Downstream authorization should key off this, not `valid`: `valid` is
    /// also true for unsigned or unverified policies outside production.
    pub fn is_tamper_checked(&self) -> bool {
        self.valid && self.status == VerificationStatus::Verified
    }
}
