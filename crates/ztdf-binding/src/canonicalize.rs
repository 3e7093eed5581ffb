//! Canonical policy bytes.
//!
//! The signed form of a policy is compact JSON with the `policySignature`
//! member removed and **top-level** keys sorted lexicographically. Nested
//! objects keep document order. A [`Policy`] parsed from JSON serializes in
//! the layout it was received in, so [`canonicalize`] and [`canonicalize_value`]
//! agree for the same document. Policies built in code use field declaration
//! order.

use serde_json::{Map, Value};
use sha2::{Digest, Sha384};

use crate::error::{PkiError, PkiResult};
use crate::types::{Policy, SIGNATURE_FIELD};

/// Canonical bytes of a typed policy.
pub fn canonicalize(policy: &Policy) -> PkiResult<Vec<u8>> {
    let value = serde_json::to_value(policy)?;
    canonicalize_value(&value)
}

/// Canonical bytes of a raw policy document.
pub fn canonicalize_value(policy: &Value) -> PkiResult<Vec<u8>> {
    let obj = policy.as_object().ok_or_else(|| PkiError::Canonicalize {
        reason: "policy must be a JSON object".to_string(),
    })?;

    let mut keys: Vec<&String> = obj.keys().filter(|k| *k != SIGNATURE_FIELD).collect();
    keys.sort();

    let mut sorted = Map::with_capacity(keys.len());
    for key in keys {
        sorted.insert(key.clone(), obj[key.as_str()].clone());
    }

    Ok(serde_json::to_vec(&Value::Object(sorted))?)
}

/// `sha384:<hex>` of the canonical bytes, for log and audit correlation.
pub fn canonical_digest(policy: &Policy) -> PkiResult<String> {
    let bytes = canonicalize(policy)?;
    Ok(format!("sha384:{}", hex::encode(Sha384::digest(&bytes))))
}
