//! Private key loading.

use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

use crate::error::{PkiError, PkiResult};
use crate::source::PemSource;

/// Parse an RSA private key from PKCS#8 (`PRIVATE KEY`) or PKCS#1
/// (`RSA PRIVATE KEY`) PEM.
pub fn load_private_key_pem(pem: &str) -> PkiResult<RsaPrivateKey> {
    let pem = pem.trim();
    if pem.contains("ENCRYPTED PRIVATE KEY") {
        return Err(PkiError::KeyParse {
            reason: "encrypted private keys are not supported".to_string(),
        });
    }

    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|pkcs8_err| {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| PkiError::KeyParse {
                // Error texts only; never the key material
                reason: format!("not PKCS#8 ({}) or PKCS#1 ({})", pkcs8_err, pkcs1_err),
            })
        })
}

/// Read and parse the private key at `path`. The PEM text is zeroized after parsing.
pub async fn read_private_key(source: &dyn PemSource, path: &Path) -> PkiResult<RsaPrivateKey> {
    let pem = Zeroizing::new(
        source
            .read_pem(path)
            .await
            .map_err(|e| PkiError::key_read(path, e))?,
    );
    load_private_key_pem(&pem)
}
