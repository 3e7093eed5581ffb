//! `ztdf-bind policy sign|verify` - Bind and check policy signatures.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use ztdf_binding::{
    BindingConfig, FailureKind, HmacSecret, Policy, PolicyBindingService, SignatureType,
    SignatureVerificationResult, TrustChainStore, VerificationStatus,
};

use crate::cli::args::{PolicySignArgs, PolicyVerifyArgs};
use crate::exit_codes::{SUCCESS, VERIFICATION_FAILED};

fn read_policy(path: &Path) -> Result<Policy> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse policy JSON: {}", path.display()))
}

pub async fn cmd_sign(args: PolicySignArgs) -> Result<i32> {
    let policy = read_policy(&args.file)?;

    let mut config = BindingConfig::from_env();
    if let Some(algorithm) = args.algorithm {
        config = config.with_default_algorithm(algorithm);
    }
    let algorithm = config.default_algorithm;
    let service = PolicyBindingService::new(config, TrustChainStore::from_env());

    let signed = match &args.hmac_secret_env {
        Some(var) => {
            let secret = HmacSecret::from(
                std::env::var(var)
                    .with_context(|| format!("HMAC secret variable {var} is not set"))?,
            );
            let pki = service.store().config();
            let signer_id = args.signer_id.clone().unwrap_or_else(|| {
                pki.instance_code
                    .clone()
                    .unwrap_or_else(|| pki.hub_instance_code.clone())
            });
            service
                .sign_hmac_policy(&policy, &secret, algorithm, &signer_id)
                .context("HMAC signing failed")?
        }
        None => service
            .sign_with_default(&policy)
            .await
            .context("X.509 signing failed")?,
    };

    let output = serde_json::to_string_pretty(&signed)?;
    match &args.out {
        Some(out) => {
            std::fs::write(out, format!("{output}\n"))
                .with_context(|| format!("failed to write signed policy: {}", out.display()))?;
            eprintln!("Signed policy written to {}", out.display());
        }
        None => println!("{output}"),
    }
    Ok(SUCCESS)
}

pub async fn cmd_verify(args: PolicyVerifyArgs) -> Result<i32> {
    // Unreadable files keep their slot as a failed result
    let mut slots = Vec::with_capacity(args.files.len());
    let mut policies = Vec::new();
    for path in &args.files {
        match read_policy(path) {
            Ok(policy) => {
                policies.push(policy);
                slots.push(None);
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(file = %path.display(), error = %reason, "policy rejected");
                slots.push(Some(SignatureVerificationResult::failed(
                    SignatureType::None,
                    FailureKind::InvalidDocument,
                    reason,
                )));
            }
        }
    }

    let service = PolicyBindingService::from_env();
    let mut verified = service.verify_batch(policies).await.into_iter();
    let results: Vec<SignatureVerificationResult> = slots
        .into_iter()
        .map(|slot| {
            slot.or_else(|| verified.next()).unwrap_or_else(|| {
                SignatureVerificationResult::failed(
                    SignatureType::None,
                    FailureKind::InvalidDocument,
                    "no verification result",
                )
            })
        })
        .collect();
    let all_valid = results.iter().all(|r| r.valid);

    if args.json {
        let report: Vec<_> = args
            .files
            .iter()
            .zip(&results)
            .map(|(path, result)| json!({ "file": path, "result": result }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (path, result) in args.files.iter().zip(&results) {
            let verdict = match (result.valid, result.status) {
                (true, VerificationStatus::Verified) => "OK",
                (true, _) => "ACCEPTED (not verified)",
                (false, _) => "FAILED",
            };
            println!("{}: {} [{:?}]", path.display(), verdict, result.signature_type);
            if let Some(error) = &result.error {
                println!("  error:   {error}");
            }
            for warning in &result.warnings {
                println!("  warning: {warning}");
            }
        }
    }

    Ok(if all_valid { SUCCESS } else { VERIFICATION_FAILED })
}
