//! `ztdf-bind pki init` - Write a development three-tier hierarchy.

use anyhow::{Context, Result};

use ztdf_binding::{CertificatePaths, DevHierarchy, DevPkiOptions};

use crate::cli::args::PkiInitArgs;
use crate::exit_codes::SUCCESS;

pub async fn cmd_init(args: PkiInitArgs) -> Result<i32> {
    let paths = CertificatePaths::under(&args.dir);

    if !args.force {
        if let Some((_, existing)) = paths.entries().into_iter().find(|(_, p)| p.exists()) {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            );
        }
    }

    let options = DevPkiOptions {
        key_bits: args.key_bits,
        ..DevPkiOptions::default()
    };
    // RSA generation takes seconds at 3072 bits
    let hierarchy = tokio::task::spawn_blocking(move || {
        DevHierarchy::generate(&options, chrono::Utc::now())
    })
    .await
    .context("key generation task failed")?
    .context("failed to generate development hierarchy")?;

    hierarchy
        .write_to(&paths)
        .await
        .context("failed to write development hierarchy")?;

    println!("Generated development PKI ({}-bit RSA):", args.key_bits);
    for (label, path) in paths.entries() {
        println!("  {:<20} {}", label, path.display());
    }
    println!();
    println!("Private keys are PKCS#8 PEM, mode 0600. Not for production use.");

    Ok(SUCCESS)
}
