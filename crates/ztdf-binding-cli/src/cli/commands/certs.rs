//! `ztdf-bind certs list` - Per-tier certificate summaries.

use anyhow::Result;

use ztdf_binding::TrustChainStore;

use crate::cli::args::CertsListArgs;
use crate::exit_codes::SUCCESS;

pub async fn cmd_list(args: CertsListArgs) -> Result<i32> {
    let store = TrustChainStore::from_env();
    let summaries = store.list_certificates().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(SUCCESS);
    }

    for summary in &summaries {
        println!("{} ({})", summary.tier, summary.path.display());
        if let Some(error) = &summary.error {
            println!("  error: {error}");
            continue;
        }
        if let Some(subject) = &summary.subject {
            println!("  subject: {subject}");
        }
        if let Some(issuer) = &summary.issuer {
            println!("  issuer:  {issuer}");
        }
        if let Some(serial) = &summary.serial_number {
            println!("  serial:  {serial}");
        }
        if let (Some(from), Some(to)) = (summary.valid_from, summary.valid_to) {
            println!("  valid:   {} .. {}", from.to_rfc3339(), to.to_rfc3339());
        }
        if let Some(days) = summary.days_remaining {
            println!("  expires in {days} days");
        }
    }
    Ok(SUCCESS)
}
