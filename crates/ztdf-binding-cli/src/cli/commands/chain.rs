//! `ztdf-bind chain validate` - Validate the configured trust chain.

use anyhow::Result;
use serde_json::json;

use ztdf_binding::TrustChainStore;

use crate::cli::args::ChainValidateArgs;
use crate::exit_codes::{CHAIN_INVALID, CONFIG_ERROR, SUCCESS};

pub async fn cmd_validate(args: ChainValidateArgs) -> Result<i32> {
    let store = TrustChainStore::from_env();

    let result = match store.validate_three_tier_chain().await {
        Ok(result) => result,
        Err(e) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "valid": false,
                        "errors": [e.to_string()],
                        "warnings": [],
                    }))?
                );
            } else {
                eprintln!("error: {e}");
            }
            return Ok(CONFIG_ERROR);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Trust chain ({}): {}",
            store.paths().role,
            if result.valid { "VALID" } else { "INVALID" }
        );
        for error in &result.errors {
            println!("  error:   {error}");
        }
        for warning in &result.warnings {
            println!("  warning: {warning}");
        }
    }

    Ok(if result.valid { SUCCESS } else { CHAIN_INVALID })
}
