//! `ztdf-bind paths` - Show where the hierarchy is expected on this node.

use anyhow::Result;

use ztdf_binding::{resolve_certificate_paths, PkiConfig};

use crate::cli::args::PathsArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: PathsArgs) -> Result<i32> {
    let config = PkiConfig::from_env();
    let paths = resolve_certificate_paths(&config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&paths)?);
        return Ok(SUCCESS);
    }

    println!("Role: {}", paths.role);
    println!("Base: {}", paths.base_dir.display());
    for (label, path) in paths.entries() {
        let marker = if path.exists() { "" } else { "  (missing)" };
        println!("  {:<20} {}{}", label, path.display(), marker);
    }
    Ok(SUCCESS)
}
