use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ztdf_binding::devpki::DEFAULT_KEY_BITS;
use ztdf_binding::HashAlgorithm;

#[derive(Parser, Debug)]
#[command(
    name = "ztdf-bind",
    version,
    about = "Sign and verify ZTDF policy bindings against a three-tier PKI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show resolved certificate paths and node role
    Paths(PathsArgs),
    /// Trust chain operations
    Chain(ChainArgs),
    /// Certificate inspection
    Certs(CertsArgs),
    /// Policy signing and verification
    Policy(PolicyArgs),
    /// Development PKI management
    Pki(PkiArgs),
    Version,
}

#[derive(Args, Debug)]
pub struct PathsArgs {
    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ChainArgs {
    #[command(subcommand)]
    pub cmd: ChainSub,
}

#[derive(Subcommand, Debug)]
pub enum ChainSub {
    /// Load the root, intermediate and signing certificates and validate the chain
    Validate(ChainValidateArgs),
}

#[derive(Args, Debug)]
pub struct ChainValidateArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CertsArgs {
    #[command(subcommand)]
    pub cmd: CertsSub,
}

#[derive(Subcommand, Debug)]
pub enum CertsSub {
    /// Summarize each tier of the configured hierarchy
    List(CertsListArgs),
}

#[derive(Args, Debug)]
pub struct CertsListArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub cmd: PolicySub,
}

#[derive(Subcommand, Debug)]
pub enum PolicySub {
    /// Sign a policy document (JSON)
    Sign(PolicySignArgs),
    /// Verify one or more signed policy documents
    Verify(PolicyVerifyArgs),
}

#[derive(Args, Debug)]
pub struct PolicySignArgs {
    /// Policy file (JSON)
    pub file: PathBuf,

    /// Sign with HMAC using the secret held in this environment variable.
    /// Without it the system X.509 signing identity is used.
    #[arg(long, value_name = "VAR")]
    pub hmac_secret_env: Option<String>,

    /// Digest: SHA384 or SHA512 (default: POLICY_SIGNATURE_ALGORITHM)
    #[arg(long)]
    pub algorithm: Option<HashAlgorithm>,

    /// Signer id recorded in HMAC signatures (default: instance code)
    #[arg(long, requires = "hmac_secret_env")]
    pub signer_id: Option<String>,

    /// Output file (default: stdout)
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PolicyVerifyArgs {
    /// Signed policy files (JSON)
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PkiArgs {
    #[command(subcommand)]
    pub cmd: PkiSub,
}

#[derive(Subcommand, Debug)]
pub enum PkiSub {
    /// Generate a development root, intermediate and signing hierarchy
    Init(PkiInitArgs),
}

#[derive(Args, Debug)]
pub struct PkiInitArgs {
    /// Output directory (certificates under ca/ and signing/)
    #[arg(long, env = "PKI_DIR")]
    pub dir: PathBuf,

    /// RSA key size
    #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
    pub key_bits: usize,

    /// Force overwrite existing files
    #[arg(long, short)]
    pub force: bool,
}
