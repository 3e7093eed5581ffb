pub mod certs;
pub mod chain;
pub mod paths;
pub mod pki;
pub mod policy;

use super::args::*;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    tracing::debug!(command = ?cli.cmd, "dispatching");
    match cli.cmd {
        Command::Paths(args) => paths::run(args),
        Command::Chain(args) => match args.cmd {
            ChainSub::Validate(validate_args) => chain::cmd_validate(validate_args).await,
        },
        Command::Certs(args) => match args.cmd {
            CertsSub::List(list_args) => certs::cmd_list(list_args).await,
        },
        Command::Policy(args) => match args.cmd {
            PolicySub::Sign(sign_args) => policy::cmd_sign(sign_args).await,
            PolicySub::Verify(verify_args) => policy::cmd_verify(verify_args).await,
        },
        Command::Pki(args) => match args.cmd {
            PkiSub::Init(init_args) => pki::cmd_init(init_args).await,
        },
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
