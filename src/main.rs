use std::error::Error;

use clap::Parser;
use log::warn;
use tokio_util::sync::CancellationToken;

use gitsource::cli::{
    args::{CliArgs, Command},
    command_handlers::{build_source, do_parse, do_resolve},
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();
    let source = build_source(&cli_args)?;

    match cli_args.cmd {
        Command::Parse { specifier } => {
            print!("{}", do_parse(&source, &specifier)?);
            Ok(())
        }
        Command::Resolve { specifiers } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling pending resolutions");
                    on_interrupt.cancel();
                }
            });

            let (report, failures) = do_resolve(&source, &specifiers, &cancel).await?;
            print!("{}", report);
            if failures > 0 {
                return Err(format!("{failures} specifier(s) could not be resolved").into());
            }
            Ok(())
        }
    }
}
