mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use velink_core::{BackendConnection, Session};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "velink", &mut std::io::stdout());
            Ok(())
        }

        // Everything else needs a running session
        cmd => {
            let (source, session_config) = config::resolve(&cli.source, &cli.global)?;

            let backend = Arc::new(BackendConnection::new());
            backend.configure(source)?;
            let (session, handle) = Session::new(Arc::clone(&backend), session_config)?;
            let task = tokio::spawn(session.run());

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &handle, &cli.global).await;

            handle.shutdown();
            let stopped = task.await.map_err(|e| CliError::Session {
                message: e.to_string(),
            })?;
            result?;
            stopped.map_err(CliError::from)
        }
    }
}
