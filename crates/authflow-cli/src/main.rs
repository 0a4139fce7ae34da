mod cli;
mod commands;
mod completions;
mod config;
mod error;
mod output;

use anyhow::Result;
use authflow_core::paths;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        completions::generate_completions(shell);
        return;
    }

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _guard = match init_logging(cli.verbose) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: file logging disabled: {e}");
            None
        }
    };

    if let Err(err) = dispatch(cli).await {
        error::handle_error(err);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::run(args, config_path, cli.format).await,
        Commands::Rotate(args) => commands::rotate::run(args, config_path, cli.format).await,
        Commands::Accounts(args) => commands::accounts::run(args, config_path, cli.format).await,
        Commands::Probe(args) => commands::probe::run(args, config_path, cli.format).await,
        Commands::Config { command } => commands::config::run(command, config_path, cli.format),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Always log to a daily file; `--verbose` mirrors to stderr.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = paths::logs_dir()?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "authflow.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true);
    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(guard)
}
