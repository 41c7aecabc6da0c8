use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use postflow::app::AppContext;
use postflow::cli::{commands, Cli, Commands};
use postflow::config::Config;
use postflow::daemon::{self, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("postflow=info"));
    match &cli.command {
        Commands::Run { log: Some(path) } => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match cli.command {
        Commands::Stop => {
            daemon::stop_daemon().map_err(anyhow::Error::msg)?;
            println!("Scheduler stopped");
            return Ok(());
        }
        Commands::Status => {
            println!("{}", daemon::daemon_status());
            return Ok(());
        }
        _ => {}
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    let ctx = Arc::new(AppContext::new(config)?);

    match cli.command {
        Commands::Run { .. } => {
            Daemon::new(ctx.clone()).run().await?;
        }
        Commands::Operator(command) => {
            commands::run_once(&ctx, command).await?;
        }
        Commands::Stop | Commands::Status => {}
    }

    Ok(())
}
