//! CLI entry point for chunkdl.

use anyhow::{Context, Result};
use chunkdl::{Database, DownloadEngine, EngineConfig, Store};
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;
mod output;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    let db = Database::new(&args.db)
        .await
        .with_context(|| format!("failed to open database {}", args.db.display()))?;
    let engine = DownloadEngine::from_config(Store::new(db), &config)?;
    if args.command.runs_downloads() {
        engine.recover_interrupted().await?;
    }

    match &args.command {
        Command::Add(add) => commands::run_add_command(&engine, add).await,
        Command::Get { id } => commands::run_get_command(&engine, *id, args.quiet).await,
        Command::Resume { id, .. } => {
            commands::run_resume_command(&engine, *id, args.quiet).await
        }
        Command::Restart { id } => {
            commands::run_restart_command(&engine, *id, args.quiet).await
        }
        Command::List { all, status } => {
            commands::run_list_command(&engine, *all, *status).await
        }
        Command::Remove { id } => commands::run_remove_command(&engine, *id).await,
        Command::Verify { id, fix, .. } => {
            commands::run_verify_command(&engine, *id, *fix, args.quiet).await
        }
    }
}

/// Priority: `RUST_LOG` > quiet flag > verbose flag > default (info).
fn init_tracing(args: &Args) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads `--config` or the default file, then applies flag overrides.
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let (config, path) = EngineConfig::load_default()?;
            if let Some(path) = path {
                debug!(path = %path.display(), "using config file");
            }
            config
        }
    };

    if let Some(concurrency) = args.concurrency {
        config.max_concurrent = usize::from(concurrency);
    }
    config.validate()?;
    Ok(config)
}
