//! # Roster Server
//!
//! Runs the sync engine workers and exposes the trigger surface.
//!
//! ## Architecture
//!
//! - PostgreSQL for durable run state (in memory without `DATABASE_URL`)
//! - Redis for the aggregate cache, the distributed locks and progress
//!   pub/sub (in memory without `REDIS_URL`)
//! - A file-backed connector reading `{roster_dir}/{tenant}.json`

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roster_server::{
    infra::{
        config::{Config, ConfigLoad, ConfigLoader},
        startup::{Backends, assemble},
    },
    routes,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "roster-server")]
#[command(about = "Batched roster synchronization with progress streaming")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a roster.toml (overrides ROSTER_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Alternative .env file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply run store migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::Db(DbCommand::Migrate)) => run_db_migrate(&config).await,
        None => run_server(config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
                |_| "info,roster_core=info,tower_http=warn".into(),
            ),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let pipeline = &config.pipeline;
    info!(
        batch.size = pipeline.batch.batch_size,
        retry.max_attempts = pipeline.retry.max_attempts,
        workers.sync = pipeline.workers.sync_workers,
        workers.aggregate = pipeline.workers.aggregate_workers,
        watchdog.stall_threshold_secs = pipeline.watchdog.stall_threshold_secs,
        "pipeline configuration in effect"
    );

    Ok(config)
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    if config.database.url.is_none() {
        anyhow::bail!("DATABASE_URL must be set to run migrations");
    }
    Backends::connect(config).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let backends = Backends::connect(&config).await?;
    let state = assemble(Arc::clone(&config), backends);
    let engine = Arc::clone(&state.engine);

    engine.start().await;

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("roster server listening on http://{addr}");

    let app = routes::create_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped; draining workers");
    engine.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve_flags_and_migrate() {
        let cli = Cli::try_parse_from([
            "roster-server",
            "--config",
            "deploy/roster.toml",
            "--port",
            "8088",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(8088));
        assert_eq!(
            cli.serve.config.as_deref(),
            Some(std::path::Path::new("deploy/roster.toml"))
        );

        let cli = Cli::try_parse_from(["roster-server", "db", "migrate"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Db(DbCommand::Migrate))));
    }
}
