//! tokenscope-server binary: serve the HTTP API or run a cleanup batch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokenscope::anthropic::{Anthropic, AnthropicConfig};

use tokenscope_server::api::{self, AppState};
use tokenscope_server::chat_service::ChatService;
use tokenscope_server::cleanup::{CleanupPolicy, CleanupService};
use tokenscope_server::config::ServerConfig;
use tokenscope_server::session::SqliteStorage;

#[derive(Parser)]
#[command(
    name = "tokenscope-server",
    about = "Session-scoped LLM usage tracking service",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (the default).
    Serve,
    /// Run one cleanup batch and print the outcome, for cron use.
    Cleanup {
        /// Preview the selection without mutating storage.
        #[arg(long)]
        dry_run: bool,

        /// Soft-deactivate idle sessions instead of hard-deleting expired ones.
        #[arg(long)]
        inactive: bool,
    },
}

/// Bridge `log` records into a tracing subscriber with env-based filtering.
fn setup_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, Registry, fmt};

    tracing_log::LogTracer::init().expect("failed to set LogTracer");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Cleanup { dry_run, inactive } => run_cleanup(config, dry_run, inactive).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let storage = Arc::new(SqliteStorage::connect(config.db_path.clone()).await?);
    log::info!("database ready at {}", config.db_path.display());

    let Some(api_key) = config.provider.api_key.clone() else {
        bail!("no Anthropic API key configured; set ANTHROPIC_API_KEY or provider.api_key");
    };
    let provider = Anthropic::new(AnthropicConfig {
        api_key,
        model: config.provider.model.clone(),
        max_tokens: config.provider.max_tokens,
        timeout_seconds: config.provider.timeout_seconds,
        base_url: config.provider.base_url.clone(),
    })?;

    let chat = Arc::new(ChatService::new(
        Arc::new(provider),
        storage.clone(),
        config.rate_table(),
        "/api/v1/chat",
    ));
    let cleanup = Arc::new(CleanupService::new(storage.clone(), config.cleanup()));

    let state = AppState {
        storage,
        chat,
        cleanup,
        cookie_name: config.session.cookie_name.clone(),
        cookie_max_age_secs: config.retention_window().whole_seconds(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    log::info!("listening on http://{}", config.listen);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_cleanup(config: ServerConfig, dry_run: bool, inactive: bool) -> Result<()> {
    let storage = Arc::new(SqliteStorage::connect(config.db_path.clone()).await?);
    let service = CleanupService::new(storage, config.cleanup());

    let stats = service.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let policy = if inactive {
        CleanupPolicy::Inactive
    } else {
        CleanupPolicy::Expired
    };
    let outcome = service.run(policy, dry_run).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.success {
        bail!("cleanup failed");
    }
    Ok(())
}
