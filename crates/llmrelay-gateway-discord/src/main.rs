//! llmrelay binary: relays Discord guild channels to a Gemini model.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use llmrelay::config::Config;
use llmrelay::llm::{ChatProvider, GeminiProvider};
use llmrelay::session::{EvictionPolicy, SessionCache};
use llmrelay::store::GuildConfigStore;
use llmrelay_gateway_discord::{DiscordConfig, DiscordGateway};

// ============================================================================
// CLI Types
// ============================================================================

/// llmrelay - answers messages in a configured Discord channel with an LLM
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "llmrelay.yaml")]
    config: String,

    /// Directory holding guild_configs.json (overrides config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    // Before tracing, so RUST_LOG may come from .env.
    let dotenv = dotenvy::dotenv();
    init_tracing();
    log_dotenv(dotenv);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config))?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    config.apply_env_fallbacks();
    config.validate()?;

    let routes = Arc::new(GuildConfigStore::open_in(&config.storage.data_dir).await.store);

    let provider = Arc::new(GeminiProvider::new(
        reqwest::Client::new(),
        config.gemini.api_key.clone(),
        config.gemini.model.clone(),
        config.gemini.base_url.clone(),
    ));
    info!(model = %provider.model_name(), "Using Gemini backend");

    let policy = config.eviction_policy();
    let sessions = SessionCache::with_policy(provider, policy);
    if let EvictionPolicy::Idle { ttl } = policy {
        spawn_session_sweeper(sessions.clone(), ttl);
    }

    let gateway = DiscordGateway::new(
        DiscordConfig::new(config.discord.bot_token.clone()),
        routes,
        sessions,
        config.dispatch_config(),
    );
    let mut client = gateway
        .into_client()
        .await
        .context("failed to create Discord client")?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        shutdown_signal().await;
        shard_manager.shutdown_all().await;
    });

    info!(data_dir = %config.storage.data_dir.display(), "Starting llmrelay");
    client.start().await.context("Discord client error")?;

    info!("llmrelay stopped");
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn log_dotenv(result: dotenvy::Result<PathBuf>) {
    match result {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }
}

/// Drop idle conversations between messages, not only on insert.
fn spawn_session_sweeper(sessions: SessionCache, ttl: Duration) {
    let period = (ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired().await;
            if purged > 0 {
                info!(purged, "Dropped idle chat sessions");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = on_signal("Ctrl+C", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = on_signal("SIGTERM", async {
        let mut sig = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        sig.recv().await;
        Ok::<_, std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Resolve when the signal arrives. A handler that cannot be installed never
/// resolves, so it cannot trigger a shutdown.
async fn on_signal(name: &str, signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        warn!(error = %e, signal = name, "Failed to install signal handler");
        std::future::pending::<()>().await;
    }
}
