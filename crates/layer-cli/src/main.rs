use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use layer_core::providers::{AnthropicAdapter, GoogleAdapter, OpenAiAdapter};
use layer_core::{
    CompletionRouter, GateAdmin, GateResolver, ModelRegistry, ProviderTable, RequestAuditor,
};
use layer_gateway::{Authenticator, GatewayServer, GatewayState};
use layer_store::{LruGateCache, SqliteStore};

mod config;

use config::LayerConfig;

#[derive(Parser)]
#[command(name = "layer")]
#[command(version)]
#[command(about = "Gate-based completion routing across LLM vendors")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Serve => cmd_serve(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("layer initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure provider keys and gateway tokens.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = LayerConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

/// Register an adapter for every vendor with a configured key
fn build_providers(cfg: &LayerConfig, registry: &Arc<ModelRegistry>) -> Result<ProviderTable> {
    let mut providers = ProviderTable::new();

    if let Some(settings) = cfg.providers.openai_settings() {
        providers.register(Arc::new(
            OpenAiAdapter::new(settings, registry.clone())
                .context("Failed to initialize OpenAI adapter")?,
        ));
    }
    if let Some(settings) = cfg.providers.anthropic_settings() {
        providers.register(Arc::new(
            AnthropicAdapter::new(settings, registry.clone())
                .context("Failed to initialize Anthropic adapter")?,
        ));
    }
    if let Some(settings) = cfg.providers.google_settings() {
        providers.register(Arc::new(
            GoogleAdapter::new(settings, registry.clone())
                .context("Failed to initialize Google adapter")?,
        ));
    }

    Ok(providers)
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = LayerConfig::load(config_path)?;
    info!("Starting layer gateway...");

    let registry = Arc::new(ModelRegistry::builtin());
    let providers = build_providers(&cfg, &registry)?;
    if providers.is_empty() {
        warn!("No provider API keys configured; every completion will fail");
    } else {
        let vendors: Vec<String> = providers.vendors().iter().map(|v| v.to_string()).collect();
        info!("Providers enabled: {}", vendors.join(", "));
    }

    let db_path = cfg.storage.resolved_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::new(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    info!("Database initialized at {}", db_path.display());

    let cache = Arc::new(LruGateCache::new(cfg.cache.capacity));
    let (auditor, audit_worker) = RequestAuditor::spawn(store.clone());

    let resolver = GateResolver::new(cache.clone(), store.clone());
    let router = CompletionRouter::new(resolver, registry.clone(), providers, auditor)
        .with_defaults(cfg.defaults);
    let admin = GateAdmin::new(store.clone(), cache, registry);

    let auth = Authenticator::new(cfg.auth.api_keys.clone());
    if auth.is_disabled() {
        warn!("No gateway API keys configured; authentication is disabled");
    }

    let state = GatewayState::new(router, admin, store, auth);
    let server = GatewayServer::new(cfg.server.bind, state);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let mut server_task = tokio::spawn(server.run(async move { shutdown.cancelled().await }));

    tokio::select! {
        res = &mut server_task => {
            // The server stopped on its own, usually a bind failure
            let outcome = res.context("Gateway task panicked")?;
            if let Err(e) = &outcome {
                error!("Gateway failed: {:#}", e);
            }
            drain_audit(audit_worker).await;
            return outcome;
        }
        res = signal::ctrl_c() => {
            res?;
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    let outcome = server_task.await.context("Gateway task panicked")?;
    drain_audit(audit_worker).await;
    outcome?;

    println!("layer stopped.");
    Ok(())
}

/// The audit worker exits once the router holding the last sender is gone
async fn drain_audit(worker: tokio::task::JoinHandle<()>) {
    if let Err(e) = worker.await {
        warn!("Audit worker ended abnormally: {}", e);
    }
}
