//! # Convoy Server
//!
//! Shares live member positions and a common destination within a convoy.
//!
//! ## Architecture
//!
//! The server is built on Axum and keeps all state in process memory:
//! - `convoy-core` for membership, positions, fan-out and presence eviction
//! - `convoy-config` for layered configuration
//! - Nominatim for address lookup

use anyhow::Context;
use clap::{Args as ClapArgs, Parser};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use convoy_core::{AddressLookup, DisabledLookup, NominatimLookup};
use convoy_server::{
    AppState, create_app,
    infra::startup::{ProdStartupHooks, StartupHooks},
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "convoy-server")]
#[command(about = "Live position sharing for groups travelling together")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to convoy.toml (overrides CONVOY_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_server_with_hooks(cli.serve, &ProdStartupHooks).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Arc<Config>> {
    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG
                "info,convoy_core=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "loaded configuration file");
    }

    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    Ok(Arc::new(config))
}

fn build_address_lookup(config: &Config) -> anyhow::Result<Arc<dyn AddressLookup>> {
    let geocoder = &config.geocoder;
    if !geocoder.enabled {
        return Ok(Arc::new(DisabledLookup));
    }

    let base_url = geocoder
        .parsed_base_url()
        .context("invalid geocoder base url")?;
    let lookup = NominatimLookup::new(&base_url, &geocoder.user_agent, geocoder.timeout)
        .context("failed to build geocoder client")?;
    info!(url = %lookup.search_url(), "address lookup enabled");

    Ok(Arc::new(lookup))
}

async fn run_server_with_hooks<H>(args: ServeArgs, hooks: &H) -> anyhow::Result<()>
where
    H: StartupHooks,
{
    let config = load_runtime_config(&args)?;
    let lookup = build_address_lookup(&config)?;
    let state = AppState::new(Arc::clone(&config), lookup);

    hooks.run(&state).await?;

    let shutdown = state.shutdown.clone();
    let router = create_app(state);

    info!(
        "Starting Convoy Server on {}:{}",
        config.server.host, config.server.port
    );

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
            .await
            .with_context(|| {
                format!("failed to bind {}:{}", config.server.host, config.server.port)
            })?;
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Convoy Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, cancelling background tasks and open sockets
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        // Without a signal handler, only an explicit cancel stops the server
        shutdown.cancelled().await;
        return;
    }

    info!("shutdown requested");
    shutdown.cancel();
}
