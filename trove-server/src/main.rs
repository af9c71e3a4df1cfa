//! `troved` — the trove API server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trove_api::{Services, UsageRecorder};
use trove_cache::{CacheRegistry, CacheSync};
use trove_core::TroveConfig;
use trove_http::AppState;
use trove_notify::{Bus, LocalBus};

mod maintenance;

#[derive(Parser)]
#[command(name = "troved", version, about = "trove multi-tenant personal data API server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".parse().unwrap_or_default()),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match TroveConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("cannot load configuration: {e}");
                std::process::exit(1);
            }
        },
        None => TroveConfig::from_env().unwrap_or_default(),
    };
    if let Some(port) = cli.port {
        config.http.port = port;
    }

    if let Err(e) = run(config).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

async fn run(config: TroveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bus = build_bus(&config).await;
    let storage = trove_storage::memory::storage();
    let cache = Arc::new(CacheRegistry::new(config.caches.enabled));
    let cache_sync = CacheSync::new(cache.clone(), bus.clone());
    let usage = Arc::new(UsageRecorder::new());
    let addr = format!("{}:{}", config.http.host, config.http.port);

    let services = Services {
        storage: storage.clone(),
        cache,
        cache_sync,
        bus,
        config: Arc::new(config),
        usage: usage.clone(),
        custom_auth: None,
    };

    // Deferred access-usage counters, flushed at-least-once.
    let usage_task = usage.start(storage.clone(), Duration::from_secs(10));
    // Advisory storage figures, recomputed nightly.
    let recompute_task = maintenance::start_storage_recompute(storage.clone());

    let state = AppState::new(services);
    let router = trove_http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "troved listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    usage_task.abort();
    recompute_task.abort();
    Ok(())
}

async fn build_bus(config: &TroveConfig) -> Arc<dyn Bus> {
    #[cfg(feature = "nats")]
    if config.nats.enabled {
        use trove_notify::nats::{NatsBus, NatsBusConfig};
        let nats_config = NatsBusConfig {
            url: config
                .nats
                .url
                .clone()
                .unwrap_or_else(|| "nats://localhost:4222".to_string()),
            ..NatsBusConfig::default()
        };
        match NatsBus::connect(nats_config).await {
            Ok(bus) => return Arc::new(bus),
            Err(e) => {
                tracing::warn!("NATS bridge unavailable, falling back to in-process bus: {e}");
            }
        }
    }
    #[cfg(not(feature = "nats"))]
    if config.nats.enabled {
        tracing::warn!("nats.enabled is set but troved was built without the nats feature");
    }
    Arc::new(LocalBus::new())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
