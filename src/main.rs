//! Porta Bridge - cross-chain transfer orchestration
//!
//! Runs a single transfer session against the LI.FI routing API and exposes it
//! over HTTP: chain/token selection, balance discovery, debounced quoting,
//! recipient name resolution and route execution.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

mod amount;
mod api;
mod balance;
mod chain;
mod config;
mod error;
mod events;
mod execution;
mod metrics;
mod quote;
mod resolver;
mod session;
mod tokens;

use api::AppState;
use balance::RpcBalanceSource;
use chain::{ChainRegistry, RpcWallet, WalletProvider};
use config::Settings;
use metrics::MetricsServer;
use quote::LifiClient;
use resolver::EnsApiResolver;
use session::{Collaborators, TransferSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Porta Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // RPC providers for balances, chain verification and signing
    let registry = Arc::new(ChainRegistry::new(&settings)?);
    info!("Chain connections initialized");

    let wallet: Arc<dyn WalletProvider> = Arc::new(RpcWallet::new(&settings.wallet, registry.clone())?);
    if wallet.current_account().await.is_none() {
        warn!("No wallet account configured - quotes and execution are disabled");
    }

    let lifi = Arc::new(LifiClient::new(
        &settings.lifi,
        Duration::from_millis(settings.bridge.status_poll_interval_ms),
        wallet.clone(),
    )?);

    let session = TransferSession::new(
        settings.bridge.clone(),
        Collaborators {
            wallet,
            quotes: lifi.clone(),
            catalog: lifi,
            balances: Arc::new(RpcBalanceSource::new(registry.clone())),
            resolver: Arc::new(EnsApiResolver::new(&settings.resolver)?),
        },
    );

    // Log every session notification
    let events_handle = tokio::spawn({
        let mut events = session.subscribe();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_failure() => warn!(event = event.name(), "{:?}", event),
                    Ok(event) => info!(event = event.name(), "{:?}", event),
                    Err(RecvError::Lagged(skipped)) => warn!("Event logger skipped {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    session.start().await;
    info!("Transfer session started");

    // Follow wallet account changes
    let account_handle = tokio::spawn(session.clone().watch_account());

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState::new(session.clone(), Some(registry.clone()));
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Periodic RPC health check
    let health_handle = tokio::spawn({
        let registry = registry.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;

                for (chain_id, healthy) in registry.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }
            }
        }
    });

    info!("Porta Bridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    health_handle.abort();
    events_handle.abort();
    account_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Porta Bridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,porta_bridge=debug,hyper=warn"));

    let json = std::env::var("PORTA_LOG_FORMAT").is_ok_and(|format| format == "json");
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
