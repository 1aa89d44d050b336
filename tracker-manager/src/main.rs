use anyhow::{Context, Result};
use hub::{HubConfig, Keyring, Store};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracker_manager::{ConnectorRegistry, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_manager=info,hub=info".into()),
        )
        .init();

    info!("Tracker Manager starting...");

    // Configuration: optional TOML file, then environment overrides
    let mut config = match std::env::var("HUB_CONFIG") {
        Ok(path) => hub::load_config(&path)?,
        Err(_) => {
            info!("HUB_CONFIG not set, using defaults");
            HubConfig::default()
        }
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let encryption_key = std::env::var("HUB_ENCRYPTION_KEY")
        .context("HUB_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    info!(
        db_path = %config.database.path,
        interval_secs = config.reconciler.interval_secs,
        reconnect_backoff_secs = config.reconciler.reconnect_backoff_secs,
        request_timeout_secs = config.connectors.request_timeout_secs,
        "Configuration loaded"
    );

    let store = Arc::new(
        Store::open(&config.database.path).context("Failed to initialize store")?,
    );
    let keyring = Arc::new(Keyring::new(&encryption_key)?);
    info!("Store and keyring initialized");

    let registry = Arc::new(ConnectorRegistry::with_builtin(keyring, &config.connectors));
    info!(kinds = ?registry.kinds(), "Connectors registered");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Reconciler::new(store, registry, &config.reconciler)?.start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping reconciler");

    if shutdown_tx.send(true).is_err() {
        warn!("Reconciler already stopped");
    }
    if let Err(e) = handle.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }

    info!("Tracker Manager stopped");
    Ok(())
}
