//! Standalone relay server.
//!
//! Serves the axum adapter on `SIUMAI_RELAY_BIND` and aborts all live
//! operations on Ctrl-C.

use std::sync::Arc;

use siumai_relay::config::RelayConfig;
use siumai_relay::router::Relay;
use siumai_relay::server_adapters::axum::router;
use siumai_relay::storage::{JsonFileSettingsStore, MemorySettingsStore};
use siumai_relay::telemetry;
use siumai_relay::traits::SettingsStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = telemetry::init_from_env()?;
    let config = RelayConfig::from_env()?;

    let settings: Arc<dyn SettingsStore> = match &config.settings_file {
        Some(path) => Arc::new(JsonFileSettingsStore::new(path.clone())),
        None => Arc::new(MemorySettingsStore::new()),
    };
    let relay = Relay::builder()
        .config(config.clone())
        .settings(settings)
        .build()?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        ollama = %config.base_url,
        chat_model = %config.chat_model,
        "siumai-relay listening"
    );

    let shutdown_relay = relay.clone();
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            shutdown_relay.shutdown();
        })
        .await?;

    Ok(())
}
