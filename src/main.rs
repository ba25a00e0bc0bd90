use std::sync::Arc;

use lehrer_sync::config::Configuration;
use lehrer_sync::{app, initialize_state, telemetry};

const DEFAULT_ADDRESS: &str = "0.0.0.0:1111";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::default().read()?;

    let otlp_endpoint = config
        .telemetry
        .as_ref()
        .and_then(|telemetry| telemetry.otlp_endpoint.as_deref());
    telemetry::init_subscriber(otlp_endpoint);
    let metrics = telemetry::setup_metrics_recorder()?;

    let state = initialize_state(Arc::clone(&config), metrics).await?;

    let address = config
        .address
        .clone()
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
