use std::net::SocketAddr;

use anyhow::Context;
use stream_gateway::router::{create_internal_router, create_router};
use stream_gateway::state::AppState;
use stream_gateway::{Hub, HubConfig};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting stream gateway");

    let config = HubConfig::load().context("loading configuration")?;
    let oracle = Hub::oracle_from_config(&config).context("building account oracle")?;
    let hub = Hub::new(&config, oracle)?;

    // Domain events flow from the ingest endpoint into the fan-out workers
    let (events_tx, events_rx) = mpsc::channel(config.fanout_queue_capacity);
    let tasks = hub.spawn(events_rx);

    let state = AppState::new(hub.clone(), events_tx);
    let app = create_router(state.clone());
    let internal_app = create_internal_router(state);

    let addr = parse_addr(&config.bind_addr)?;
    let internal_addr = parse_addr(&config.internal_bind_addr)?;
    let listener = TcpListener::bind(addr).await?;
    let internal_listener = TcpListener::bind(internal_addr).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let internal = tokio::spawn(async move {
        axum::serve(internal_listener, internal_app)
            .with_graceful_shutdown(stopped(stop_rx))
            .await
    });

    tracing::info!("Listening on {}, internal ingest on {}", addr, internal_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal(hub).await;
        let _ = stop_tx.send(true);
    })
    .await?;

    internal.await??;

    for task in tasks {
        task.abort();
    }

    Ok(())
}

/// Wait for Ctrl-C, then close every session so upgraded sockets finish.
async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    hub.shutdown();
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

fn parse_addr(raw: &str) -> Result<SocketAddr, anyhow::Error> {
    raw.parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address {}", raw))
}
