//! Controller binary entry point.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttsfleet_controller::config::{Cli, Config};
use ttsfleet_controller::http::{build_router, AppState};
use ttsfleet_controller::registry::CapacityRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let base = Config::load(cli.config.clone())?;
    let config = cli.apply(base);

    tracing::info!(
        listen = %format!("{}:{}", config.listen_ip, config.listen_port),
        "starting controller"
    );

    let registry = Arc::new(CapacityRegistry::new());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sweeper_handle = {
        let registry = registry.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            registry.run_sweeper(shutdown_rx).await;
        })
    };

    let state = AppState {
        registry,
        password: (!config.password.is_empty()).then(|| config.password.clone()),
    };

    let router = build_router(state);

    let bind_addr = format!("{}:{}", config.listen_ip, config.listen_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "controller listening");

    let shutdown_tx_clone = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx_clone.send(());
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = sweeper_handle.await;

    tracing::info!("controller shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
