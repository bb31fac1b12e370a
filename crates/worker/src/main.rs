//! Worker binary entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttsfleet_worker::config::{Cli, Config};
use ttsfleet_worker::health::HealthAgent;
use ttsfleet_worker::model::MockSessionModel;
use ttsfleet_worker::upstream::UpstreamPool;
use ttsfleet_worker::ws::{ws_handler, AppState};

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
        max_sessions = config.max_sessions,
        standalone = config.controller_url.is_none(),
        "starting worker"
    );

    let health = Arc::new(HealthAgent::new(
        config.max_sessions,
        config.advertise_url.clone(),
        config.controller_url.clone(),
    ));
    let upstream = Arc::new(UpstreamPool::new(
        config.has_password().then(|| config.password.clone()),
    ));
    let model = Arc::new(MockSessionModel::new(config.model_directory.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let reporter_handle = {
        let health = health.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            health.run_reporter(Duration::from_secs(5), shutdown_rx).await;
        })
    };

    let state = AppState {
        health,
        upstream,
        model,
        input_timeout: Duration::from_secs_f64(config.session_input_timeout),
        output_timeout: Duration::from_secs_f64(config.session_output_timeout),
        password: config.has_password().then_some(config.password.clone()),
    };

    let router = Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_addr = format!("{}:{}", config.listen_ip, config.listen_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "worker listening");

    let shutdown_tx_clone = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx_clone.send(());
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = reporter_handle.await;

    tracing::info!("worker shutdown complete");
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
