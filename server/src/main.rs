use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_server::config::ServerConfig;
use huddle_server::engine::relay::RelayEngine;
use huddle_server::web::app_state::AppState;
use huddle_server::web::router::build_router;

#[derive(Parser)]
#[command(name = "huddle-server", about = "Lightweight WebSocket group messaging relay")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "huddle.toml")]
    config: String,

    /// Override the listen address from config/env.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.server.listen_address = listen;
    }

    let engine = Arc::new(RelayEngine::new(
        config.rooms.history_max,
        config.rate.max_events,
        config.rate_window(),
    ));

    // Liveness probes and rate-budget eviction share one housekeeping clock.
    let sweeper = engine.clone();
    let heartbeat = config.heartbeat();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(heartbeat);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            sweeper.sweep_liveness();
            sweeper.cleanup_rate_budgets(heartbeat);
        }
    });

    let state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });
    let app = build_router(state);

    info!("huddle relay listening on {}", config.server.listen_address);
    let listener = tokio::net::TcpListener::bind(&config.server.listen_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shutdown complete");
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
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
