//! Konro gateway binary - HTTP serving path for a chat-completion engine.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use konro::api::{self, AppState};
use konro::config::ServerConfig;
use konro::engine::Generator;
use konro::engine::echo::EchoEngine;
use konro::health::HealthMonitor;
use konro::scheduler::Scheduler;

#[derive(Debug, Parser)]
#[command(
    name = "konro",
    about = "Chat-completion serving gateway",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Host to bind to (overrides KONRO_HOST)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on (overrides KONRO_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "konro=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        max_concurrency = config.scheduler.max_concurrency,
        queue_capacity = config.scheduler.queue_capacity,
        "starting konro gateway"
    );

    // The echo engine serves both the generation seam and the resource
    // probe; a real accelerator backend would do the same.
    let engine = Arc::new(EchoEngine::new());
    let model_id = engine.model_id().to_string();

    let scheduler = Arc::new(Scheduler::new(engine.clone(), config.scheduler.clone()));
    let health = Arc::new(HealthMonitor::new(engine, config.health_ttl));

    let app = api::router(Arc::new(AppState {
        scheduler,
        health,
        model_id,
    }));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
