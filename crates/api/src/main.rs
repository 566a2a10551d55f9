use std::sync::Arc;

use tessera_events::EventBus;
use tessera_relay::{ForwardingGateway, HealthAggregator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_api::config::AppConfig;
use tessera_api::router::build_app_router;
use tessera_api::services::{self, Pipeline, StartupError};
use tessera_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tessera_api=debug,tessera_events=debug,tessera_relay=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = AppConfig::from_env()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Loaded server configuration",
    );

    // --- Outbound relay ---
    let client = services::http_client(&config.relay)?;
    let destinations = services::build_destinations(&config.relay, &client);
    tracing::info!(destinations = ?destinations.names(), "Destinations configured");

    let gateway = Arc::new(ForwardingGateway::new(
        destinations.clone(),
        config.relay.gateway_config(),
    ));
    let health = Arc::new(HealthAggregator::new(
        destinations,
        config.relay.health_timeout,
    ));

    // --- Event pipeline ---
    let event_bus = Arc::new(EventBus::new());
    let collaborators = services::build_collaborators(&config.relay, &client);
    let definitions = services::load_rules(&config.pipeline)?;
    let pipeline = Pipeline::start(
        event_bus,
        &config.pipeline,
        definitions,
        &collaborators,
    )?;

    // --- App state ---
    let state = AppState { gateway, health };
    let app = build_app_router(state, &config.server);

    // --- Start server ---
    let addr = config.server.bind_addr();
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    pipeline.shutdown().await;
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
