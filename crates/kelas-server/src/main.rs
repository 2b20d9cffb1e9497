mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use kelas_api::auth::{AppState, AppStateInner};
use kelas_db::Database;
use kelas_forum::{ChannelDirectory, MessageStream};
use kelas_gateway::connection;
use kelas_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kelas=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let directory = ChannelDirectory::new(db.clone())
        .with_unlisted_membership(config.unlisted_membership)
        .with_buffer(config.subscription_buffer);
    let messages = MessageStream::new(db.clone()).with_buffer(config.subscription_buffer);

    // Shared state
    let dispatcher = Dispatcher::new(
        db.clone(),
        directory.clone(),
        messages.clone(),
        config.jwt_secret.clone(),
    );
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        directory,
        messages,
        config.jwt_secret.clone(),
    ));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(dispatcher.clone());

    let app = Router::new()
        .merge(kelas_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!(
        "Kelas server listening on {} (unlisted membership: {})",
        addr, config.unlisted_membership
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;

    Ok(())
}

async fn ws_upgrade(
    State(dispatcher): State<Dispatcher>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}

/// Resolves on Ctrl+C or SIGTERM, after telling every gateway connection
/// to close.
async fn shutdown_signal(dispatcher: Dispatcher) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }

    info!(
        "Closing {} gateway connections",
        dispatcher.connection_count().await
    );
    dispatcher.shutdown();
}
