use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use decoy::config::{ServerConfig, SessionConfig};
use decoy::llm::LlmConfig;
use decoy::{session, ws};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decoy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting decoy...");

    // Initialize text-generation providers
    let llm_config = LlmConfig::from_env();
    let generator = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("text-generation providers initialized");
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize text generation: {}. The AI player will use canned lines.",
                e
            );
            None
        }
    };

    // Spawn the session coordinator (single-writer actor + timer loop)
    let session = session::spawn(SessionConfig::from_env(), generator);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(session);

    let server_config = ServerConfig::from_env();
    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
