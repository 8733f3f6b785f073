//! HTTP and WebSocket server for observers
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **ControlProtocol** for everything an observer sends
//! - **Broadcaster** queues for everything an observer receives
//!
//! ## Endpoints
//!
//! - `GET /ping` - Liveness probe, plain `ok`
//! - `GET /health` - Health check with timestamp
//! - `WS /ws` - Control channel and live event stream
//! - `GET /*` - Static front-end files (when the directory exists)

pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use state::ApiState;
pub use types::HealthResponse;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{Router, routing::get};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:3000")
    pub bind_addr: SocketAddr,

    /// Directory with the front-end files
    pub static_dir: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            static_dir: None,
        }
    }
}

/// Build the router with all routes
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/ping", get(routes::health::ping))
        .route("/health", get(routes::health::health_check))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state);

    if let Some(static_dir) = &config.static_dir {
        if static_dir.is_dir() {
            info!("serving front-end from {}", static_dir.display());
            app = app.fallback_service(ServeDir::new(static_dir));
        } else {
            info!("static directory {} not found", static_dir.display());
        }
    }

    app.layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    // Spawn server in background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
