//! REST API for group health reports
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Health aggregator** queried directly on the request path
//! - **Actor handles** for ingestion statistics
//!
//! ## Endpoints
//!
//! - `GET /api/v1/system/health?from=&to=&interval=` - Bucketed group health
//! - `GET /api/v1/system/health/latest` - Group health over the last hour
//! - `GET /api/v1/health` - Liveness
//! - `GET /api/v1/stats` - Ingestion statistics

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{CollectorInfo, HealthResponse, StatsResponse};

#[cfg(feature = "api")]
use axum::{Router, routing::get};
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(feature = "api")]
use tracing::info;

use crate::config::{ConfigError, HttpConfig};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable permissive CORS for dashboards
    pub enable_cors: bool,
}

impl ApiConfig {
    pub fn from_http(config: &HttpConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: config.bind_addr()?,
            enable_cors: config.enable_cors,
        })
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
        }
    }
}

/// Build the router with all routes
#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route(
            "/api/v1/system/health",
            get(routes::system::get_system_health),
        )
        .route(
            "/api/v1/system/health/latest",
            get(routes::system::get_latest_health),
        )
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

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
