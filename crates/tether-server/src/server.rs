use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;

use tether_core::handler::RequestHandler;
use tether_session::{start_reaper, SessionConfig, SessionRegistry};

use crate::dispatch;
use crate::metrics;

/// How POST responses travel back: buffered JSON or a per-exchange event
/// stream whose frames carry replayable log ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseMode {
    #[default]
    Json,
    Stream,
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub response_mode: ResponseMode,
    /// Per-session event log capacity.
    pub max_events: usize,
    /// Per-session live-stream channel depth.
    pub broadcast_capacity: usize,
    /// Idle eviction threshold in seconds; 0 disables the reaper.
    pub idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            response_mode: ResponseMode::Json,
            max_events: 4096,
            broadcast_capacity: 256,
            idle_timeout_secs: 1800,
            reaper_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_events: self.max_events,
            broadcast_capacity: self.broadcast_capacity,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub handler: Arc<dyn RequestHandler>,
    pub config: Arc<ServerConfig>,
    pub metrics: PrometheusHandle,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(dispatch::handle_post)
                .get(dispatch::handle_get)
                .delete(dispatch::handle_delete),
        )
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SessionRegistry::new());
    let metrics_handle = metrics::install_recorder();

    let reaper = if config.idle_timeout_secs > 0 {
        Some(start_reaper(
            Arc::clone(&registry),
            Duration::from_secs(config.reaper_interval_secs),
            Duration::from_secs(config.idle_timeout_secs),
        ))
    } else {
        None
    };

    let addr = format!("{}:{}", config.bind, config.port);
    let state = AppState {
        registry: Arc::clone(&registry),
        handler,
        config: Arc::new(config),
        metrics: metrics_handle,
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "tether server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server_handle,
        _reaper: reaper,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<SessionRegistry>,
    _server: tokio::task::JoinHandle<()>,
    _reaper: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Close every live session; called by the binary on shutdown.
    pub fn shutdown(&self) {
        let closed = self.registry.close_all();
        if closed > 0 {
            tracing::info!(closed, "sessions closed at shutdown");
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.count(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    metrics::render(&state.metrics)
}
