// ABOUTME: Session relay HTTP service exposing agents, sessions and streamed messages
// ABOUTME: Builds the axum router over the adapter registry and serves it
use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use coder_agent::AdapterRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod ndjson;
pub mod routes;
pub mod sessions;

pub use sessions::{Session, SessionStore};

use crate::config::Config;

/// Shared state for relay handlers
pub struct RelayState {
    pub registry: AdapterRegistry,
    pub sessions: SessionStore,
    pub api_token: Option<String>,
}

impl RelayState {
    pub fn new(registry: AdapterRegistry, api_token: Option<String>) -> Self {
        Self {
            registry,
            sessions: SessionStore::new(),
            api_token,
        }
    }
}

/// Build the relay router. `/metrics` is mounted only when a handle is given.
pub fn router(state: Arc<RelayState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api = routes::api_router()
        .layer(middleware::from_fn_with_state(state.clone(), auth::bearer_auth))
        .with_state(state);

    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/acp", api);

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(routes::metrics_handler))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

/// Start the relay HTTP server and run until it fails
pub async fn serve(config: &Config, registry: AdapterRegistry) -> Result<()> {
    let metrics_handle =
        crate::metrics::init_metrics().context("Failed to initialize Prometheus metrics")?;

    let state = Arc::new(RelayState::new(registry, config.relay.api_token.clone()));
    let app = router(state.clone(), Some(metrics_handle));

    let addr = config.bind_addr();
    tracing::info!(
        addr = %addr,
        agents = ?state.registry.names(),
        auth = state.api_token.is_some(),
        "Starting session relay"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
