//! HTTP/JSON API Layer
//!
//! Operator and game-client surface for the collapse service.
//!
//! ## Architecture
//! ```text
//! Client / admin tool
//!       ↓ HTTP POST, JSON body
//! Axum Router (port 50051)
//!       ↓
//! Service Handlers (collapse, guardian, vault)
//!       ↓                         ↓
//! TowerCollapseService      WorldRunner::with_world (actor inventories, inboxes)
//! ```
//!
//! ## Endpoint Convention
//! All endpoints follow the gRPC path pattern: `POST /tower.<Service>/<Method>`
//! Example: `POST /tower.CollapseService/Trigger`

pub mod collapse;
pub mod guardian;
pub mod vault;

use axum::{middleware, routing::get, Json, Router};
use collapse_core::constants::ANCHOR_Y_LIMIT;
use collapse_core::error::HostError;
use collapse_core::service::TowerCollapseService;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::ServerMetrics;
use crate::sim_world::SimWorld;
use crate::world_runner::WorldDirectory;

/// Shared state available to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<TowerCollapseService>,
    pub worlds: Arc<WorldDirectory>,
    pub metrics: Arc<ServerMetrics>,
}

impl ApiState {
    pub fn new(service: Arc<TowerCollapseService>, worlds: Arc<WorldDirectory>) -> Self {
        Self {
            service,
            worlds,
            metrics: ServerMetrics::new(),
        }
    }

    /// Runs `f` on the named world's thread
    pub(crate) async fn with_world<T, F>(&self, world_id: &str, f: F) -> Result<T, String>
    where
        F: FnOnce(&mut SimWorld) -> T + Send + 'static,
        T: Send + 'static,
    {
        let runner = self
            .worlds
            .get(world_id)
            .ok_or_else(|| format!("unknown world: {world_id}"))?;
        runner
            .with_world(f)
            .await
            .map_err(|e: HostError| e.to_string())
    }
}

/// Rejects anchor heights no host world can contain
pub(crate) fn check_anchor_y(y: f64) -> Result<(), String> {
    let limit = f64::from(ANCHOR_Y_LIMIT);
    if y.is_finite() && (-limit..=limit).contains(&y) {
        Ok(())
    } else {
        Err(format!("anchor y out of range: {y}"))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    worlds: Vec<String>,
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<ApiState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        worlds: state.worlds.world_ids(),
    })
}

/// Build the full API router with all service endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::prometheus_handler))
        .route("/metrics/json", get(crate::metrics::json_metrics_handler))
        .merge(collapse::routes())
        .merge(guardian::routes())
        .merge(vault::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::metrics_middleware,
        ))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_api_server<S>(state: ApiState, port: u16, shutdown: S) -> anyhow::Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
