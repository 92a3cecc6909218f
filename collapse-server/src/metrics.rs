//! Server Metrics - request counters plus collapse gauges, Prometheus + JSON
//!
//! Request counters are lock-free atomics bumped by a middleware layer.
//! Collapse gauges are read from the service's status snapshot per scrape.
//!
//! ## Endpoints
//! - `GET /metrics` - Prometheus text format
//! - `GET /metrics/json` - JSON format

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use collapse_core::state::{CollapsePhase, StructureStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::api::ApiState;

#[derive(Debug)]
pub struct ServerMetrics {
    pub total_requests: AtomicU64,
    /// 4xx + 5xx
    pub total_errors: AtomicU64,
    pub total_duration_us: AtomicU64,
    pub start_time: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ServerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, duration_us: u64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration_us, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        let dur_us = self.total_duration_us.load(Ordering::Relaxed);
        if total > 0 {
            (dur_us as f64 / total as f64) / 1000.0
        } else {
            0.0
        }
    }
}

/// Structure counts by phase
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollapseGauges {
    pub tracked: usize,
    pub idle: usize,
    pub scheduled: usize,
    pub imploding: usize,
}

impl CollapseGauges {
    pub fn from_status(status: &[StructureStatus]) -> Self {
        let mut gauges = Self {
            tracked: status.len(),
            ..Self::default()
        };
        for s in status {
            match s.phase {
                CollapsePhase::Idle => gauges.idle += 1,
                CollapsePhase::Scheduled => gauges.scheduled += 1,
                CollapsePhase::Imploding => gauges.imploding += 1,
            }
        }
        gauges
    }
}

// ============================================================================
// Axum Middleware
// ============================================================================

pub async fn metrics_middleware(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let resp = next.run(req).await;
    let duration_us = start.elapsed().as_micros() as u64;
    let is_error = resp.status().is_client_error() || resp.status().is_server_error();

    state.metrics.record_request(duration_us, is_error);
    resp
}

// ============================================================================
// GET /metrics
// ============================================================================

pub async fn prometheus_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let m = &state.metrics;
    let total_requests = m.total_requests.load(Ordering::Relaxed);
    let total_errors = m.total_errors.load(Ordering::Relaxed);
    let uptime = m.uptime_secs();
    let avg_req_duration_s = m.avg_duration_ms() / 1000.0;
    let gauges = CollapseGauges::from_status(&state.service.status());
    let anchors = state.service.anchors().len();
    let unlocked = state.service.vault().unlocked_count();
    let worlds = state.worlds.world_ids().len();
    let started = state.service.scheduler().implosions_started();
    let completed = state.service.scheduler().implosions_completed();

    let body = format!(
        "# HELP tower_requests_total Total HTTP requests served\n\
         # TYPE tower_requests_total counter\n\
         tower_requests_total {total_requests}\n\
         \n\
         # HELP tower_request_errors_total Total HTTP request errors (4xx/5xx)\n\
         # TYPE tower_request_errors_total counter\n\
         tower_request_errors_total {total_errors}\n\
         \n\
         # HELP tower_request_duration_seconds Average request duration\n\
         # TYPE tower_request_duration_seconds gauge\n\
         tower_request_duration_seconds {avg_req_duration_s:.6}\n\
         \n\
         # HELP tower_structures_tracked Structures known to the collapse store\n\
         # TYPE tower_structures_tracked gauge\n\
         tower_structures_tracked {tracked}\n\
         \n\
         # HELP tower_collapses_scheduled Structures counting down to implosion\n\
         # TYPE tower_collapses_scheduled gauge\n\
         tower_collapses_scheduled {scheduled}\n\
         \n\
         # HELP tower_collapses_imploding Structures currently imploding\n\
         # TYPE tower_collapses_imploding gauge\n\
         tower_collapses_imploding {imploding}\n\
         \n\
         # HELP tower_implosions_started_total Implosions started since boot\n\
         # TYPE tower_implosions_started_total counter\n\
         tower_implosions_started_total {started}\n\
         \n\
         # HELP tower_implosions_completed_total Implosions run to completion since boot\n\
         # TYPE tower_implosions_completed_total counter\n\
         tower_implosions_completed_total {completed}\n\
         \n\
         # HELP tower_guardian_anchors Guardians with a recorded anchor\n\
         # TYPE tower_guardian_anchors gauge\n\
         tower_guardian_anchors {anchors}\n\
         \n\
         # HELP tower_vaults_unlocked Vault containers unlocked with a key\n\
         # TYPE tower_vaults_unlocked gauge\n\
         tower_vaults_unlocked {unlocked}\n\
         \n\
         # HELP tower_worlds Live worlds\n\
         # TYPE tower_worlds gauge\n\
         tower_worlds {worlds}\n\
         \n\
         # HELP tower_uptime_seconds Server uptime\n\
         # TYPE tower_uptime_seconds gauge\n\
         tower_uptime_seconds {uptime:.2}\n",
        tracked = gauges.tracked,
        scheduled = gauges.scheduled,
        imploding = gauges.imploding,
    );

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ============================================================================
// GET /metrics/json
// ============================================================================

#[derive(Serialize)]
pub struct JsonMetrics {
    pub uptime_secs: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_request_duration_ms: f64,
    pub collapses: CollapseGauges,
    pub implosions_started: u64,
    pub implosions_completed: u64,
    pub guardian_anchors: usize,
    pub vaults_unlocked: usize,
}

pub async fn json_metrics_handler(State(state): State<ApiState>) -> Json<JsonMetrics> {
    let m = &state.metrics;
    Json(JsonMetrics {
        uptime_secs: m.uptime_secs(),
        total_requests: m.total_requests.load(Ordering::Relaxed),
        total_errors: m.total_errors.load(Ordering::Relaxed),
        avg_request_duration_ms: m.avg_duration_ms(),
        collapses: CollapseGauges::from_status(&state.service.status()),
        implosions_started: state.service.scheduler().implosions_started(),
        implosions_completed: state.service.scheduler().implosions_completed(),
        guardian_anchors: state.service.anchors().len(),
        vaults_unlocked: state.service.vault().unlocked_count(),
    })
}
