//! CollapseService - countdowns, delays and status
//!
//! Endpoints:
//! - POST /tower.CollapseService/Trigger
//! - POST /tower.CollapseService/GetPending
//! - POST /tower.CollapseService/Delay
//! - POST /tower.CollapseService/PurchaseDelay
//! - POST /tower.CollapseService/Status
//! - POST /tower.CollapseService/ApplyConfig

use axum::{extract::State, routing::post, Json, Router};
use collapse_core::config::CollapseConfig;
use collapse_core::host::HostWorld;
use collapse_core::state::{StructureKey, StructureStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{check_anchor_y, ApiState};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/tower.CollapseService/Trigger", post(trigger))
        .route("/tower.CollapseService/GetPending", post(get_pending))
        .route("/tower.CollapseService/Delay", post(delay))
        .route("/tower.CollapseService/PurchaseDelay", post(purchase_delay))
        .route("/tower.CollapseService/Status", post(status))
        .route("/tower.CollapseService/ApplyConfig", post(apply_config))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct TriggerRequest {
    pub world_id: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Defaults to `y`
    pub base_y: Option<i32>,
    /// Defaults to the configured countdown; clamped to the config bounds
    pub delay_seconds: Option<u64>,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    /// False when a collapse was already pending for this anchor
    pub scheduled: bool,
    pub error: Option<String>,
}

fn default_radius() -> i32 {
    128
}

#[derive(Deserialize)]
pub struct PendingRequest {
    pub world_id: String,
    pub x: i32,
    pub z: i32,
    #[serde(default = "default_radius")]
    pub radius: i32,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub success: bool,
    pub remaining_seconds: Option<u64>,
}

#[derive(Deserialize)]
pub struct DelayRequest {
    pub world_id: String,
    pub x: i32,
    pub z: i32,
    #[serde(default = "default_radius")]
    pub radius: i32,
    pub extra_seconds: u64,
}

#[derive(Serialize)]
pub struct DelayResponse {
    pub success: bool,
    pub remaining_seconds: Option<u64>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct PurchaseDelayRequest {
    pub world_id: String,
    pub actor_id: u64,
    pub sigils: Option<u32>,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub success: bool,
    /// Reply text, also delivered to the actor
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub structures: Vec<StructureStatus>,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub success: bool,
    /// Effective values after clamping
    pub config: CollapseConfig,
}

// ============================================================================
// Handlers
// ============================================================================

async fn trigger(State(state): State<ApiState>, Json(req): Json<TriggerRequest>) -> Json<TriggerResponse> {
    if state.worlds.get(&req.world_id).is_none() {
        return Json(TriggerResponse {
            success: false,
            scheduled: false,
            error: Some(format!("unknown world: {}", req.world_id)),
        });
    }
    let checked = check_anchor_y(f64::from(req.y))
        .and_then(|()| req.base_y.map_or(Ok(()), |b| check_anchor_y(f64::from(b))));
    if let Err(e) = checked {
        return Json(TriggerResponse {
            success: false,
            scheduled: false,
            error: Some(e),
        });
    }
    let scheduled = match req.delay_seconds {
        Some(requested) => {
            let (min, max) = CollapseConfig::DELAY_BOUNDS;
            let delay = requested.clamp(min, max);
            let key = StructureKey::new(req.world_id.as_str(), req.x, req.y, req.z);
            let scheduled = state
                .service
                .scheduler()
                .trigger(&key, req.base_y.unwrap_or(req.y), delay);
            if scheduled {
                info!(anchor = %key, delay, "Manual implosion triggered");
            }
            scheduled
        }
        None => state
            .service
            .trigger_manual(&req.world_id, req.x, req.y, req.z, req.base_y),
    };
    Json(TriggerResponse {
        success: true,
        scheduled,
        error: None,
    })
}

async fn get_pending(State(state): State<ApiState>, Json(req): Json<PendingRequest>) -> Json<PendingResponse> {
    let remaining = state
        .service
        .nearest_pending_remaining_seconds(&req.world_id, req.x, req.z, req.radius);
    Json(PendingResponse {
        success: true,
        remaining_seconds: remaining,
    })
}

async fn delay(State(state): State<ApiState>, Json(req): Json<DelayRequest>) -> Json<DelayResponse> {
    match state
        .service
        .delay_nearest_pending(&req.world_id, req.x, req.z, req.radius, req.extra_seconds)
    {
        Ok(remaining) => Json(DelayResponse {
            success: true,
            remaining_seconds: Some(remaining),
            error: None,
        }),
        Err(e) => Json(DelayResponse {
            success: false,
            remaining_seconds: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn purchase_delay(
    State(state): State<ApiState>,
    Json(req): Json<PurchaseDelayRequest>,
) -> Json<CommandResponse> {
    let service = Arc::clone(&state.service);
    let world_id = req.world_id.clone();
    let actor = req.actor_id;
    let sigils = req.sigils;
    let result = state
        .with_world(&req.world_id, move |w| {
            let position = w.actor_position(actor)?;
            let mut inventory = w.inventory_mut(actor)?;
            let message = service.purchase_delay(&world_id, position, sigils, &mut *inventory);
            drop(inventory);
            let _ = w.send_message(actor, &message);
            Some(message)
        })
        .await;
    Json(command_response(result, actor))
}

pub(crate) fn command_response(result: Result<Option<String>, String>, actor: u64) -> CommandResponse {
    match result {
        Ok(Some(message)) => CommandResponse {
            success: true,
            message: Some(message),
            error: None,
        },
        Ok(None) => CommandResponse {
            success: false,
            message: None,
            error: Some(format!("unknown actor: {actor}")),
        },
        Err(e) => CommandResponse {
            success: false,
            message: None,
            error: Some(e),
        },
    }
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        structures: state.service.status(),
    })
}

async fn apply_config(State(state): State<ApiState>, Json(req): Json<CollapseConfig>) -> Json<ConfigResponse> {
    state.service.apply_config(req);
    Json(ConfigResponse {
        success: true,
        config: state.service.scheduler().config(),
    })
}
