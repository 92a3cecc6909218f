//! GuardianService - anchors and defeat reports
//!
//! Endpoints:
//! - POST /tower.GuardianService/RegisterAnchor
//! - POST /tower.GuardianService/RegisterMarker
//! - POST /tower.GuardianService/ReportDefeat

use axum::{extract::State, routing::post, Json, Router};
use collapse_core::service::{DefeatOutcome, DefeatSource};
use collapse_core::state::StructureKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{check_anchor_y, ApiState};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/tower.GuardianService/RegisterAnchor", post(register_anchor))
        .route("/tower.GuardianService/RegisterMarker", post(register_marker))
        .route("/tower.GuardianService/ReportDefeat", post(report_defeat))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterAnchorRequest {
    pub world_id: String,
    pub entity_id: u64,
    /// Defaults to the guardian's current position
    pub anchor: Option<[f64; 3]>,
}

#[derive(Deserialize)]
pub struct RegisterMarkerRequest {
    pub world_id: String,
    pub marker_uuid: Uuid,
    pub anchor: [f64; 3],
}

#[derive(Serialize)]
pub struct AnchorResponse {
    pub success: bool,
    pub anchor: Option<StructureKey>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct ReportDefeatRequest {
    pub world_id: String,
    pub entity_id: u64,
    pub source: DefeatSource,
}

#[derive(Serialize)]
pub struct ReportDefeatResponse {
    pub success: bool,
    pub outcome: Option<DefeatOutcome>,
    pub error: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn register_anchor(
    State(state): State<ApiState>,
    Json(req): Json<RegisterAnchorRequest>,
) -> Json<AnchorResponse> {
    if let Some(Err(e)) = req.anchor.map(|a| check_anchor_y(a[1])) {
        return Json(anchor_error(e));
    }
    let entity_id = req.entity_id;
    let found = state
        .with_world(&req.world_id, move |w| {
            let identity = w.guardian_identity(entity_id)?;
            let (type_id, position) = w.creature(entity_id)?;
            Some((identity, type_id, position))
        })
        .await;

    let (identity, type_id, position) = match found {
        Ok(Some(found)) => found,
        Ok(None) => return Json(anchor_error(format!("no creature with id {entity_id}"))),
        Err(e) => return Json(anchor_error(e)),
    };
    match state
        .service
        .register_anchor(&identity, &type_id, req.anchor.unwrap_or(position))
    {
        Some(key) => Json(AnchorResponse {
            success: true,
            anchor: Some(key),
            error: None,
        }),
        None => Json(anchor_error(format!("{type_id} is not a tower guardian"))),
    }
}

async fn register_marker(
    State(state): State<ApiState>,
    Json(req): Json<RegisterMarkerRequest>,
) -> Json<AnchorResponse> {
    if state.worlds.get(&req.world_id).is_none() {
        return Json(anchor_error(format!("unknown world: {}", req.world_id)));
    }
    if let Err(e) = check_anchor_y(req.anchor[1]) {
        return Json(anchor_error(e));
    }
    let key = state
        .service
        .register_marker_anchor(&req.world_id, req.marker_uuid, req.anchor);
    Json(AnchorResponse {
        success: true,
        anchor: Some(key),
        error: None,
    })
}

fn anchor_error(error: String) -> AnchorResponse {
    AnchorResponse {
        success: false,
        anchor: None,
        error: Some(error),
    }
}

/// Death reports remove the creature; scans and removal events only observe it
async fn report_defeat(
    State(state): State<ApiState>,
    Json(req): Json<ReportDefeatRequest>,
) -> Json<ReportDefeatResponse> {
    let entity_id = req.entity_id;
    let source = req.source;
    let found = state
        .with_world(&req.world_id, move |w| match source {
            DefeatSource::Death => w.defeat(entity_id),
            DefeatSource::Removal | DefeatSource::PeriodicScan => w.observe(entity_id),
        })
        .await;

    match found {
        Ok(Some(report)) => {
            let outcome = state.service.on_guardian_defeated(
                &report.identity,
                report.position,
                &report.type_id,
                source,
            );
            Json(ReportDefeatResponse {
                success: true,
                outcome: Some(outcome),
                error: None,
            })
        }
        Ok(None) => Json(ReportDefeatResponse {
            success: false,
            outcome: None,
            error: Some(format!("no creature with id {entity_id}")),
        }),
        Err(e) => Json(ReportDefeatResponse {
            success: false,
            outcome: None,
            error: Some(e),
        }),
    }
}
