//! VaultService - gated container use and key forging
//!
//! Endpoints:
//! - POST /tower.VaultService/Use
//! - POST /tower.VaultService/ForgeKey
//! - POST /tower.VaultService/GetActor
//! - POST /tower.VaultService/GiveItem

use axum::{extract::State, routing::post, Json, Router};
use collapse_core::host::{ActorInventory, HostWorld};
use collapse_core::vault::{InteractionKind, VaultDecision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::collapse::{command_response, CommandResponse};
use super::ApiState;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/tower.VaultService/Use", post(use_block))
        .route("/tower.VaultService/ForgeKey", post(forge_key))
        .route("/tower.VaultService/GetActor", post(get_actor))
        .route("/tower.VaultService/GiveItem", post(give_item))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct UseRequest {
    pub world_id: String,
    pub actor_id: u64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub interaction: InteractionKind,
}

#[derive(Serialize)]
pub struct UseResponse {
    pub success: bool,
    pub allowed: bool,
    /// Text delivered to the actor, if any
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct ActorRequest {
    pub world_id: String,
    pub actor_id: u64,
}

#[derive(Serialize)]
pub struct ActorResponse {
    pub success: bool,
    pub items: HashMap<String, u32>,
    pub inbox: Vec<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct GiveItemRequest {
    pub world_id: String,
    pub actor_id: u64,
    pub item_id: String,
    pub amount: u32,
}

// ============================================================================
// Handlers
// ============================================================================

async fn use_block(State(state): State<ApiState>, Json(req): Json<UseRequest>) -> Json<UseResponse> {
    let service = Arc::clone(&state.service);
    let world_id = req.world_id.clone();
    let (actor, x, y, z, kind) = (req.actor_id, req.x, req.y, req.z, req.interaction);
    let result = state
        .with_world(&req.world_id, move |w| {
            // empty blocks are never gated
            let block_id = w.block(x, y, z).map(|b| b.material_id.clone()).unwrap_or_default();
            let mut inventory = w.inventory_mut(actor)?;
            let decision =
                service.on_vault_interaction(kind, &block_id, &world_id, x, y, z, actor, &mut *inventory);
            drop(inventory);
            let text = match &decision {
                VaultDecision::Allowed { message } => message.clone(),
                VaultDecision::Denied { warning } => warning.clone(),
            };
            if let Some(text) = &text {
                let _ = w.send_message(actor, text);
            }
            Some((decision.is_allowed(), text))
        })
        .await;

    match result {
        Ok(Some((allowed, message))) => Json(UseResponse {
            success: true,
            allowed,
            message,
            error: None,
        }),
        Ok(None) => Json(UseResponse {
            success: false,
            allowed: false,
            message: None,
            error: Some(format!("unknown actor: {actor}")),
        }),
        Err(e) => Json(UseResponse {
            success: false,
            allowed: false,
            message: None,
            error: Some(e),
        }),
    }
}

async fn forge_key(State(state): State<ApiState>, Json(req): Json<ActorRequest>) -> Json<CommandResponse> {
    let service = Arc::clone(&state.service);
    let actor = req.actor_id;
    let result = state
        .with_world(&req.world_id, move |w| {
            let mut inventory = w.inventory_mut(actor)?;
            let message = service.forge_key(&mut *inventory);
            drop(inventory);
            let _ = w.send_message(actor, &message);
            Some(message)
        })
        .await;
    Json(command_response(result, actor))
}

async fn get_actor(State(state): State<ApiState>, Json(req): Json<ActorRequest>) -> Json<ActorResponse> {
    let actor = req.actor_id;
    let result = state
        .with_world(&req.world_id, move |w| {
            let inventory = w.inventory(actor)?;
            Some((inventory.items, w.inbox(actor)))
        })
        .await;
    match result {
        Ok(Some((items, inbox))) => Json(ActorResponse {
            success: true,
            items,
            inbox,
            error: None,
        }),
        Ok(None) => Json(ActorResponse {
            success: false,
            items: HashMap::new(),
            inbox: Vec::new(),
            error: Some(format!("unknown actor: {actor}")),
        }),
        Err(e) => Json(ActorResponse {
            success: false,
            items: HashMap::new(),
            inbox: Vec::new(),
            error: Some(e),
        }),
    }
}

/// Admin grant, mainly for exercising the command flows
async fn give_item(State(state): State<ApiState>, Json(req): Json<GiveItemRequest>) -> Json<CommandResponse> {
    let actor = req.actor_id;
    let (item_id, amount) = (req.item_id, req.amount);
    let result = state
        .with_world(&req.world_id, move |w| {
            let mut inventory = w.inventory_mut(actor)?;
            if inventory.give(&item_id, amount) {
                Some(format!("Gave {amount} {item_id}."))
            } else {
                Some(format!("Inventory full; {item_id} not given."))
            }
        })
        .await;
    Json(command_response(result, actor))
}
