//! Entry points the host calls into
//!
//! ```text
//! death system ───────┐
//! removal event ──────┼─► on_guardian_defeated ─► DefeatedGuardianSet ─► AnchorRegistry ─► CollapseScheduler
//! periodic scan ──────┘
//! placement/spawn ────────► register_anchor / register_marker_anchor ─► AnchorRegistry + TowerStateStore
//! player commands ────────► purchase_delay / forge_key
//! block interactions ─────► on_vault_interaction ─► VaultAccessController
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anchor::{AnchorRegistry, DefeatedGuardianSet, GuardianIdentity};
use crate::config::{CollapseConfig, EconomyConfig, VaultConfig};
use crate::error::CollapseError;
use crate::guardian::is_guardian_type_id;
use crate::host::{ActorId, ActorInventory, WorldRegistry};
use crate::scheduler::CollapseScheduler;
use crate::state::{CollapsePhase, StructureKey, StructureStatus, TowerStateStore};
use crate::vault::{InteractionKind, VaultAccessController, VaultDecision};

/// Which detection path reported the defeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefeatSource {
    Death,
    Removal,
    PeriodicScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefeatOutcome {
    /// Type id is not on the guardian roster
    NotAGuardian,
    /// Another detection path already handled this guardian
    AlreadyHandled,
    /// No anchor recorded for this guardian; nothing collapses
    NoAnchor,
    Scheduled(StructureKey),
    /// Anchor resolved but its collapse was already pending
    AlreadyScheduled(StructureKey),
}

pub mod replies {
    pub const NO_PENDING: &str = "No pending tower implosion nearby to delay.";
    pub const DELAY_REFUNDED: &str = "Could not delay (implosion already started). Refunded sigils.";
    pub const DELAY_AT_CAP: &str = "Tower implosion is already delayed as far as it goes. Refunded sigils.";
    pub const FORGE_COST: &str = "Cost: 5 Tower Sigils + 1 Tower Core.";
    pub const FORGE_REFUNDED: &str = "Inventory full. Refunded materials.";
    pub const FORGED: &str = "Forged 1 Tower Key (spent 5 Sigils + 1 Core).";

    pub fn need_sigils(n: u32) -> String {
        format!("You need {n} Tower Sigil(s) to do that.")
    }

    pub fn delayed(n: u32, remaining: u64) -> String {
        format!("Spent {n} Tower Sigil(s). Tower implosion delayed; now ~{remaining} seconds remaining.")
    }
}

pub struct TowerCollapseService {
    anchors: AnchorRegistry,
    defeated: DefeatedGuardianSet,
    scheduler: Arc<CollapseScheduler>,
    vault: VaultAccessController,
    economy: RwLock<EconomyConfig>,
}

impl TowerCollapseService {
    pub fn new(
        worlds: Arc<WorldRegistry>,
        runtime: Handle,
        collapse: CollapseConfig,
        vault: VaultConfig,
        economy: EconomyConfig,
    ) -> Self {
        let store = TowerStateStore::new();
        let scheduler = CollapseScheduler::new(Arc::clone(&store), worlds, runtime, collapse);
        Self {
            anchors: AnchorRegistry::new(),
            defeated: DefeatedGuardianSet::new(),
            scheduler,
            vault: VaultAccessController::new(store, vault),
            economy: RwLock::new(economy),
        }
    }

    pub fn scheduler(&self) -> &Arc<CollapseScheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<TowerStateStore> {
        self.scheduler.store()
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn vault(&self) -> &VaultAccessController {
        &self.vault
    }

    pub fn economy(&self) -> EconomyConfig {
        self.economy.read().clone()
    }

    // ========================================================================
    // Anchors
    // ========================================================================

    /// Records a spawned guardian's tower. Non-roster types are ignored.
    pub fn register_anchor(
        &self,
        identity: &GuardianIdentity,
        type_id: &str,
        anchor_position: [f64; 3],
    ) -> Option<StructureKey> {
        if !is_guardian_type_id(type_id) {
            return None;
        }
        let key = StructureKey::from_position(identity.world_id.clone(), anchor_position);
        self.track_structure(&key);
        self.anchors.register_anchor(identity, &key);
        debug!(anchor = %key, type_id, "Guardian anchor registered");
        Some(key)
    }

    /// Records the tower of a spawn marker whose guardian does not exist yet
    pub fn register_marker_anchor(
        &self,
        world_id: &str,
        marker_uuid: Uuid,
        anchor_position: [f64; 3],
    ) -> StructureKey {
        let key = self
            .anchors
            .register_marker_anchor(world_id, marker_uuid, anchor_position);
        self.track_structure(&key);
        debug!(anchor = %key, marker = %marker_uuid, "Marker anchor registered");
        key
    }

    /// Creates the entry so vault detection works before any defeat
    fn track_structure(&self, key: &StructureKey) {
        let shared = self.store().get_or_create(key);
        let mut state = shared.lock();
        if state.phase == CollapsePhase::Idle {
            state.base_y = key.y;
        }
    }

    // ========================================================================
    // Collapse triggers
    // ========================================================================

    /// Idempotent across every detection path
    pub fn on_guardian_defeated(
        &self,
        identity: &GuardianIdentity,
        position: [f64; 3],
        type_id: &str,
        source: DefeatSource,
    ) -> DefeatOutcome {
        if !is_guardian_type_id(type_id) {
            return DefeatOutcome::NotAGuardian;
        }
        if self.defeated.contains(identity) {
            debug!(world = %identity.world_id, type_id, ?source, "Guardian defeat already handled");
            return DefeatOutcome::AlreadyHandled;
        }

        let Some(key) = self.anchors.resolve(identity) else {
            if source == DefeatSource::Death {
                warn!(
                    world = %identity.world_id,
                    type_id,
                    x = position[0],
                    y = position[1],
                    z = position[2],
                    "Guardian defeated but no tower anchor found"
                );
            }
            return DefeatOutcome::NoAnchor;
        };
        self.defeated.mark(identity);

        let scheduled = self.scheduler.trigger_default(&key, key.y);
        self.anchors.forget(identity);

        if scheduled {
            info!(anchor = %key, type_id, ?source, "Tower guardian defeated; collapse scheduled");
            DefeatOutcome::Scheduled(key)
        } else {
            DefeatOutcome::AlreadyScheduled(key)
        }
    }

    /// Operator trigger; `base_y` defaults to the anchor's y
    pub fn trigger_manual(&self, world_id: &str, x: i32, y: i32, z: i32, base_y: Option<i32>) -> bool {
        let key = StructureKey::new(world_id, x, y, z);
        let base_y = base_y.unwrap_or(y);
        let scheduled = self.scheduler.trigger_default(&key, base_y);
        if scheduled {
            info!(anchor = %key, base_y, "Manual implosion triggered");
        }
        scheduled
    }

    pub fn nearest_pending_remaining_seconds(&self, world_id: &str, x: i32, z: i32, radius: i32) -> Option<u64> {
        self.scheduler.nearest_pending_remaining_seconds(world_id, x, z, radius)
    }

    pub fn delay_nearest_pending(
        &self,
        world_id: &str,
        x: i32,
        z: i32,
        radius: i32,
        extra_secs: u64,
    ) -> Result<u64, CollapseError> {
        self.scheduler.delay_nearest_pending(world_id, x, z, radius, extra_secs)
    }

    // ========================================================================
    // Player commands
    // ========================================================================

    /// Spends sigils to push back the closest pending collapse. The reply
    /// text is returned for the caller to deliver.
    pub fn purchase_delay(
        &self,
        world_id: &str,
        position: [f64; 3],
        requested_sigils: Option<u32>,
        inventory: &mut dyn ActorInventory,
    ) -> String {
        let economy = self.economy();
        let sigils = requested_sigils.unwrap_or(1).clamp(1, economy.max_sigils.max(1));
        let extra_secs = u64::from(sigils) * economy.seconds_per_sigil;
        let x = position[0].floor() as i32;
        let z = position[2].floor() as i32;
        let radius = economy.delay_search_radius;

        if self.nearest_pending_remaining_seconds(world_id, x, z, radius).is_none() {
            return replies::NO_PENDING.to_string();
        }
        if !inventory.remove(&economy.sigil_item_id, sigils) {
            return replies::need_sigils(sigils);
        }

        match self.delay_nearest_pending(world_id, x, z, radius, extra_secs) {
            Ok(remaining) => replies::delayed(sigils, remaining),
            Err(e) => {
                inventory.give(&economy.sigil_item_id, sigils);
                debug!(world = world_id, error = %e, "Delay purchase refunded");
                match e {
                    CollapseError::DelayCapReached => replies::DELAY_AT_CAP.to_string(),
                    _ => replies::DELAY_REFUNDED.to_string(),
                }
            }
        }
    }

    /// Sigils + core → one vault key, refunding on partial failure
    pub fn forge_key(&self, inventory: &mut dyn ActorInventory) -> String {
        let economy = self.economy();
        let key_item = self.vault.config().key_item_id;
        let (sigil, sigil_cost) = (economy.sigil_item_id.as_str(), economy.forge_sigil_cost);
        let (core, core_cost) = (economy.core_item_id.as_str(), economy.forge_core_cost);

        if !inventory.can_remove(sigil, sigil_cost) || !inventory.can_remove(core, core_cost) {
            return replies::FORGE_COST.to_string();
        }
        if !inventory.remove(sigil, sigil_cost) {
            return replies::FORGE_COST.to_string();
        }
        if !inventory.remove(core, core_cost) {
            inventory.give(sigil, sigil_cost);
            return replies::FORGE_COST.to_string();
        }
        if !inventory.give(&key_item, 1) {
            inventory.give(sigil, sigil_cost);
            inventory.give(core, core_cost);
            return replies::FORGE_REFUNDED.to_string();
        }
        replies::FORGED.to_string()
    }

    // ========================================================================
    // Vaults
    // ========================================================================

    pub fn is_inside_vault_region(&self, world_id: &str, x: i32, y: i32, z: i32) -> bool {
        self.vault.is_inside_vault_region(world_id, x, y, z)
    }

    pub fn try_unlock(
        &self,
        world_id: &str,
        x: i32,
        y: i32,
        z: i32,
        actor: ActorId,
        inventory: &mut dyn ActorInventory,
    ) -> VaultDecision {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.vault.try_unlock(world_id, x, y, z, actor, inventory, now_ms)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_vault_interaction(
        &self,
        kind: InteractionKind,
        block_id: &str,
        world_id: &str,
        x: i32,
        y: i32,
        z: i32,
        actor: ActorId,
        inventory: &mut dyn ActorInventory,
    ) -> VaultDecision {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.vault
            .on_interaction(kind, block_id, world_id, x, y, z, actor, inventory, now_ms)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn apply_config(&self, collapse: CollapseConfig) {
        self.scheduler.apply_config(collapse);
    }

    pub fn apply_economy(&self, economy: EconomyConfig) {
        *self.economy.write() = economy;
    }

    pub fn status(&self) -> Vec<StructureStatus> {
        self.scheduler.status()
    }

    /// Abrupt teardown: timers, structures, anchors and defeat records
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.anchors.clear();
        self.defeated.clear();
        info!("Tower collapse service shut down");
    }
}
