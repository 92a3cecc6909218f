//! Key-gated vault containers in the upper region of a tower.
//!
//! A container counts as a vault when its block id carries the vault prefix
//! and it sits inside the region of any known structure in the same world.
//! The first successful interaction at a position consumes the key; the
//! position then stays open for the rest of the process lifetime.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::VaultConfig;
use crate::host::{ActorId, ActorInventory};
use crate::state::TowerStateStore;

pub const UNLOCK_MESSAGE: &str = "You unlocked the tower vault using a Tower Key.";
pub const SEALED_MESSAGE: &str = "This chest is sealed. You need a Tower Key to open it.";

/// Packs a block position into one `u64`: 26 bits x, 26 bits z, 12 bits y
pub fn pack_block_pos(x: i32, y: i32, z: i32) -> u64 {
    let x = (x as i64 as u64) & 0x3FF_FFFF;
    let z = (z as i64 as u64) & 0x3FF_FFFF;
    let y = (y as i64 as u64) & 0xFFF;
    (x << 38) | (z << 12) | y
}

/// How the actor touched the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
    Use,
    Secondary,
    Primary,
    Pickup,
}

impl InteractionKind {
    /// Only opening interactions are gated
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Use | Self::Secondary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultDecision {
    /// `message` is set when this interaction consumed the key
    Allowed { message: Option<String> },
    /// `warning` is `None` while the actor's warn cooldown is running
    Denied { warning: Option<String> },
}

impl VaultDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    fn open() -> Self {
        Self::Allowed { message: None }
    }
}

/// Per-actor timestamp of the last "needs a key" warning
#[derive(Default)]
pub struct WarnCooldown {
    last: Mutex<HashMap<ActorId, i64>>,
}

impl WarnCooldown {
    /// True (and records `now_ms`) if the actor may be warned again
    pub fn try_warn(&self, actor: ActorId, now_ms: i64, cooldown_ms: i64) -> bool {
        let mut last = self.last.lock();
        match last.get(&actor) {
            Some(&prev) if now_ms - prev < cooldown_ms => false,
            _ => {
                last.insert(actor, now_ms);
                true
            }
        }
    }
}

pub struct VaultAccessController {
    store: Arc<TowerStateStore>,
    config: RwLock<VaultConfig>,
    unlocked: Mutex<HashMap<String, HashSet<u64>>>,
    warn_cooldown: WarnCooldown,
}

impl VaultAccessController {
    pub fn new(store: Arc<TowerStateStore>, config: VaultConfig) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            unlocked: Mutex::new(HashMap::new()),
            warn_cooldown: WarnCooldown::default(),
        }
    }

    pub fn config(&self) -> VaultConfig {
        self.config.read().clone()
    }

    pub fn apply_config(&self, config: VaultConfig) {
        *self.config.write() = config;
    }

    /// True if `(x, y, z)` lies in the upper region of any structure in
    /// `world_id`, scheduled or not.
    pub fn is_inside_vault_region(&self, world_id: &str, x: i32, y: i32, z: i32) -> bool {
        let (radius, below, above) = {
            let c = self.config.read();
            (c.region_radius, c.max_below_anchor, c.max_above_anchor)
        };
        let r_sq = (radius as f64) * (radius as f64);
        self.store.any(
            |key| key.world_id == world_id,
            |key, _| {
                key.horizontal_distance_sq(x as f64, z as f64) <= r_sq
                    && y >= key.y.saturating_sub(below)
                    && y <= key.y.saturating_add(above)
            },
        )
    }

    pub fn is_unlocked(&self, world_id: &str, x: i32, y: i32, z: i32) -> bool {
        self.unlocked
            .lock()
            .get(world_id)
            .is_some_and(|set| set.contains(&pack_block_pos(x, y, z)))
    }

    /// Full interaction filter: kind, block id prefix, then [`Self::try_unlock`]
    #[allow(clippy::too_many_arguments)]
    pub fn on_interaction(
        &self,
        kind: InteractionKind,
        block_id: &str,
        world_id: &str,
        x: i32,
        y: i32,
        z: i32,
        actor: ActorId,
        inventory: &mut dyn ActorInventory,
        now_ms: i64,
    ) -> VaultDecision {
        if !kind.is_gated() || !block_id.starts_with(self.config.read().container_prefix.as_str()) {
            return VaultDecision::open();
        }
        self.try_unlock(world_id, x, y, z, actor, inventory, now_ms)
    }

    /// Gates one container interaction. Positions outside every vault
    /// region and positions already unlocked are allowed without cost.
    #[allow(clippy::too_many_arguments)]
    pub fn try_unlock(
        &self,
        world_id: &str,
        x: i32,
        y: i32,
        z: i32,
        actor: ActorId,
        inventory: &mut dyn ActorInventory,
        now_ms: i64,
    ) -> VaultDecision {
        if !self.is_inside_vault_region(world_id, x, y, z) {
            return VaultDecision::open();
        }
        let (key_item, amount, cooldown_ms) = {
            let c = self.config.read();
            (c.key_item_id.clone(), c.keys_per_unlock, c.warn_cooldown_ms)
        };
        let packed = pack_block_pos(x, y, z);

        // held across check and consume so one key opens one position
        let mut unlocked = self.unlocked.lock();
        let set = unlocked.entry(world_id.to_string()).or_default();
        if set.contains(&packed) {
            return VaultDecision::open();
        }

        if !inventory.can_remove(&key_item, amount) || !inventory.remove(&key_item, amount) {
            let warning = self
                .warn_cooldown
                .try_warn(actor, now_ms, cooldown_ms)
                .then(|| SEALED_MESSAGE.to_string());
            debug!(world = world_id, x, y, z, actor, "Vault interaction denied");
            return VaultDecision::Denied { warning };
        }

        set.insert(packed);
        info!(world = world_id, x, y, z, actor, "Vault unlocked");
        VaultDecision::Allowed {
            message: Some(UNLOCK_MESSAGE.to_string()),
        }
    }

    pub fn unlocked_count(&self) -> usize {
        self.unlocked.lock().values().map(HashSet::len).sum()
    }
}
