//! ECS components for entities in the simulated world.
//!
//! Blocks live in a plain map on [`crate::sim_world::SimWorld`]; everything
//! that moves (players, creatures, dropped items, spawn markers) is a bevy
//! entity carrying some of these.

use bevy::prelude::*;
use collapse_core::host::{ActorId, ActorInventory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// World-space position (feet)
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Position(pub [f64; 3]);

/// Connected player
#[derive(Component, Serialize, Deserialize, Debug, Clone)]
pub struct Player {
    pub actor_id: ActorId,
    pub name: String,
}

/// Any NPC; guardians are creatures whose type is on the roster
#[derive(Component, Serialize, Deserialize, Debug, Clone)]
pub struct Creature {
    pub type_id: String,
}

#[derive(Component, Serialize, Deserialize, Debug, Clone)]
pub struct DroppedItem {
    pub item_id: String,
    pub amount: u32,
}

/// Spawn point baked into a structure
#[derive(Component, Serialize, Deserialize, Debug, Clone)]
pub struct SpawnMarker {
    pub marker_id: String,
    pub uuid: Uuid,
}

/// Persistent identity; not every creature has one
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy)]
pub struct GuardianUuid(pub Uuid);

/// Marker the creature was spawned from
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy)]
pub struct SpawnedByMarker(pub Uuid);

/// Player item stacks, limited to `slots` distinct item kinds
#[derive(Component, Serialize, Deserialize, Debug, Clone, Default)]
pub struct Inventory {
    pub items: HashMap<String, u32>,
    pub slots: usize,
}

impl Inventory {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            items: HashMap::new(),
            slots,
        }
    }

    pub fn count(&self, item_id: &str) -> u32 {
        self.items.get(item_id).copied().unwrap_or(0)
    }
}

impl ActorInventory for Inventory {
    fn can_remove(&self, item_id: &str, amount: u32) -> bool {
        self.count(item_id) >= amount
    }

    fn remove(&mut self, item_id: &str, amount: u32) -> bool {
        let held = self.count(item_id);
        if held < amount {
            return false;
        }
        if held == amount {
            self.items.remove(item_id);
        } else {
            self.items.insert(item_id.to_string(), held - amount);
        }
        true
    }

    fn give(&mut self, item_id: &str, amount: u32) -> bool {
        if !self.items.contains_key(item_id) && self.items.len() >= self.slots {
            return false;
        }
        *self.items.entry(item_id.to_string()).or_default() += amount;
        true
    }
}

/// Chat messages delivered to a player
#[derive(Component, Serialize, Deserialize, Debug, Clone, Default)]
pub struct Inbox(pub Vec<String>);
