//! Host world capabilities
//!
//! The collapse logic never touches a concrete game engine. It talks to the
//! host through the traits below:
//!
//! ```text
//! Scheduler thread (timers)
//!       │ submit(WorldJob)
//!       ▼
//! WorldContext ──► serialized per-world executor
//!                        │
//!                        ▼
//!                  &mut dyn HostWorld  (blocks, entities, actors, effects)
//! ```
//!
//! Every block/entity read or write happens inside a [`WorldJob`], so
//! mutations of a single world are never concurrent with each other.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::HostError;

/// Entity identifier as reported by the host
pub type EntityId = u64;
/// Actor (player) identifier
pub type ActorId = u64;
/// Resolved sound handle
pub type SoundId = u32;

/// Horizontal size of an entity chunk, in blocks
pub const CHUNK_SIZE: i32 = 32;

/// Chunk coordinate containing a block coordinate
pub fn chunk_coord(block: i32) -> i32 {
    block.div_euclid(CHUNK_SIZE)
}

// ============================================================================
// Snapshots
// ============================================================================

/// Extended state attached to a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStateKind {
    /// Holds items (chests, vaults)
    Container,
    /// Has a destroy hook that must run before clearing
    Destroyable,
    Other,
}

/// Material and extended state of one non-empty block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub material_id: String,
    pub state: Option<BlockStateKind>,
}

impl BlockSnapshot {
    pub fn new(material_id: impl Into<String>) -> Self {
        Self {
            material_id: material_id.into(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: BlockStateKind) -> Self {
        self.state = Some(state);
        self
    }

    pub fn is_container(&self) -> bool {
        self.state == Some(BlockStateKind::Container)
    }
}

/// Capabilities an entity carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCaps {
    pub player: bool,
    pub creature: bool,
    pub dropped_item: bool,
    pub spawn_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub position: [f64; 3],
    pub caps: EntityCaps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub position: [f64; 3],
}

// ============================================================================
// Capabilities
// ============================================================================

/// Access to one world. Only ever used from inside that world's serialized
/// execution context.
pub trait HostWorld {
    fn world_id(&self) -> &str;

    /// `None` for empty blocks and blocks in unloaded regions
    fn block_at(&self, x: i32, y: i32, z: i32) -> Option<BlockSnapshot>;

    /// Runs the block's destroy hook and drops its extended state
    fn teardown_block_state(&mut self, x: i32, y: i32, z: i32);

    fn clear_block(&mut self, x: i32, y: i32, z: i32) -> Result<(), HostError>;

    /// `None` when the chunk is not loaded
    fn entities_in_chunk(&self, cx: i32, cz: i32) -> Option<Vec<EntitySnapshot>>;

    fn remove_entity(&mut self, id: EntityId) -> Result<(), HostError>;

    fn actors(&self) -> Vec<ActorSnapshot>;

    fn send_message(&mut self, actor: ActorId, text: &str) -> Result<(), HostError>;

    fn play_particle(&mut self, particle_id: &str, position: [f64; 3]) -> Result<(), HostError>;

    fn resolve_sound(&self, name: &str) -> Option<SoundId>;

    fn play_sound(&mut self, sound: SoundId, position: [f64; 3]) -> Result<(), HostError>;
}

/// Unit of work executed inside a world's serialized context
pub type WorldJob = Box<dyn FnOnce(&mut dyn HostWorld) + Send + 'static>;

/// Submission handle for a world's serialized context
pub trait WorldContext: Send + Sync {
    fn world_id(&self) -> &str;

    fn submit(&self, job: WorldJob) -> Result<(), HostError>;
}

/// Run `f` inside the world's context and wait for its result.
pub async fn run_in_world<T, F>(ctx: &dyn WorldContext, f: F) -> Result<T, HostError>
where
    F: FnOnce(&mut dyn HostWorld) -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    ctx.submit(Box::new(move |world| {
        let _ = tx.send(f(world));
    }))?;
    rx.await
        .map_err(|_| HostError::WorldClosed(ctx.world_id().to_string()))
}

/// Directory of live worlds, consulted by the scheduler thread
#[derive(Default)]
pub struct WorldRegistry {
    worlds: RwLock<HashMap<String, Arc<dyn WorldContext>>>,
}

impl WorldRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, ctx: Arc<dyn WorldContext>) {
        self.worlds.write().insert(ctx.world_id().to_string(), ctx);
    }

    pub fn unregister(&self, world_id: &str) -> Option<Arc<dyn WorldContext>> {
        self.worlds.write().remove(world_id)
    }

    pub fn get(&self, world_id: &str) -> Option<Arc<dyn WorldContext>> {
        self.worlds.read().get(world_id).cloned()
    }

    pub fn world_ids(&self) -> Vec<String> {
        self.worlds.read().keys().cloned().collect()
    }
}

/// Item access for the actor performing a command or interaction
pub trait ActorInventory {
    fn can_remove(&self, item_id: &str, amount: u32) -> bool;

    /// Removes exactly `amount`, or nothing
    fn remove(&mut self, item_id: &str, amount: u32) -> bool;

    fn give(&mut self, item_id: &str, amount: u32) -> bool;
}
