//! In-memory host world
//!
//! ```text
//! SimWorld
//!  ├─ blocks:   HashMap<(x, y, z), SimBlock>   (empty = absent)
//!  ├─ unloaded: HashSet<(cx, cz)>              (32×32 chunks)
//!  ├─ ecs:      bevy World                     (players, creatures, drops, markers)
//!  └─ effects:  known particles/sounds + log of what played
//! ```
//!
//! Implements [`HostWorld`], so the collapse logic runs against it exactly as
//! it would against a live game server. Only ever touched from its
//! [`crate::world_runner::WorldRunner`] thread.

use bevy::prelude::*;
use collapse_core::anchor::GuardianIdentity;
use collapse_core::error::HostError;
use collapse_core::guardian::{choose_guardian, is_guardian_spawn_marker_id, is_guardian_type_id};
use collapse_core::host::{
    chunk_coord, ActorId, ActorSnapshot, BlockSnapshot, BlockStateKind, EntityCaps, EntityId,
    EntitySnapshot, HostWorld, SoundId,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::components::{
    Creature, DroppedItem, GuardianUuid, Inbox, Inventory, Player, Position, SpawnMarker,
    SpawnedByMarker,
};

pub const BRICK: &str = "Rock_Stone_Brick";
pub const FLOOR: &str = "Wood_Oak_Planks";
pub const VAULT_CHEST: &str = "Furniture_Village_Chest";
pub const DEFAULT_PLAYER_SLOTS: usize = 16;

/// Particle systems and sound events the simulated client knows
pub const KNOWN_PARTICLES: [&str; 3] = ["Explosion_Small", "Block_Break_Stone", "Impact_Explosion"];
pub const KNOWN_SOUNDS: [(&str, SoundId); 3] = [
    ("SFX_Golem_Earth_Slam_Impact", 11),
    ("SFX_Golem_Earth_Stomp_Impact", 12),
    ("SFX_Stone_Break", 13),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimBlock {
    pub material_id: String,
    pub state: Option<BlockStateKind>,
}

impl SimBlock {
    pub fn solid(material_id: &str) -> Self {
        Self {
            material_id: material_id.to_string(),
            state: None,
        }
    }

    pub fn container(material_id: &str) -> Self {
        Self {
            material_id: material_id.to_string(),
            state: Some(BlockStateKind::Container),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectEvent {
    Particle { id: String, position: [f64; 3] },
    Sound { id: SoundId, position: [f64; 3] },
}

/// What the death system knows about a guardian that just died
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefeatReport {
    pub identity: GuardianIdentity,
    pub position: [f64; 3],
    pub type_id: String,
}

pub struct SimWorld {
    id: String,
    blocks: HashMap<(i32, i32, i32), SimBlock>,
    unloaded: HashSet<(i32, i32)>,
    ecs: World,
    particles: HashSet<String>,
    sounds: HashMap<String, SoundId>,
    effects: Vec<EffectEvent>,
    torn_down: usize,
}

impl SimWorld {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blocks: HashMap::new(),
            unloaded: HashSet::new(),
            ecs: World::new(),
            particles: KNOWN_PARTICLES.iter().map(|p| p.to_string()).collect(),
            sounds: KNOWN_SOUNDS.iter().map(|(n, id)| (n.to_string(), *id)).collect(),
            effects: Vec::new(),
            torn_down: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: SimBlock) {
        self.blocks.insert((x, y, z), block);
    }

    pub fn block(&self, x: i32, y: i32, z: i32) -> Option<&SimBlock> {
        self.blocks.get(&(x, y, z))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn count_blocks(&self, material_prefix: &str) -> usize {
        self.blocks
            .values()
            .filter(|b| b.material_id.starts_with(material_prefix))
            .count()
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down
    }

    pub fn set_chunk_loaded(&mut self, cx: i32, cz: i32, loaded: bool) {
        if loaded {
            self.unloaded.remove(&(cx, cz));
        } else {
            self.unloaded.insert((cx, cz));
        }
    }

    fn is_loaded(&self, x: i32, z: i32) -> bool {
        !self.unloaded.contains(&(chunk_coord(x), chunk_coord(z)))
    }

    /// Flat ground: `surface` on top, `Rock_Stone` for `depth` layers below
    pub fn build_terrain(&mut self, min: i32, max: i32, ground_y: i32, depth: i32, surface: &str) {
        for x in min..=max {
            for z in min..=max {
                self.set_block(x, ground_y, z, SimBlock::solid(surface));
                for y in (ground_y - depth)..ground_y {
                    self.set_block(x, y, z, SimBlock::solid("Rock_Stone"));
                }
            }
        }
    }

    /// Square brick shell with wooden floors every sixth level and a vault
    /// chest on the top floor. Returns the chest position.
    pub fn build_tower(&mut self, cx: i32, cz: i32, base_y: i32, height: i32, half: i32) -> (i32, i32, i32) {
        let top = base_y + height - 1;
        for y in base_y..=top {
            let is_floor = (y - base_y) % 6 == 0;
            for x in (cx - half)..=(cx + half) {
                for z in (cz - half)..=(cz + half) {
                    let wall = (x - cx).abs() == half || (z - cz).abs() == half;
                    if wall {
                        self.set_block(x, y, z, SimBlock::solid(BRICK));
                    } else if is_floor {
                        self.set_block(x, y, z, SimBlock::solid(FLOOR));
                    }
                }
            }
        }
        let chest = (cx, top - 1, cz);
        self.set_block(chest.0, chest.1, chest.2, SimBlock::container(VAULT_CHEST));
        chest
    }

    // ========================================================================
    // Entities
    // ========================================================================

    fn entity(id: EntityId) -> Option<Entity> {
        Entity::try_from_bits(id).ok()
    }

    pub fn spawn_player(&mut self, actor_id: ActorId, name: &str, position: [f64; 3]) -> EntityId {
        self.ecs
            .spawn((
                Player {
                    actor_id,
                    name: name.to_string(),
                },
                Position(position),
                Inventory::with_slots(DEFAULT_PLAYER_SLOTS),
                Inbox::default(),
            ))
            .id()
            .to_bits()
    }

    pub fn spawn_creature(&mut self, type_id: &str, position: [f64; 3]) -> EntityId {
        self.ecs
            .spawn((
                Creature {
                    type_id: type_id.to_string(),
                },
                Position(position),
            ))
            .id()
            .to_bits()
    }

    /// Guardian with optional persistent uuid and source marker
    pub fn spawn_guardian(
        &mut self,
        type_id: &str,
        position: [f64; 3],
        uuid: Option<Uuid>,
        marker: Option<Uuid>,
    ) -> EntityId {
        let mut entity = self.ecs.spawn((
            Creature {
                type_id: type_id.to_string(),
            },
            Position(position),
        ));
        if let Some(uuid) = uuid {
            entity.insert(GuardianUuid(uuid));
        }
        if let Some(marker) = marker {
            entity.insert(SpawnedByMarker(marker));
        }
        entity.id().to_bits()
    }

    pub fn spawn_drop(&mut self, item_id: &str, amount: u32, position: [f64; 3]) -> EntityId {
        self.ecs
            .spawn((
                DroppedItem {
                    item_id: item_id.to_string(),
                    amount,
                },
                Position(position),
            ))
            .id()
            .to_bits()
    }

    pub fn spawn_marker(&mut self, marker_id: &str, uuid: Uuid, position: [f64; 3]) -> EntityId {
        self.ecs
            .spawn((
                SpawnMarker {
                    marker_id: marker_id.to_string(),
                    uuid,
                },
                Position(position),
            ))
            .id()
            .to_bits()
    }

    /// Spawns the guardian a marker stands for, with a fresh persistent
    /// uuid and a link back to the marker. Placeholder markers are
    /// randomized from their tier pool.
    pub fn spawn_from_marker<R: Rng + ?Sized>(&mut self, marker: EntityId, rng: &mut R) -> Option<EntityId> {
        let entity = Self::entity(marker)?;
        let spawn = self.ecs.get::<SpawnMarker>(entity)?.clone();
        let position = self.ecs.get::<Position>(entity)?.0;
        if !is_guardian_spawn_marker_id(&spawn.marker_id) {
            return None;
        }
        let type_id = choose_guardian(rng, &spawn.marker_id, is_guardian_type_id);
        Some(self.spawn_guardian(&type_id, position, Some(Uuid::new_v4()), Some(spawn.uuid)))
    }

    /// Spawn marker id and uuid
    pub fn marker(&self, id: EntityId) -> Option<SpawnMarker> {
        let entity = Self::entity(id)?;
        self.ecs.get::<SpawnMarker>(entity).cloned()
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        Self::entity(id).is_some_and(|e| self.ecs.get::<Position>(e).is_some())
    }

    pub fn entity_count(&self) -> usize {
        self.ecs.iter_entities().count()
    }

    /// Every identity channel the host can offer for a creature
    pub fn guardian_identity(&self, id: EntityId) -> Option<GuardianIdentity> {
        let entity = Self::entity(id)?;
        self.ecs.get::<Creature>(entity)?;
        let mut identity =
            GuardianIdentity::new(self.id.clone(), id).with_store_index(u64::from(entity.index()));
        if let Some(uuid) = self.ecs.get::<GuardianUuid>(entity) {
            identity = identity.with_uuid(uuid.0);
        }
        if let Some(marker) = self.ecs.get::<SpawnedByMarker>(entity) {
            identity = identity.with_marker(marker.0);
        }
        Some(identity)
    }

    /// Type id and position of a creature
    pub fn creature(&self, id: EntityId) -> Option<(String, [f64; 3])> {
        let entity = Self::entity(id)?;
        let type_id = self.ecs.get::<Creature>(entity)?.type_id.clone();
        let position = self.ecs.get::<Position>(entity)?.0;
        Some((type_id, position))
    }

    /// What a detection path sees of a creature, without touching it
    pub fn observe(&self, id: EntityId) -> Option<DefeatReport> {
        let identity = self.guardian_identity(id)?;
        let (type_id, position) = self.creature(id)?;
        Some(DefeatReport {
            identity,
            position,
            type_id,
        })
    }

    /// Kills a creature and reports what the death system observed
    pub fn defeat(&mut self, id: EntityId) -> Option<DefeatReport> {
        let report = self.observe(id)?;
        let entity = Self::entity(id)?;
        self.ecs.despawn(entity);
        Some(report)
    }

    fn player_entity(&self, actor: ActorId) -> Option<Entity> {
        self.ecs
            .iter_entities()
            .find(|e| e.get::<Player>().is_some_and(|p| p.actor_id == actor))
            .map(|e| e.id())
    }

    pub fn actor_position(&self, actor: ActorId) -> Option<[f64; 3]> {
        let entity = self.player_entity(actor)?;
        self.ecs.get::<Position>(entity).map(|p| p.0)
    }

    pub fn inventory_mut(&mut self, actor: ActorId) -> Option<Mut<'_, Inventory>> {
        let entity = self.player_entity(actor)?;
        self.ecs.get_mut::<Inventory>(entity)
    }

    pub fn inventory(&self, actor: ActorId) -> Option<Inventory> {
        let entity = self.player_entity(actor)?;
        self.ecs.get::<Inventory>(entity).cloned()
    }

    pub fn inbox(&self, actor: ActorId) -> Vec<String> {
        self.player_entity(actor)
            .and_then(|e| self.ecs.get::<Inbox>(e))
            .map(|inbox| inbox.0.clone())
            .unwrap_or_default()
    }

    pub fn effects(&self) -> &[EffectEvent] {
        &self.effects
    }
}

impl HostWorld for SimWorld {
    fn world_id(&self) -> &str {
        &self.id
    }

    fn block_at(&self, x: i32, y: i32, z: i32) -> Option<BlockSnapshot> {
        if !self.is_loaded(x, z) {
            return None;
        }
        self.blocks.get(&(x, y, z)).map(|b| BlockSnapshot {
            material_id: b.material_id.clone(),
            state: b.state,
        })
    }

    fn teardown_block_state(&mut self, x: i32, y: i32, z: i32) {
        if let Some(block) = self.blocks.get_mut(&(x, y, z)) {
            if block.state.take().is_some() {
                self.torn_down += 1;
            }
        }
    }

    fn clear_block(&mut self, x: i32, y: i32, z: i32) -> Result<(), HostError> {
        if !self.is_loaded(x, z) {
            return Err(HostError::RegionNotLoaded);
        }
        self.blocks.remove(&(x, y, z));
        Ok(())
    }

    fn entities_in_chunk(&self, cx: i32, cz: i32) -> Option<Vec<EntitySnapshot>> {
        if self.unloaded.contains(&(cx, cz)) {
            return None;
        }
        let found = self
            .ecs
            .iter_entities()
            .filter_map(|e| {
                let position = e.get::<Position>()?.0;
                if chunk_coord(position[0].floor() as i32) != cx
                    || chunk_coord(position[2].floor() as i32) != cz
                {
                    return None;
                }
                Some(EntitySnapshot {
                    id: e.id().to_bits(),
                    position,
                    caps: EntityCaps {
                        player: e.contains::<Player>(),
                        creature: e.contains::<Creature>(),
                        dropped_item: e.contains::<DroppedItem>(),
                        spawn_marker: e.contains::<SpawnMarker>(),
                    },
                })
            })
            .collect();
        Some(found)
    }

    fn remove_entity(&mut self, id: EntityId) -> Result<(), HostError> {
        let entity = Self::entity(id).ok_or(HostError::MissingComponent)?;
        if self.ecs.despawn(entity) {
            Ok(())
        } else {
            Err(HostError::MissingComponent)
        }
    }

    fn actors(&self) -> Vec<ActorSnapshot> {
        self.ecs
            .iter_entities()
            .filter_map(|e| {
                let player = e.get::<Player>()?;
                let position = e.get::<Position>()?;
                Some(ActorSnapshot {
                    id: player.actor_id,
                    position: position.0,
                })
            })
            .collect()
    }

    fn send_message(&mut self, actor: ActorId, text: &str) -> Result<(), HostError> {
        let entity = self.player_entity(actor).ok_or(HostError::MissingComponent)?;
        let mut inbox = self
            .ecs
            .get_mut::<Inbox>(entity)
            .ok_or(HostError::MissingComponent)?;
        inbox.0.push(text.to_string());
        Ok(())
    }

    fn play_particle(&mut self, particle_id: &str, position: [f64; 3]) -> Result<(), HostError> {
        if !self.particles.contains(particle_id) {
            return Err(HostError::UnknownEffect(particle_id.to_string()));
        }
        self.effects.push(EffectEvent::Particle {
            id: particle_id.to_string(),
            position,
        });
        Ok(())
    }

    fn resolve_sound(&self, name: &str) -> Option<SoundId> {
        self.sounds.get(name).copied()
    }

    fn play_sound(&mut self, sound: SoundId, position: [f64; 3]) -> Result<(), HostError> {
        self.effects.push(EffectEvent::Sound { id: sound, position });
        Ok(())
    }
}
