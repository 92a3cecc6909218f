//! In-memory `HostWorld` and a synchronous `WorldContext` for unit tests.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::HostError;
use crate::host::{
    chunk_coord, ActorId, ActorSnapshot, BlockSnapshot, EntityCaps, EntityId, EntitySnapshot,
    HostWorld, SoundId, WorldContext, WorldJob,
};

#[derive(Default)]
pub struct MockWorld {
    pub id: String,
    pub blocks: HashMap<(i32, i32, i32), BlockSnapshot>,
    pub entities: HashMap<EntityId, EntitySnapshot>,
    pub extra_chunk_refs: Vec<(EntityId, i32, i32)>,
    pub unloaded: HashSet<(i32, i32)>,
    pub actors: Vec<ActorSnapshot>,
    pub messages: Vec<(ActorId, String)>,
    pub known_particles: HashSet<String>,
    pub sounds: HashMap<String, SoundId>,
    pub particles: Vec<(String, [f64; 3])>,
    pub played_sounds: Vec<SoundId>,
    pub torn_down: Vec<(i32, i32, i32)>,
    pub fail_clear: HashSet<(i32, i32, i32)>,
    pub fail_remove: HashSet<EntityId>,
    pub fail_sounds: bool,
    pub fail_messages: HashSet<ActorId>,
}

impl MockWorld {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, x: i32, y: i32, z: i32, block: BlockSnapshot) {
        self.blocks.insert((x, y, z), block);
    }

    pub fn get(&self, x: i32, y: i32, z: i32) -> Option<&BlockSnapshot> {
        self.blocks.get(&(x, y, z))
    }

    pub fn fill_column(&mut self, x: i32, z: i32, y0: i32, y1: i32, material: &str) {
        for y in y0..=y1 {
            self.set(x, y, z, BlockSnapshot::new(material));
        }
    }

    /// Square outline of half-extent `half` for every Y in `[y0, y1]`
    pub fn build_ring(&mut self, cx: i32, cz: i32, y0: i32, y1: i32, half: i32, material: &str) {
        for y in y0..=y1 {
            for x in (cx - half)..=(cx + half) {
                for z in (cz - half)..=(cz + half) {
                    if (x - cx).abs() == half || (z - cz).abs() == half {
                        self.set(x, y, z, BlockSnapshot::new(material));
                    }
                }
            }
        }
    }

    pub fn build_flat_ground(&mut self, min: i32, max: i32, y: i32, material: &str) {
        for x in min..=max {
            for z in min..=max {
                self.set(x, y, z, BlockSnapshot::new(material));
            }
        }
    }

    pub fn count_material(&self, prefix: &str) -> usize {
        self.blocks
            .values()
            .filter(|b| b.material_id.starts_with(prefix))
            .count()
    }

    pub fn spawn_entity(&mut self, id: EntityId, position: [f64; 3], caps: EntityCaps) {
        self.entities.insert(id, EntitySnapshot { id, position, caps });
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn duplicate_into_chunk(&mut self, id: EntityId, cx: i32, cz: i32) {
        self.extra_chunk_refs.push((id, cx, cz));
    }

    pub fn unload_chunk(&mut self, cx: i32, cz: i32) {
        self.unloaded.insert((cx, cz));
    }

    pub fn add_actor(&mut self, id: ActorId, position: [f64; 3]) {
        self.actors.push(ActorSnapshot { id, position });
    }

    pub fn messages_for(&self, actor: ActorId) -> Vec<String> {
        self.messages
            .iter()
            .filter(|(a, _)| *a == actor)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn loaded(&self, x: i32, z: i32) -> bool {
        !self.unloaded.contains(&(chunk_coord(x), chunk_coord(z)))
    }
}

impl HostWorld for MockWorld {
    fn world_id(&self) -> &str {
        &self.id
    }

    fn block_at(&self, x: i32, y: i32, z: i32) -> Option<BlockSnapshot> {
        if !self.loaded(x, z) {
            return None;
        }
        self.blocks.get(&(x, y, z)).cloned()
    }

    fn teardown_block_state(&mut self, x: i32, y: i32, z: i32) {
        self.torn_down.push((x, y, z));
        if let Some(b) = self.blocks.get_mut(&(x, y, z)) {
            b.state = None;
        }
    }

    fn clear_block(&mut self, x: i32, y: i32, z: i32) -> Result<(), HostError> {
        if self.fail_clear.contains(&(x, y, z)) {
            return Err(HostError::Rejected("locked".into()));
        }
        self.blocks.remove(&(x, y, z));
        Ok(())
    }

    fn entities_in_chunk(&self, cx: i32, cz: i32) -> Option<Vec<EntitySnapshot>> {
        if self.unloaded.contains(&(cx, cz)) {
            return None;
        }
        let mut out: Vec<EntitySnapshot> = self
            .entities
            .values()
            .filter(|e| {
                chunk_coord(e.position[0].floor() as i32) == cx
                    && chunk_coord(e.position[2].floor() as i32) == cz
            })
            .cloned()
            .collect();
        for (id, x, z) in &self.extra_chunk_refs {
            if (*x, *z) == (cx, cz) {
                if let Some(e) = self.entities.get(id) {
                    out.push(e.clone());
                }
            }
        }
        Some(out)
    }

    fn remove_entity(&mut self, id: EntityId) -> Result<(), HostError> {
        if self.fail_remove.contains(&id) {
            return Err(HostError::Rejected("pinned".into()));
        }
        self.entities
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::MissingComponent)
    }

    fn actors(&self) -> Vec<ActorSnapshot> {
        self.actors.clone()
    }

    fn send_message(&mut self, actor: ActorId, text: &str) -> Result<(), HostError> {
        if self.fail_messages.contains(&actor) {
            return Err(HostError::Rejected("offline".into()));
        }
        self.messages.push((actor, text.to_string()));
        Ok(())
    }

    fn play_particle(&mut self, particle_id: &str, position: [f64; 3]) -> Result<(), HostError> {
        if !self.known_particles.contains(particle_id) {
            return Err(HostError::UnknownEffect(particle_id.to_string()));
        }
        self.particles.push((particle_id.to_string(), position));
        Ok(())
    }

    fn resolve_sound(&self, name: &str) -> Option<SoundId> {
        self.sounds.get(name).copied()
    }

    fn play_sound(&mut self, sound: SoundId, _position: [f64; 3]) -> Result<(), HostError> {
        if self.fail_sounds {
            return Err(HostError::UnknownEffect(sound.to_string()));
        }
        self.played_sounds.push(sound);
        Ok(())
    }
}

/// Runs submitted jobs immediately on the caller's thread
pub struct InlineWorld {
    id: String,
    pub world: Arc<Mutex<MockWorld>>,
}

impl InlineWorld {
    pub fn new(world: MockWorld) -> Arc<Self> {
        Arc::new(Self {
            id: world.id.clone(),
            world: Arc::new(Mutex::new(world)),
        })
    }
}

impl WorldContext for InlineWorld {
    fn world_id(&self) -> &str {
        &self.id
    }

    fn submit(&self, job: WorldJob) -> Result<(), HostError> {
        let mut world = self.world.lock();
        job(&mut *world);
        Ok(())
    }
}
