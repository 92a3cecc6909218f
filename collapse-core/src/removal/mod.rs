//! Block removal and entity purges
//!
//! Everything here runs inside a world's serialized context with a
//! `&mut dyn HostWorld`. Per-item failures never abort a pass: a block or
//! entity that refuses removal is skipped and the pass reports only the
//! successful count. Missed blocks are picked up by the final sweeps.

pub mod effects;

pub use effects::EffectEmitter;

use std::collections::HashSet;
use tracing::{debug, trace};

use crate::host::{chunk_coord, EntityId, EntitySnapshot, HostWorld, CHUNK_SIZE};

/// Structure material families that may be removed.
///
/// Raw rock is terrain; only its brick and cobble variants belong to a
/// structure.
pub fn classify_removable(material_id: &str) -> bool {
    if material_id.is_empty() {
        return false;
    }
    if material_id.starts_with("Rock_") {
        return material_id.contains("_Cobble") || material_id.contains("_Brick");
    }
    material_id.starts_with("Wood_")
        || material_id.starts_with("Furniture_")
        || material_id.starts_with("Deco_")
}

/// Removes every structure block (or container) in the disc of `radius`
/// around the center at elevation `y`.
pub fn remove_layer(
    world: &mut dyn HostWorld,
    center_x: i32,
    center_z: i32,
    y: i32,
    radius: i32,
    log: bool,
) -> usize {
    let r_sq = radius * radius;
    let mut removed = 0;

    for x in (center_x - radius)..=(center_x + radius) {
        for z in (center_z - radius)..=(center_z + radius) {
            let dx = x - center_x;
            let dz = z - center_z;
            if dx * dx + dz * dz > r_sq {
                continue;
            }

            let Some(block) = world.block_at(x, y, z) else {
                continue;
            };
            if !block.is_container() && !classify_removable(&block.material_id) {
                continue;
            }

            if block.state.is_some() {
                world.teardown_block_state(x, y, z);
            }
            match world.clear_block(x, y, z) {
                Ok(()) => removed += 1,
                Err(e) => trace!(x, y, z, error = %e, "Block removal skipped"),
            }
        }
    }

    if log && removed > 0 {
        debug!(world = world.world_id(), y, removed, "Imploded layer");
    }
    removed
}

/// `remove_layer` over every Y in `[min_y, max_y]`, top down, without logging
pub fn sweep(
    world: &mut dyn HostWorld,
    center_x: i32,
    center_z: i32,
    min_y: i32,
    max_y: i32,
    radius: i32,
) -> usize {
    (min_y..=max_y)
        .rev()
        .map(|y| remove_layer(world, center_x, center_z, y, radius, false))
        .sum()
}

// ============================================================================
// Entity purges
// ============================================================================

/// Cylinder in which entities are purged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeVolume {
    pub center_x: i32,
    pub center_z: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub radius: i32,
}

impl PurgeVolume {
    pub fn contains(&self, position: [f64; 3]) -> bool {
        let y = position[1].floor() as i32;
        if y < self.min_y || y > self.max_y {
            return false;
        }
        let dx = position[0] - self.center_x as f64;
        let dz = position[2] - self.center_z as f64;
        dx * dx + dz * dz <= (self.radius as f64) * (self.radius as f64)
    }
}

/// Snapshots matching entities in every loaded chunk around the volume.
/// Nothing is removed here.
pub fn collect_entities<F>(world: &dyn HostWorld, volume: &PurgeVolume, filter: F) -> Vec<EntityId>
where
    F: Fn(&EntitySnapshot) -> bool,
{
    let chunk_x = chunk_coord(volume.center_x);
    let chunk_z = chunk_coord(volume.center_z);
    let radius_chunks = volume.radius / CHUNK_SIZE + 1;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cx in (chunk_x - radius_chunks)..=(chunk_x + radius_chunks) {
        for cz in (chunk_z - radius_chunks)..=(chunk_z + radius_chunks) {
            let Some(entities) = world.entities_in_chunk(cx, cz) else {
                continue;
            };
            for entity in entities {
                if !seen.insert(entity.id) {
                    continue;
                }
                if filter(&entity) && volume.contains(entity.position) {
                    out.push(entity.id);
                }
            }
        }
    }
    out
}

fn remove_all(world: &mut dyn HostWorld, ids: Vec<EntityId>) -> usize {
    let mut removed = 0;
    for id in ids {
        match world.remove_entity(id) {
            Ok(()) => removed += 1,
            Err(e) => trace!(entity = id, error = %e, "Entity removal skipped"),
        }
    }
    removed
}

/// Removes non-player creatures inside the volume
pub fn purge_creatures(world: &mut dyn HostWorld, volume: &PurgeVolume) -> usize {
    let ids = collect_entities(world, volume, |e| !e.caps.player && e.caps.creature);
    remove_all(world, ids)
}

/// Removes spawn markers inside the volume
pub fn purge_markers(world: &mut dyn HostWorld, volume: &PurgeVolume) -> usize {
    let ids = collect_entities(world, volume, |e| e.caps.spawn_marker);
    remove_all(world, ids)
}

/// Removes dropped items inside the volume
pub fn purge_drops(world: &mut dyn HostWorld, volume: &PurgeVolume) -> usize {
    let ids = collect_entities(world, volume, |e| !e.caps.player && e.caps.dropped_item);
    remove_all(world, ids)
}
