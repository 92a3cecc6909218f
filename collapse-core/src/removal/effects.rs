//! Best-effort collapse particles and sounds.
//!
//! Each world remembers, per call site, the first candidate id that played
//! successfully. A later failure forgets it and the candidate list is tried
//! again. Sound ids are host-assigned, so nothing is shared across worlds.
//! Nothing here ever returns an error.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::constants::{
    COLLAPSE_EFFECT_OFFSETS, COLLAPSE_PARTICLES, EXPLOSION_SOUNDS, FINISH_PARTICLES, RUMBLE_SOUNDS,
};
use crate::host::{HostWorld, SoundId};

#[derive(Debug, Default, Clone, Copy)]
struct ResolvedEffects {
    collapse_particle: Option<&'static str>,
    finish_particle: Option<&'static str>,
    explosion_sound: Option<SoundId>,
    rumble_sound: Option<SoundId>,
}

#[derive(Debug, Default)]
pub struct EffectEmitter {
    by_world: Mutex<HashMap<String, ResolvedEffects>>,
}

impl EffectEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-tick effects use a ring of nine points; the final effect is a
    /// single point and adds the explosion sound.
    pub fn emit(&self, world: &mut dyn HostWorld, center_x: i32, y: i32, center_z: i32, is_final: bool) {
        let world_id = world.world_id().to_string();
        let mut resolved = self.by_world.lock().get(&world_id).copied().unwrap_or_default();

        let (cache, candidates, label, offsets) = if is_final {
            (
                &mut resolved.finish_particle,
                FINISH_PARTICLES.as_slice(),
                "finish",
                &COLLAPSE_EFFECT_OFFSETS[..1],
            )
        } else {
            (
                &mut resolved.collapse_particle,
                COLLAPSE_PARTICLES.as_slice(),
                "collapse",
                &COLLAPSE_EFFECT_OFFSETS[..],
            )
        };

        for &(ox, oz) in offsets {
            let pos = [(center_x + ox) as f64, y as f64, (center_z + oz) as f64];
            play_particle(world, cache, candidates, label, pos);
        }

        let sound_pos = [center_x as f64, y as f64, center_z as f64];
        if is_final {
            play_sound(world, &mut resolved.explosion_sound, EXPLOSION_SOUNDS.as_slice(), "explosion", sound_pos);
        }
        play_sound(world, &mut resolved.rumble_sound, RUMBLE_SOUNDS.as_slice(), "rumble", sound_pos);

        self.by_world.lock().insert(world_id, resolved);
    }

    pub fn cached_collapse_particle(&self, world_id: &str) -> Option<&'static str> {
        self.by_world.lock().get(world_id).and_then(|r| r.collapse_particle)
    }

    pub fn cached_rumble_sound(&self, world_id: &str) -> Option<SoundId> {
        self.by_world.lock().get(world_id).and_then(|r| r.rumble_sound)
    }

    /// Drops everything resolved for `world_id`
    pub fn forget_world(&self, world_id: &str) {
        self.by_world.lock().remove(world_id);
    }
}

fn play_particle(
    world: &mut dyn HostWorld,
    cache: &mut Option<&'static str>,
    candidates: &[&'static str],
    label: &str,
    pos: [f64; 3],
) {
    if let Some(id) = *cache {
        if world.play_particle(id, pos).is_ok() {
            return;
        }
        *cache = None;
    }

    for &id in candidates {
        if world.play_particle(id, pos).is_ok() {
            *cache = Some(id);
            info!(world = world.world_id(), particle = id, "Resolved {} particle system", label);
            return;
        }
    }
}

fn play_sound(
    world: &mut dyn HostWorld,
    cache: &mut Option<SoundId>,
    candidates: &[&str],
    label: &str,
    pos: [f64; 3],
) {
    let id = match *cache {
        Some(id) => id,
        None => {
            let Some((name, id)) = candidates
                .iter()
                .find_map(|name| world.resolve_sound(name).map(|id| (*name, id)))
            else {
                return;
            };
            info!(world = world.world_id(), sound = name, id, "Resolved {} sound event", label);
            *cache = Some(id);
            id
        }
    };

    if let Err(e) = world.play_sound(id, pos) {
        warn!(world = world.world_id(), id, error = %e, "{} sound failed", label);
        *cache = None;
    }
}
