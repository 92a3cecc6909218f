//! One implosion, advanced one tick at a time inside the world context.

use tracing::info;

use crate::constants::{
    ANCHOR_Y_LIMIT, DROP_RADIUS_EXTRA, FINAL_EFFECT_LIFT, FINAL_SWEEP_EXTRA, FOOTPRINT_FLOOR_DEPTH,
    FOOTPRINT_SCAN_RADIUS, MAX_SWEEP_RADIUS, MOB_RADIUS_EXTRA, ROOF_HEADROOM, TOP_SCAN_RADIUS,
    TOWER_CLEARANCE,
};
use crate::geometry::{cleanup_floor, compute_footprint, compute_ruin_floor, find_top_y};
use crate::host::HostWorld;
use crate::removal::{
    purge_creatures, purge_drops, purge_markers, remove_layer, sweep, EffectEmitter, PurgeVolume,
};
use crate::state::{Footprint, SharedState, StructureKey};

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStep {
    /// Top and footprint were resolved; nothing removed yet
    Resolved { top_y: i32, footprint: Footprint },
    /// Layers `[to, from]` were processed
    Removed { from: i32, to: i32, removed: usize },
    /// Cursor passed the ruin floor; final sweep done
    Finished(CompletionPlan),
}

/// Region swept again by the delayed follow-up passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPlan {
    pub center_x: i32,
    pub center_z: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub sweep_radius: i32,
    pub drop_radius: i32,
    pub cleanup_floor: i32,
}

impl CompletionPlan {
    /// Block sweep plus dropped-item cleanup; returns `(blocks, drops)`
    pub fn sweep(&self, world: &mut dyn HostWorld) -> (usize, usize) {
        let blocks = sweep(
            world,
            self.center_x,
            self.center_z,
            self.min_y,
            self.max_y,
            self.sweep_radius,
        );
        let drops = purge_drops(world, &self.drop_volume());
        (blocks, drops)
    }

    fn drop_volume(&self) -> PurgeVolume {
        PurgeVolume {
            center_x: self.center_x,
            center_z: self.center_z,
            min_y: self.cleanup_floor,
            max_y: self.max_y,
            radius: self.drop_radius,
        }
    }
}

/// Cursor and cached geometry of a running implosion
#[derive(Debug, Clone)]
pub struct ImplosionRun {
    key: StructureKey,
    layers_per_tick: i32,
    fallback_floor: i32,
    planned_top: i32,
    max_y: i32,
    cursor: i32,
    min_y: i32,
    footprint: Option<Footprint>,
}

impl ImplosionRun {
    pub fn new(key: StructureKey, base_y: i32, layers_per_tick: i32) -> Self {
        let base_y = base_y.clamp(-ANCHOR_Y_LIMIT, ANCHOR_Y_LIMIT);
        let planned_top = base_y + ROOF_HEADROOM;
        let fallback_floor = base_y - TOWER_CLEARANCE;
        Self {
            key,
            layers_per_tick: layers_per_tick.max(1),
            fallback_floor,
            planned_top,
            max_y: planned_top,
            cursor: planned_top,
            min_y: fallback_floor,
            footprint: None,
        }
    }

    pub fn cursor(&self) -> i32 {
        self.cursor
    }

    pub fn min_y(&self) -> i32 {
        self.min_y
    }

    pub fn step(
        &mut self,
        world: &mut dyn HostWorld,
        state: &SharedState,
        effects: &EffectEmitter,
    ) -> TickStep {
        let Some(fp) = self.footprint else {
            return self.resolve_geometry(world, state);
        };

        let mob_radius = MAX_SWEEP_RADIUS.min(fp.radius + MOB_RADIUS_EXTRA);
        let drop_radius = MAX_SWEEP_RADIUS.min(fp.radius + DROP_RADIUS_EXTRA);

        if self.cursor < self.min_y {
            return self.finish(world, state, effects, fp, drop_radius);
        }

        let ruin = state.lock().ruin_floor_y;
        if ruin.is_none() {
            let ruin_floor = compute_ruin_floor(
                world,
                fp.center_x,
                fp.center_z,
                self.max_y,
                self.fallback_floor,
                fp.radius,
            );
            state.lock().ruin_floor_y = Some(ruin_floor);
            if ruin_floor > self.min_y {
                self.min_y = ruin_floor;
                info!(
                    structure = %self.key,
                    min_y = ruin_floor,
                    center_x = fp.center_x,
                    center_z = fp.center_z,
                    "Ruin base preserved"
                );
            }
        }

        let cleanup = cleanup_floor(self.min_y, self.fallback_floor);
        let (purge_mobs, purge_marks) = {
            let mut s = state.lock();
            s.cleanup_floor_y = Some(cleanup);
            let flags = (!s.mobs_purged, !s.markers_purged);
            s.mobs_purged = true;
            s.markers_purged = true;
            flags
        };
        let volume = PurgeVolume {
            center_x: fp.center_x,
            center_z: fp.center_z,
            min_y: cleanup,
            max_y: self.max_y,
            radius: mob_radius,
        };
        if purge_mobs {
            let purged = purge_creatures(world, &volume);
            if purged > 0 {
                info!(structure = %self.key, purged, "Purged creatures during implosion");
            }
        }
        if purge_marks {
            let removed = purge_markers(world, &volume);
            if removed > 0 {
                info!(structure = %self.key, removed, "Removed spawn markers during implosion");
            }
        }

        let start = self.cursor;
        let end = (start - self.layers_per_tick + 1).max(self.min_y);
        let mut removed = 0;
        for y in (end..=start).rev() {
            removed += remove_layer(world, fp.center_x, fp.center_z, y, fp.radius, true);
        }
        if start >= end {
            effects.emit(world, fp.center_x, start, fp.center_z, false);
        }
        self.cursor = end - 1;

        TickStep::Removed {
            from: start,
            to: end,
            removed,
        }
    }

    fn resolve_geometry(&mut self, world: &mut dyn HostWorld, state: &SharedState) -> TickStep {
        let top_y = find_top_y(
            world,
            self.key.x,
            self.key.z,
            self.planned_top,
            self.fallback_floor,
            TOP_SCAN_RADIUS,
        );
        let footprint = compute_footprint(
            world,
            self.key.x,
            self.key.z,
            top_y,
            self.fallback_floor.max(top_y - FOOTPRINT_FLOOR_DEPTH),
            FOOTPRINT_SCAN_RADIUS,
        );

        self.max_y = top_y;
        self.cursor = top_y;
        self.footprint = Some(footprint);
        {
            let mut s = state.lock();
            s.top_y = Some(top_y);
            s.footprint = Some(footprint);
        }

        info!(
            structure = %self.key,
            max_y = top_y,
            min_y = self.fallback_floor,
            center_x = footprint.center_x,
            center_z = footprint.center_z,
            radius = footprint.radius,
            "Starting top-down implosion"
        );
        TickStep::Resolved { top_y, footprint }
    }

    fn finish(
        &mut self,
        world: &mut dyn HostWorld,
        state: &SharedState,
        effects: &EffectEmitter,
        fp: Footprint,
        drop_radius: i32,
    ) -> TickStep {
        let cleanup = state
            .lock()
            .cleanup_floor_y
            .unwrap_or_else(|| cleanup_floor(self.min_y, self.fallback_floor));
        let plan = CompletionPlan {
            center_x: fp.center_x,
            center_z: fp.center_z,
            min_y: self.min_y,
            max_y: self.max_y,
            sweep_radius: MAX_SWEEP_RADIUS.min(fp.radius + FINAL_SWEEP_EXTRA),
            drop_radius,
            cleanup_floor: cleanup,
        };

        let (swept, drops) = plan.sweep(world);
        if swept > 0 {
            info!(structure = %self.key, swept, "Implosion cleanup removed remaining blocks");
        }
        if drops > 0 {
            info!(structure = %self.key, drops, "Implosion cleanup removed dropped items");
        }

        effects.emit(
            world,
            fp.center_x,
            self.max_y.min(self.min_y + FINAL_EFFECT_LIFT),
            fp.center_z,
            true,
        );
        TickStep::Finished(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BlockSnapshot, BlockStateKind, EntityCaps};
    use crate::state::StructureState;
    use crate::testing::MockWorld;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn tower_world() -> MockWorld {
        let mut world = MockWorld::new("w");
        world.build_flat_ground(-40, 40, 63, "Soil_Grass");
        world.build_ring(0, 0, 64, 90, 6, "Rock_Stone_Brick");
        world.set(
            0,
            90,
            0,
            BlockSnapshot::new("Furniture_Village_Chest").with_state(BlockStateKind::Container),
        );
        world
    }

    fn run_to_end(run: &mut ImplosionRun, world: &mut MockWorld, state: &SharedState) -> Vec<TickStep> {
        let fx = EffectEmitter::new();
        let mut steps = Vec::new();
        for _ in 0..200 {
            let step = run.step(world, state, &fx);
            let done = matches!(step, TickStep::Finished(_));
            steps.push(step);
            if done {
                break;
            }
        }
        steps
    }

    #[test]
    fn test_first_tick_only_resolves() {
        let mut world = tower_world();
        let state: SharedState = Arc::new(Mutex::new(StructureState::new(85)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, 85, 0), 85, 2);
        let fx = EffectEmitter::new();

        let step = run.step(&mut world, &state, &fx);
        assert_eq!(
            step,
            TickStep::Resolved {
                top_y: 90,
                footprint: Footprint { center_x: 0, center_z: 0, radius: 10 }
            }
        );
        assert_eq!(state.lock().top_y, Some(90));
        assert!(world.get(0, 90, 0).is_some());
    }

    #[test]
    fn test_runs_down_to_ruin_floor() {
        let mut world = tower_world();
        let state: SharedState = Arc::new(Mutex::new(StructureState::new(85)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, 85, 0), 85, 2);

        let steps = run_to_end(&mut run, &mut world, &state);
        let Some(TickStep::Finished(plan)) = steps.last() else {
            panic!("implosion did not finish");
        };
        assert_eq!(plan.min_y, 66);
        assert_eq!(plan.max_y, 90);
        assert_eq!(plan.sweep_radius, 22);
        assert_eq!(state.lock().ruin_floor_y, Some(66));

        // 25 layers at 2 per tick, plus the resolve and finish ticks
        assert_eq!(steps.len(), 1 + 13 + 1);

        for y in 66..=90 {
            assert!(world.get(6, y, 0).is_none(), "layer {y} still standing");
        }
        assert!(world.get(6, 65, 0).is_some());
        assert!(world.get(6, 64, 0).is_some());
        assert!(world.get(0, 63, 0).is_some());
    }

    #[test]
    fn test_purges_run_once() {
        let mut world = tower_world();
        let creature = EntityCaps { creature: true, ..Default::default() };
        let marker = EntityCaps { spawn_marker: true, ..Default::default() };
        world.spawn_entity(1, [2.0, 80.0, 2.0], creature);
        world.spawn_entity(2, [0.0, 86.0, 0.0], marker);

        let state: SharedState = Arc::new(Mutex::new(StructureState::new(85)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, 85, 0), 85, 2);
        let fx = EffectEmitter::new();
        run.step(&mut world, &state, &fx);
        run.step(&mut world, &state, &fx);
        assert!(!world.has_entity(1));
        assert!(!world.has_entity(2));
        {
            let s = state.lock();
            assert!(s.mobs_purged && s.markers_purged);
        }

        // a creature arriving later is left to the host
        world.spawn_entity(3, [1.0, 75.0, 1.0], creature);
        run.step(&mut world, &state, &fx);
        assert!(world.has_entity(3));
    }

    #[test]
    fn test_final_sweep_collects_drops() {
        let mut world = tower_world();
        let drop = EntityCaps { dropped_item: true, ..Default::default() };
        world.spawn_entity(9, [3.0, 67.0, 0.0], drop);

        let state: SharedState = Arc::new(Mutex::new(StructureState::new(85)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, 85, 0), 85, 3);
        run_to_end(&mut run, &mut world, &state);
        assert!(!world.has_entity(9));
    }

    #[test]
    fn test_empty_site_stops_at_conservative_floor() {
        let mut world = MockWorld::new("w");
        let state: SharedState = Arc::new(Mutex::new(StructureState::new(64)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, 64, 0), 64, 10);
        let steps = run_to_end(&mut run, &mut world, &state);
        let Some(TickStep::Finished(plan)) = steps.last() else {
            panic!("implosion did not finish");
        };
        // top falls back to the planned top; no ground → top - 60
        assert_eq!(plan.max_y, 84);
        assert_eq!(plan.min_y, 24);
    }

    #[test]
    fn test_extreme_anchor_height_is_clamped() {
        let mut world = MockWorld::new("w");
        let state: SharedState = Arc::new(Mutex::new(StructureState::new(i32::MIN)));
        let mut run = ImplosionRun::new(StructureKey::new("w", 0, i32::MIN, 0), i32::MIN, 10);
        assert_eq!(run.cursor(), -ANCHOR_Y_LIMIT + ROOF_HEADROOM);
        assert_eq!(run.min_y(), -ANCHOR_Y_LIMIT - TOWER_CLEARANCE);

        let steps = run_to_end(&mut run, &mut world, &state);
        assert!(matches!(steps.last(), Some(TickStep::Finished(_))));

        let high = ImplosionRun::new(StructureKey::new("w", 0, i32::MAX, 0), i32::MAX, 2);
        assert_eq!(high.cursor(), ANCHOR_Y_LIMIT + ROOF_HEADROOM);
    }
}
