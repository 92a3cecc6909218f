//! Per-structure lifecycle state and the concurrent store holding it.
//!
//! The store map is only locked for lookups and inserts. Compound
//! transitions (schedule, delay, begin implosion) run under the entry's own
//! mutex, so two reschedules of the same structure never interleave while
//! different structures never contend.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Identifies one structure instance by its anchor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureKey {
    pub world_id: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl StructureKey {
    pub fn new(world_id: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world_id: world_id.into(),
            x,
            y,
            z,
        }
    }

    /// Anchor at the block containing a floating-point position
    pub fn from_position(world_id: impl Into<String>, position: [f64; 3]) -> Self {
        Self::new(
            world_id,
            position[0].floor() as i32,
            position[1].floor() as i32,
            position[2].floor() as i32,
        )
    }

    pub fn horizontal_distance_sq(&self, x: f64, z: f64) -> f64 {
        let dx = self.x as f64 - x;
        let dz = self.z as f64 - z;
        dx * dx + dz * dz
    }
}

impl fmt::Display for StructureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({}, {}, {})", self.world_id, self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollapsePhase {
    /// Anchor known, no collapse pending
    Idle,
    /// Countdown running
    Scheduled,
    /// Tick loop removing layers
    Imploding,
}

/// Cancels a spawned timer task
#[derive(Debug)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    pub fn new(handle: AbortHandle) -> Self {
        Self(handle)
    }

    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> From<&tokio::task::JoinHandle<T>> for CancelHandle {
    fn from(handle: &tokio::task::JoinHandle<T>) -> Self {
        Self(handle.abort_handle())
    }
}

/// Horizontal extent of a structure, inferred once per implosion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    pub center_x: i32,
    pub center_z: i32,
    pub radius: i32,
}

#[derive(Debug)]
pub struct StructureState {
    pub phase: CollapsePhase,
    pub base_y: i32,
    pub top_y: Option<i32>,
    pub footprint: Option<Footprint>,
    /// Monotonic start instant used for remaining-time arithmetic
    pub scheduled_start: Option<Instant>,
    /// Wall-clock start, for reporting only
    pub scheduled_start_epoch_ms: i64,
    /// Countdown announcements + start timer
    pub pending_timers: Vec<CancelHandle>,
    pub tick_timer: Option<CancelHandle>,
    /// Bumped on every (re)schedule; timers carrying an older value are stale
    pub generation: u64,
    pub mobs_purged: bool,
    pub markers_purged: bool,
    pub cleanup_floor_y: Option<i32>,
    pub ruin_floor_y: Option<i32>,
}

impl StructureState {
    pub fn new(base_y: i32) -> Self {
        Self {
            phase: CollapsePhase::Idle,
            base_y,
            top_y: None,
            footprint: None,
            scheduled_start: None,
            scheduled_start_epoch_ms: 0,
            pending_timers: Vec::new(),
            tick_timer: None,
            generation: 0,
            mobs_purged: false,
            markers_purged: false,
            cleanup_floor_y: None,
            ruin_floor_y: None,
        }
    }

    /// True once a collapse was scheduled, including while imploding
    pub fn collapse_scheduled(&self) -> bool {
        matches!(self.phase, CollapsePhase::Scheduled | CollapsePhase::Imploding)
    }

    pub fn imploding(&self) -> bool {
        self.phase == CollapsePhase::Imploding
    }

    /// Whole seconds until the start timer fires, rounded up
    pub fn remaining_seconds(&self, now: Instant) -> Option<u64> {
        let start = self.scheduled_start?;
        let ms = start.saturating_duration_since(now).as_millis() as u64;
        Some(ms.div_ceil(1000))
    }

    pub fn cancel_pending_timers(&mut self) {
        for timer in self.pending_timers.drain(..) {
            timer.cancel();
        }
    }

    pub fn cancel_all_timers(&mut self) {
        self.cancel_pending_timers();
        if let Some(tick) = self.tick_timer.take() {
            tick.cancel();
        }
    }
}

pub type SharedState = Arc<Mutex<StructureState>>;

/// Read-only view of one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureStatus {
    pub key: StructureKey,
    pub phase: CollapsePhase,
    pub remaining_seconds: Option<u64>,
    pub scheduled_start_epoch_ms: Option<i64>,
    pub top_y: Option<i32>,
    pub ruin_floor_y: Option<i32>,
}

/// Concurrent structure key → state map
#[derive(Default)]
pub struct TowerStateStore {
    entries: RwLock<HashMap<StructureKey, SharedState>>,
}

impl TowerStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Existing entry, or a fresh Idle one with `base_y` = anchor y
    pub fn get_or_create(&self, key: &StructureKey) -> SharedState {
        if let Some(existing) = self.entries.read().get(key) {
            return existing.clone();
        }
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(StructureState::new(key.y))))
            .clone()
    }

    pub fn get(&self, key: &StructureKey) -> Option<SharedState> {
        self.entries.read().get(key).cloned()
    }

    pub fn remove(&self, key: &StructureKey) -> Option<SharedState> {
        self.entries.write().remove(key)
    }

    /// Removes only if the stored entry is `state` itself
    pub fn remove_if_same(&self, key: &StructureKey, state: &SharedState) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(current) if Arc::ptr_eq(current, state) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Calls `f` for every entry whose key passes `predicate`.
    ///
    /// Entries are collected first and the map lock released before `f`
    /// runs, so `f` may lock entries and even mutate the store.
    pub fn for_each<P, F>(&self, predicate: P, mut f: F)
    where
        P: Fn(&StructureKey) -> bool,
        F: FnMut(&StructureKey, &SharedState),
    {
        let matching: Vec<(StructureKey, SharedState)> = self
            .entries
            .read()
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, state) in &matching {
            f(key, state);
        }
    }

    /// True if any entry matching `predicate` satisfies `check`
    pub fn any<P, C>(&self, predicate: P, check: C) -> bool
    where
        P: Fn(&StructureKey) -> bool,
        C: Fn(&StructureKey, &StructureState) -> bool,
    {
        let mut found = false;
        self.for_each(predicate, |key, state| {
            if !found && check(key, &state.lock()) {
                found = true;
            }
        });
        found
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Empties the store, returning what it held
    pub fn drain(&self) -> Vec<(StructureKey, SharedState)> {
        self.entries.write().drain().collect()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<StructureStatus> {
        let mut out = Vec::new();
        self.for_each(
            |_| true,
            |key, state| {
                let s = state.lock();
                out.push(StructureStatus {
                    key: key.clone(),
                    phase: s.phase,
                    remaining_seconds: match s.phase {
                        CollapsePhase::Scheduled => s.remaining_seconds(now),
                        _ => None,
                    },
                    scheduled_start_epoch_ms: s
                        .collapse_scheduled()
                        .then_some(s.scheduled_start_epoch_ms),
                    top_y: s.top_y,
                    ruin_floor_y: s.ruin_floor_y,
                });
            },
        );
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
