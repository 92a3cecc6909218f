//! Centralized collapse constants.
//!
//! Geometry radii, scan windows and effect tables shared by the scheduler,
//! the geometry scans and the removal executor. Tunables that operators may
//! change at runtime live in [`crate::config`] instead.

// =====================================================
// Geometry
// =====================================================

/// Default (and minimum) horizontal radius of a collapsing structure
pub const DEFAULT_RADIUS: i32 = 10;

/// Disc radius used while scanning for the topmost structure block
pub const TOP_SCAN_RADIUS: i32 = 22;

/// Square half-extent used by the footprint scan
pub const FOOTPRINT_SCAN_RADIUS: i32 = 24;

/// Footprint scan half-extent is clamped to this upper bound
pub const FOOTPRINT_SCAN_RADIUS_MAX: i32 = 64;

/// How far below the top the footprint scan may look (in layers)
pub const FOOTPRINT_SCAN_DEPTH: i32 = 48;

/// Footprint scan floor relative to the top (`max(fallback, top - 64)`)
pub const FOOTPRINT_FLOOR_DEPTH: i32 = 64;

/// A slice with at least this many matches is a good-enough footprint signal
pub const FOOTPRINT_GOOD_SLICE: usize = 24;

/// Footprint radius padding added to the bounding-box half-extent
pub const FOOTPRINT_PADDING: i32 = 3;

/// Hard cap on every sweep/purge radius
pub const MAX_SWEEP_RADIUS: i32 = 28;

/// Extra radius of the final wide sweep beyond the footprint
pub const FINAL_SWEEP_EXTRA: i32 = 12;

/// Creature/marker purge radius padding beyond the footprint
pub const MOB_RADIUS_EXTRA: i32 = 10;

/// Dropped-item purge radius padding beyond the footprint
pub const DROP_RADIUS_EXTRA: i32 = 6;

/// Headroom above the anchor where the top scan starts
pub const ROOF_HEADROOM: i32 = 20;

/// Maximum depth below the anchor the collapse may ever reach
pub const TOWER_CLEARANCE: i32 = 256;

/// Anchor heights are clamped to `±ANCHOR_Y_LIMIT` before any height arithmetic
pub const ANCHOR_Y_LIMIT: i32 = 1 << 20;

// =====================================================
// Ruin floor
// =====================================================

/// Layers preserved above the detected ground as a ruin stub
pub const RUIN_PRESERVE_LAYERS: i32 = 3;

/// Ground ring distances outside the footprint
pub const RUIN_RING_OFFSETS: [i32; 2] = [3, 6];

/// Minimum number of ground samples for a trusted median
pub const RUIN_MIN_SAMPLES: usize = 5;

/// Conservative depth below the scan start when ground detection fails
pub const RUIN_FALLBACK_DEPTH: i32 = 60;

/// Minimum depth of the cleanup floor below the ruin floor
pub const CLEANUP_EXTRA_DEPTH: i32 = 12;

// =====================================================
// Scheduling
// =====================================================

/// Absolute cap on remaining seconds after a delay request
pub const MAX_DELAY_REMAINING_SECS: u64 = 180;

/// Remaining-time checkpoints at which a countdown message is sent
pub const COUNTDOWN_CHECKPOINTS: [u64; 7] = [30, 10, 5, 4, 3, 2, 1];

/// Follow-up sweep delays after completion (seconds)
pub const FOLLOW_UP_SWEEP_SECS: [u64; 2] = [2, 6];

// =====================================================
// Effects
// =====================================================

/// Particle candidates for per-tick collapse effects (priority order)
pub const COLLAPSE_PARTICLES: [&str; 3] = [
    "Explosion_Small",
    "Block_Break_Stone",
    "Block.Stone.Block_Break_Stone",
];

/// Particle candidates for the final effect
pub const FINISH_PARTICLES: [&str; 2] = ["Impact_Explosion", "Explosion_Small"];

/// Explosion sound candidates (final effect only)
pub const EXPLOSION_SOUNDS: [&str; 4] = [
    "SFX_Golem_Earth_Slam_Impact",
    "SFX_Bomb_Fire_Goblin_Death",
    "SFX_GunPvP_Grenade_Frag_Death",
    "SFX_Stone_Break",
];

/// Rumble sound candidates (every effect)
pub const RUMBLE_SOUNDS: [&str; 3] = [
    "SFX_Golem_Earth_Stomp_Impact",
    "SFX_Golem_Sand_Stomp_Impact",
    "SFX_Z3_Emit_Cave_Ice_Rumble",
];

/// Horizontal offsets of the per-tick particle ring
pub const COLLAPSE_EFFECT_OFFSETS: [(i32, i32); 9] = [
    (0, 0),
    (5, 5),
    (-5, 5),
    (5, -5),
    (-5, -5),
    (8, 0),
    (-8, 0),
    (0, 8),
    (0, -8),
];

/// Height above the ruin floor of the final effect
pub const FINAL_EFFECT_LIFT: i32 = 2;
