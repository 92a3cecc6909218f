//! Bounded geometry scans over a host world
//!
//! Three scans run once per implosion and are cached in the structure state:
//!
//! ```text
//! find_top_y          disc scan from the roof headroom down → first structure block
//! compute_footprint   square slices below the top → bbox of the densest slice
//! compute_ruin_floor  ground samples on two rings outside the footprint → median + 3
//! ```
//!
//! Every scan is bounded by fixed radii and depths. When a scan is unsure it
//! errs on the side of leaving blocks standing rather than carving terrain.

use crate::constants::{
    DEFAULT_RADIUS, FOOTPRINT_GOOD_SLICE, FOOTPRINT_PADDING, FOOTPRINT_SCAN_DEPTH,
    FOOTPRINT_SCAN_RADIUS_MAX, MAX_SWEEP_RADIUS, RUIN_FALLBACK_DEPTH, RUIN_MIN_SAMPLES,
    RUIN_PRESERVE_LAYERS, RUIN_RING_OFFSETS, CLEANUP_EXTRA_DEPTH,
};
use crate::host::{BlockSnapshot, HostWorld};
use crate::removal::classify_removable;
use crate::state::Footprint;

/// Structure material, or any block holding a container
pub fn is_structure_block(block: &BlockSnapshot) -> bool {
    classify_removable(&block.material_id) || block.is_container()
}

/// Scans Y from `search_top` down to `search_bottom` over a disc of `radius`
/// and returns the first Y holding a structure block. Returns `search_top`
/// when nothing matches.
pub fn find_top_y(
    world: &dyn HostWorld,
    anchor_x: i32,
    anchor_z: i32,
    search_top: i32,
    search_bottom: i32,
    radius: i32,
) -> i32 {
    let r_sq = radius * radius;
    for y in (search_bottom..=search_top).rev() {
        for x in (anchor_x - radius)..=(anchor_x + radius) {
            for z in (anchor_z - radius)..=(anchor_z + radius) {
                let dx = x - anchor_x;
                let dz = z - anchor_z;
                if dx * dx + dz * dz > r_sq {
                    continue;
                }
                match world.block_at(x, y, z) {
                    Some(block) if is_structure_block(&block) => return y,
                    _ => continue,
                }
            }
        }
    }
    search_top
}

/// Infers the horizontal footprint from the densest slice below `top_y`.
///
/// Slices run from `top_y` down to `max(scan_floor, top_y - 48)` and stop
/// early once a slice holds 24 or more structure blocks.
pub fn compute_footprint(
    world: &dyn HostWorld,
    anchor_x: i32,
    anchor_z: i32,
    top_y: i32,
    scan_floor: i32,
    scan_radius: i32,
) -> Footprint {
    let r = scan_radius.clamp(DEFAULT_RADIUS, FOOTPRINT_SCAN_RADIUS_MAX);
    let stop_y = scan_floor.max(top_y - FOOTPRINT_SCAN_DEPTH);

    let mut best: Option<(usize, SliceBounds)> = None;

    for y in (stop_y..=top_y).rev() {
        let mut bounds = SliceBounds::empty();
        let mut count = 0usize;

        for x in (anchor_x - r)..=(anchor_x + r) {
            for z in (anchor_z - r)..=(anchor_z + r) {
                if let Some(block) = world.block_at(x, y, z) {
                    if is_structure_block(&block) {
                        count += 1;
                        bounds.include(x, z);
                    }
                }
            }
        }

        if count > best.as_ref().map_or(0, |(c, _)| *c) {
            best = Some((count, bounds));
        }
        if count >= FOOTPRINT_GOOD_SLICE {
            break;
        }
    }

    match best {
        Some((_, b)) => b.to_footprint(),
        None => Footprint {
            center_x: anchor_x,
            center_z: anchor_z,
            radius: DEFAULT_RADIUS,
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct SliceBounds {
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
}

impl SliceBounds {
    fn empty() -> Self {
        Self {
            min_x: i32::MAX,
            max_x: i32::MIN,
            min_z: i32::MAX,
            max_z: i32::MIN,
        }
    }

    fn include(&mut self, x: i32, z: i32) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    fn to_footprint(self) -> Footprint {
        // integer midpoint, truncating toward zero
        let center_x = (self.min_x + self.max_x) / 2;
        let center_z = (self.min_z + self.max_z) / 2;
        let rx = (self.max_x - center_x).abs().max((self.min_x - center_x).abs());
        let rz = (self.max_z - center_z).abs().max((self.min_z - center_z).abs());
        let radius = (rx.max(rz) + FOOTPRINT_PADDING)
            .max(DEFAULT_RADIUS)
            .min(MAX_SWEEP_RADIUS);
        Footprint {
            center_x,
            center_z,
            radius,
        }
    }
}

/// Elevation where top-down removal stops, always within
/// `[fallback_floor, scan_start]` when `fallback_floor <= scan_start`.
pub fn compute_ruin_floor(
    world: &dyn HostWorld,
    center_x: i32,
    center_z: i32,
    scan_start: i32,
    fallback_floor: i32,
    structure_radius: i32,
) -> i32 {
    match local_ground_y(world, center_x, center_z, scan_start, fallback_floor, structure_radius) {
        Some(ground) => (ground + RUIN_PRESERVE_LAYERS)
            .min(scan_start)
            .max(fallback_floor),
        None => fallback_floor.max(scan_start - RUIN_FALLBACK_DEPTH),
    }
}

/// Lowest Y the post-completion sweeps clean dropped items down to
pub fn cleanup_floor(ruin_floor: i32, fallback_floor: i32) -> i32 {
    fallback_floor.max(ruin_floor - CLEANUP_EXTRA_DEPTH.max(RUIN_PRESERVE_LAYERS + 4))
}

/// Median ground elevation sampled on two rings just outside the footprint
pub fn local_ground_y(
    world: &dyn HostWorld,
    center_x: i32,
    center_z: i32,
    start_y: i32,
    min_y: i32,
    structure_radius: i32,
) -> Option<i32> {
    let r0 = DEFAULT_RADIUS.max(structure_radius);
    let mut samples = Vec::with_capacity(32);

    for extra in RUIN_RING_OFFSETS {
        for (ox, oz) in ring_offsets(r0 + extra) {
            if let Some(y) = find_ground_y(world, center_x + ox, center_z + oz, start_y, min_y) {
                samples.push(y);
            }
        }
    }

    if samples.len() < RUIN_MIN_SAMPLES {
        return None;
    }
    samples.sort_unstable();
    Some(samples[samples.len() / 2])
}

/// Cardinal, diagonal and two intermediate points per side of a ring
pub fn ring_offsets(r: i32) -> [(i32, i32); 16] {
    let half = (r / 2).max(1);
    [
        (r, 0),
        (-r, 0),
        (0, r),
        (0, -r),
        (r, r),
        (-r, r),
        (r, -r),
        (-r, -r),
        (r, half),
        (r, -half),
        (-r, half),
        (-r, -half),
        (half, r),
        (-half, r),
        (half, -r),
        (-half, -r),
    ]
}

/// First non-noise block scanning down one column
pub fn find_ground_y(world: &dyn HostWorld, x: i32, z: i32, start_y: i32, min_y: i32) -> Option<i32> {
    let top = start_y.max(min_y);
    let bottom = start_y.min(min_y);
    (bottom..=top).rev().find(|&y| {
        world
            .block_at(x, y, z)
            .is_some_and(|block| !is_surface_noise(&block.material_id))
    })
}

/// Foliage, decoration and logs that should not count as ground.
/// Liquids are ground.
pub fn is_surface_noise(material_id: &str) -> bool {
    if material_id.is_empty() {
        return true;
    }
    let id = material_id.to_lowercase();

    if id.contains("water") || id.contains("lava") || id.contains("liquid") {
        return false;
    }

    const NOISE_PREFIXES: [&str; 6] = ["foliage_", "plant_", "flower_", "deco_", "furniture_", "wood_"];
    const NOISE_PARTS: [&str; 8] = [
        "leaf", "leaves", "vine", "mushroom", "sapling", "bush", "log", "branch",
    ];

    NOISE_PREFIXES.iter().any(|p| id.starts_with(p)) || NOISE_PARTS.iter().any(|p| id.contains(p))
}
