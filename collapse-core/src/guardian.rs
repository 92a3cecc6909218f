//! Guardian roster
//!
//! Only entities of these types can bring a tower down. Killing the same
//! type elsewhere in the world must not trigger a collapse, so the roster
//! stays limited to tower-spawned guardians.

use rand::Rng;

/// Placeholder ids baked into tower templates, randomized at spawn time
pub const GUARDIAN_MARKER_IDS: [&str; 2] = ["Skeleton_Archmage", "Outlander_Priest"];

/// Lower tiers
pub const GUARDIAN_POOL_TIER_1_2: [&str; 3] = [
    "Skeleton_Archmage",
    "Skeleton_Frost_Archmage",
    "Skeleton_Sand_Archmage",
];

/// Highest tier
pub const GUARDIAN_POOL_TIER_3: [&str; 8] = [
    "Outlander_Priest",
    "Golem_Firesteel",
    "Golem_Crystal_Earth",
    "Golem_Crystal_Flame",
    "Golem_Crystal_Frost",
    "Golem_Crystal_Sand",
    "Golem_Crystal_Thunder",
    "Golem_Guardian_Void",
];

/// Every type id eligible to trigger a collapse
pub fn is_guardian_type_id(type_id: &str) -> bool {
    GUARDIAN_POOL_TIER_1_2.contains(&type_id) || GUARDIAN_POOL_TIER_3.contains(&type_id)
}

/// True for template placeholders only
pub fn is_guardian_marker_id(marker_id: &str) -> bool {
    GUARDIAN_MARKER_IDS.contains(&marker_id)
}

/// True for placeholders and for markers already randomized to a concrete
/// guardian type
pub fn is_guardian_spawn_marker_id(marker_id: &str) -> bool {
    !marker_id.is_empty() && (is_guardian_marker_id(marker_id) || is_guardian_type_id(marker_id))
}

pub fn pool_for_marker(marker_id: &str) -> &'static [&'static str] {
    if marker_id == "Outlander_Priest" {
        &GUARDIAN_POOL_TIER_3
    } else {
        &GUARDIAN_POOL_TIER_1_2
    }
}

/// Picks a concrete guardian for a placeholder marker.
///
/// Starts at a random pool slot and walks forward to the first candidate
/// `available` accepts; falls back to the marker id itself.
pub fn choose_guardian<R, F>(rng: &mut R, marker_id: &str, available: F) -> String
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    let pool = pool_for_marker(marker_id);
    let start = rng.gen_range(0..pool.len());
    (0..pool.len())
        .map(|i| pool[(start + i) % pool.len()])
        .find(|candidate| available(candidate))
        .unwrap_or(marker_id)
        .to_string()
}
