//! Guardian identity → structure anchor resolution
//!
//! The host exposes a guardian's identity through channels of different
//! strength, and not all of them are available in every call context:
//!
//! ```text
//! persistent uuid ─┐
//! store index ─────┼─► resolve() ─► StructureKey
//! transient hash ──┤
//! marker uuid ─────┘  (indirect: marker registered before the guardian spawned;
//!                      a hit back-fills the three direct channels)
//! ```
//!
//! Store-index and hash channels are scoped per world. Every hit is checked
//! against the caller's world.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::state::StructureKey;

/// Whatever the host could tell us about a guardian
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianIdentity {
    pub world_id: String,
    /// Volatile handle hash, always available, rebuilt often
    pub transient_hash: u64,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub store_index: Option<u64>,
    /// Spawn marker this guardian came from, if any
    #[serde(default)]
    pub marker_uuid: Option<Uuid>,
}

impl GuardianIdentity {
    pub fn new(world_id: impl Into<String>, transient_hash: u64) -> Self {
        Self {
            world_id: world_id.into(),
            transient_hash,
            uuid: None,
            store_index: None,
            marker_uuid: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_store_index(mut self, index: u64) -> Self {
        self.store_index = Some(index);
        self
    }

    pub fn with_marker(mut self, marker: Uuid) -> Self {
        self.marker_uuid = Some(marker);
        self
    }

    fn hash_key(&self) -> (String, u64) {
        (self.world_id.clone(), self.transient_hash)
    }

    fn index_key(&self) -> Option<(String, u64)> {
        self.store_index.map(|i| (self.world_id.clone(), i))
    }
}

/// Which channel produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Uuid,
    StoreIndex,
    TransientHash,
    Marker,
}

#[derive(Default)]
pub struct AnchorRegistry {
    by_uuid: RwLock<HashMap<Uuid, StructureKey>>,
    by_store_index: RwLock<HashMap<(String, u64), StructureKey>>,
    by_hash: RwLock<HashMap<(String, u64), StructureKey>>,
    by_marker: RwLock<HashMap<Uuid, StructureKey>>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` under every direct channel `identity` carries
    pub fn register_anchor(&self, identity: &GuardianIdentity, key: &StructureKey) {
        self.by_hash.write().insert(identity.hash_key(), key.clone());
        if let Some(index) = identity.index_key() {
            self.by_store_index.write().insert(index, key.clone());
        }
        if let Some(uuid) = identity.uuid {
            self.by_uuid.write().insert(uuid, key.clone());
        }
    }

    /// Records the anchor for a spawn marker whose guardian does not exist yet
    pub fn register_marker_anchor(
        &self,
        world_id: &str,
        marker_uuid: Uuid,
        position: [f64; 3],
    ) -> StructureKey {
        let key = StructureKey::from_position(world_id, position);
        self.by_marker.write().insert(marker_uuid, key.clone());
        key
    }

    pub fn resolve(&self, identity: &GuardianIdentity) -> Option<StructureKey> {
        self.resolve_with_channel(identity).map(|(key, _)| key)
    }

    pub fn resolve_with_channel(
        &self,
        identity: &GuardianIdentity,
    ) -> Option<(StructureKey, ResolvedVia)> {
        if let Some(uuid) = identity.uuid {
            let by_uuid = self.by_uuid.read();
            if let Some(key) = by_uuid.get(&uuid) {
                if key.world_id == identity.world_id {
                    return Some((key.clone(), ResolvedVia::Uuid));
                }
            }
        }

        if let Some(index) = identity.index_key() {
            if let Some(key) = self.by_store_index.read().get(&index) {
                return Some((key.clone(), ResolvedVia::StoreIndex));
            }
        }

        if let Some(key) = self.by_hash.read().get(&identity.hash_key()) {
            return Some((key.clone(), ResolvedVia::TransientHash));
        }

        let marker = identity.marker_uuid?;
        let key = self
            .by_marker
            .read()
            .get(&marker)
            .filter(|k| k.world_id == identity.world_id)
            .cloned()?;
        debug!(world = %identity.world_id, marker = %marker, anchor = %key, "Anchor resolved via spawn marker");
        self.register_anchor(identity, &key);
        Some((key, ResolvedVia::Marker))
    }

    /// Drops every channel entry for a guardian whose death was handled
    pub fn forget(&self, identity: &GuardianIdentity) {
        self.by_hash.write().remove(&identity.hash_key());
        if let Some(index) = identity.index_key() {
            self.by_store_index.write().remove(&index);
        }
        if let Some(uuid) = identity.uuid {
            self.by_uuid.write().remove(&uuid);
        }
        if let Some(marker) = identity.marker_uuid {
            self.by_marker.write().remove(&marker);
        }
    }

    pub fn clear(&self) {
        self.by_uuid.write().clear();
        self.by_store_index.write().clear();
        self.by_hash.write().clear();
        self.by_marker.write().clear();
    }

    /// Total entries across all channels
    pub fn len(&self) -> usize {
        self.by_uuid.read().len()
            + self.by_store_index.read().len()
            + self.by_hash.read().len()
            + self.by_marker.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guardians whose death already triggered (or was handled by) a collapse.
///
/// Mirrors the direct identity channels so that a death reported once by
/// uuid and later by hash is still recognized.
#[derive(Default)]
pub struct DefeatedGuardianSet {
    uuids: RwLock<HashSet<Uuid>>,
    store_indices: RwLock<HashSet<(String, u64)>>,
    hashes: RwLock<HashSet<(String, u64)>>,
}

impl DefeatedGuardianSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, identity: &GuardianIdentity) {
        self.hashes.write().insert(identity.hash_key());
        if let Some(index) = identity.index_key() {
            self.store_indices.write().insert(index);
        }
        if let Some(uuid) = identity.uuid {
            self.uuids.write().insert(uuid);
        }
    }

    pub fn contains(&self, identity: &GuardianIdentity) -> bool {
        if let Some(uuid) = identity.uuid {
            if self.uuids.read().contains(&uuid) {
                return true;
            }
        }
        if let Some(index) = identity.index_key() {
            if self.store_indices.read().contains(&index) {
                return true;
            }
        }
        self.hashes.read().contains(&identity.hash_key())
    }

    pub fn clear(&self) {
        self.uuids.write().clear();
        self.store_indices.write().clear();
        self.hashes.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(x: i32) -> StructureKey {
        StructureKey::new("overworld", x, 80, 0)
    }

    #[test]
    fn test_resolve_by_hash_only() {
        let reg = AnchorRegistry::new();
        let id = GuardianIdentity::new("overworld", 42);
        reg.register_anchor(&id, &anchor(1));
        assert_eq!(reg.resolve(&id), Some(anchor(1)));
    }

    #[test]
    fn test_uuid_wins_over_weaker_channels() {
        let reg = AnchorRegistry::new();
        let uuid = Uuid::new_v4();
        reg.register_anchor(&GuardianIdentity::new("overworld", 7), &anchor(1));
        reg.register_anchor(&GuardianIdentity::new("overworld", 8).with_uuid(uuid), &anchor(2));

        // same hash as the first guardian, but its uuid points elsewhere
        let lookup = GuardianIdentity::new("overworld", 7).with_uuid(uuid);
        let (key, via) = reg.resolve_with_channel(&lookup).unwrap();
        assert_eq!(key, anchor(2));
        assert_eq!(via, ResolvedVia::Uuid);
    }

    #[test]
    fn test_store_index_before_hash() {
        let reg = AnchorRegistry::new();
        reg.register_anchor(&GuardianIdentity::new("overworld", 1), &anchor(1));
        reg.register_anchor(
            &GuardianIdentity::new("overworld", 2).with_store_index(99),
            &anchor(2),
        );
        let lookup = GuardianIdentity::new("overworld", 1).with_store_index(99);
        assert_eq!(
            reg.resolve_with_channel(&lookup),
            Some((anchor(2), ResolvedVia::StoreIndex))
        );
    }

    #[test]
    fn test_world_mismatch_does_not_resolve() {
        let reg = AnchorRegistry::new();
        let uuid = Uuid::new_v4();
        reg.register_anchor(&GuardianIdentity::new("overworld", 5).with_uuid(uuid), &anchor(1));
        let other_world = GuardianIdentity::new("nether", 5).with_uuid(uuid);
        assert_eq!(reg.resolve(&other_world), None);
    }

    #[test]
    fn test_marker_resolution_backfills() {
        let reg = AnchorRegistry::new();
        let marker = Uuid::new_v4();
        let key = reg.register_marker_anchor("overworld", marker, [10.7, 80.0, -3.2]);
        assert_eq!(key, StructureKey::new("overworld", 10, 80, -4));

        let uuid = Uuid::new_v4();
        let guardian = GuardianIdentity::new("overworld", 77)
            .with_uuid(uuid)
            .with_store_index(3)
            .with_marker(marker);
        assert_eq!(
            reg.resolve_with_channel(&guardian),
            Some((key.clone(), ResolvedVia::Marker))
        );

        // later lookups without the marker hit the back-filled channels
        let by_uuid = GuardianIdentity::new("overworld", 1000).with_uuid(uuid);
        assert_eq!(reg.resolve_with_channel(&by_uuid).map(|r| r.1), Some(ResolvedVia::Uuid));
        let by_hash = GuardianIdentity::new("overworld", 77);
        assert_eq!(reg.resolve(&by_hash), Some(key));
    }

    #[test]
    fn test_unknown_identity_resolves_nothing() {
        let reg = AnchorRegistry::new();
        let id = GuardianIdentity::new("overworld", 1).with_marker(Uuid::new_v4());
        assert_eq!(reg.resolve(&id), None);
    }

    #[test]
    fn test_forget_removes_all_channels() {
        let reg = AnchorRegistry::new();
        let marker = Uuid::new_v4();
        reg.register_marker_anchor("overworld", marker, [0.0, 64.0, 0.0]);
        let id = GuardianIdentity::new("overworld", 9)
            .with_uuid(Uuid::new_v4())
            .with_store_index(4)
            .with_marker(marker);
        assert!(reg.resolve(&id).is_some());
        assert_eq!(reg.len(), 4);

        reg.forget(&id);
        assert!(reg.is_empty());
        assert_eq!(reg.resolve(&id), None);
    }

    #[test]
    fn test_defeated_set_matches_any_channel() {
        let set = DefeatedGuardianSet::new();
        let uuid = Uuid::new_v4();
        set.mark(&GuardianIdentity::new("overworld", 1).with_uuid(uuid));

        assert!(set.contains(&GuardianIdentity::new("overworld", 1)));
        assert!(set.contains(&GuardianIdentity::new("overworld", 2).with_uuid(uuid)));
        assert!(!set.contains(&GuardianIdentity::new("overworld", 2)));
        assert!(!set.contains(&GuardianIdentity::new("nether", 1)));

        set.clear();
        assert!(!set.contains(&GuardianIdentity::new("overworld", 1)));
    }
}
