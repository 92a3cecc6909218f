use serde::{Deserialize, Serialize};

/// Collapse timing and announcement tunables.
///
/// Values outside their bounds are clamped by [`CollapseConfig::clamped`],
/// never rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseConfig {
    /// Countdown before implosion starts, `[5, 600]` seconds
    pub delay_seconds: u64,
    /// Radius within which actors receive countdown messages, `[16, 512]` blocks
    pub announce_radius_blocks: i32,
    /// Implosion tick period, `[50, 2000]` ms
    pub tick_ms: u64,
    /// Layers removed per implosion tick, `[1, 10]`
    pub layers_per_tick: i32,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 30,
            announce_radius_blocks: 64,
            tick_ms: 300,
            layers_per_tick: 2,
        }
    }
}

impl CollapseConfig {
    pub const DELAY_BOUNDS: (u64, u64) = (5, 600);
    pub const ANNOUNCE_BOUNDS: (i32, i32) = (16, 512);
    pub const TICK_BOUNDS: (u64, u64) = (50, 2000);
    pub const LAYERS_BOUNDS: (i32, i32) = (1, 10);

    pub fn clamped(&self) -> Self {
        Self {
            delay_seconds: self
                .delay_seconds
                .clamp(Self::DELAY_BOUNDS.0, Self::DELAY_BOUNDS.1),
            announce_radius_blocks: self
                .announce_radius_blocks
                .clamp(Self::ANNOUNCE_BOUNDS.0, Self::ANNOUNCE_BOUNDS.1),
            tick_ms: self.tick_ms.clamp(Self::TICK_BOUNDS.0, Self::TICK_BOUNDS.1),
            layers_per_tick: self
                .layers_per_tick
                .clamp(Self::LAYERS_BOUNDS.0, Self::LAYERS_BOUNDS.1),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str::<Self>(json).ok().map(|c| c.clamped())
    }
}

/// Vault gating rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub key_item_id: String,
    pub keys_per_unlock: u32,
    pub warn_cooldown_ms: i64,
    /// Only blocks whose id starts with this prefix are gated
    pub container_prefix: String,
    pub region_radius: i32,
    pub max_below_anchor: i32,
    pub max_above_anchor: i32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_item_id: "BattleTowers_Tower_Key".into(),
            keys_per_unlock: 1,
            warn_cooldown_ms: 1250,
            container_prefix: "Furniture_Village_Chest".into(),
            region_radius: 28,
            max_below_anchor: 20,
            max_above_anchor: 8,
        }
    }
}

/// Item costs for the delay and key-forging commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub sigil_item_id: String,
    pub core_item_id: String,
    pub seconds_per_sigil: u64,
    pub max_sigils: u32,
    pub forge_sigil_cost: u32,
    pub forge_core_cost: u32,
    pub delay_search_radius: i32,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            sigil_item_id: "BattleTowers_Tower_Sigil".into(),
            core_item_id: "BattleTowers_Tower_Core".into(),
            seconds_per_sigil: 10,
            max_sigils: 5,
            forge_sigil_cost: 5,
            forge_core_cost: 1,
            delay_search_radius: 128,
        }
    }
}
