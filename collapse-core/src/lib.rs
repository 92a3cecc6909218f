//! Tower Collapse - Core Library
//!
//! Host-agnostic lifecycle of a destructible tower:
//! - Anchor resolution (guardian identity → structure key, multi-channel)
//! - Per-structure state store (Idle → Scheduled → Imploding → Complete)
//! - Geometry scans (top, footprint, ruin floor)
//! - Block removal and entity purges, best-effort effects
//! - Collapse scheduler (countdown, delay, tick-driven implosion)
//! - Vault access gating behind a consumable key
//!
//! All world access goes through the capability traits in [`host`].

pub mod anchor;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod guardian;
pub mod host;
pub mod logging;
pub mod removal;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod vault;

#[cfg(test)]
mod testing;

pub use anchor::{AnchorRegistry, DefeatedGuardianSet, GuardianIdentity};
pub use config::{CollapseConfig, EconomyConfig, VaultConfig};
pub use error::{CollapseError, HostError};
pub use scheduler::{CollapseScheduler, SchedulerThread};
pub use service::{DefeatOutcome, DefeatSource, TowerCollapseService};
pub use state::{CollapsePhase, StructureKey, StructureStatus, TowerStateStore};
pub use vault::{InteractionKind, VaultAccessController, VaultDecision};
