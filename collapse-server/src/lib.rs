//! Tower Collapse Server Library
//!
//! Hosts the collapse service over simulated worlds:
//! - bevy ECS entity storage plus block maps per world
//! - One serialized runner thread per world
//! - HTTP/JSON API for triggers, delays, defeat reports and vault use
//! - Request and collapse metrics (Prometheus + JSON export)

pub mod api; // HTTP/JSON API endpoints
pub mod components; // ECS components (Player, Creature, Inventory, ...)
pub mod metrics; // Server metrics (Prometheus + JSON export)
pub mod sim_world; // In-memory HostWorld implementation
pub mod world_runner; // Per-world job threads

pub use api::{build_router, ApiState};
pub use sim_world::SimWorld;
pub use world_runner::{WorldDirectory, WorldRunner};
