//! Error types for host calls and collapse commands.
//!
//! Host failures are mostly absorbed at the call site (logged, then the scan
//! moves on). Only command paths such as `delay` surface a [`CollapseError`].

use thiserror::Error;

/// Failure reported by a host capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("region not loaded")]
    RegionNotLoaded,
    #[error("component missing")]
    MissingComponent,
    #[error("unknown effect: {0}")]
    UnknownEffect(String),
    #[error("world closed: {0}")]
    WorldClosed(String),
    #[error("rejected by host: {0}")]
    Rejected(String),
}

/// Failure of a collapse command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollapseError {
    #[error("no pending collapse")]
    NoPendingCollapse,
    #[error("collapse already imploding")]
    AlreadyImploding,
    #[error("unknown world: {0}")]
    UnknownWorld(String),
    #[error("delay must be positive")]
    InvalidDelay,
    #[error("countdown already at the delay cap")]
    DelayCapReached,
    #[error(transparent)]
    Host(#[from] HostError),
}
