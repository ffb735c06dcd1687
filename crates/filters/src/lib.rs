//! # toolflow filters
//!
//! Decides which tools a run can see and which transports may serve it.
//!
//! - [`strategy`]: pure tool filter strategies (threshold, tag, priority, composite).
//! - [`protocol`]: protocol filter strategies consulted by the gateway.
//! - [`manager`]: the [`FilterManager`], a named directory of both kinds with
//!   graceful fallback on unknown names.

pub mod manager;
pub mod protocol;
pub mod strategy;

pub use manager::{DEFAULT_MAX_TOOLS, FilterManager};
pub use protocol::{
    AllowAllProtocols, BlacklistProtocols, CompositeProtocolFilter, DenyAllProtocols,
    ProtocolFilterStrategy, ProtocolKind, WhitelistProtocols,
};
pub use strategy::{
    CompositeFilter, PriorityFilter, StrategyParams, TagFilter, ThresholdFilter,
    ToolFilterStrategy,
};

use thiserror::Error;

/// Errors raised while building filter strategies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown filter strategy kind: {0}")]
    UnknownKind(String),

    #[error("Unknown protocol type: {0}")]
    UnknownProtocol(String),
}
