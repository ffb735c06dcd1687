//! Protocol filter strategies.
//!
//! The gateway asks these whether a transport may serve a request before it
//! starts a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::FilterError;

/// Transports the gateway can serve a run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Sse,
    #[serde(alias = "ws")]
    WebSocket,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(FilterError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Decides whether a transport may be used.
pub trait ProtocolFilterStrategy: Send + Sync + std::fmt::Debug {
    fn should_allow(&self, protocol: ProtocolKind) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllProtocols;

impl ProtocolFilterStrategy for AllowAllProtocols {
    fn should_allow(&self, _protocol: ProtocolKind) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllProtocols;

impl ProtocolFilterStrategy for DenyAllProtocols {
    fn should_allow(&self, _protocol: ProtocolKind) -> bool {
        false
    }
}

/// Allow only the listed transports.
#[derive(Debug, Clone, Default)]
pub struct WhitelistProtocols {
    allowed: BTreeSet<ProtocolKind>,
}

impl WhitelistProtocols {
    pub fn new(allowed: impl IntoIterator<Item = ProtocolKind>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl ProtocolFilterStrategy for WhitelistProtocols {
    fn should_allow(&self, protocol: ProtocolKind) -> bool {
        self.allowed.contains(&protocol)
    }
}

/// Allow everything except the listed transports.
#[derive(Debug, Clone, Default)]
pub struct BlacklistProtocols {
    blocked: BTreeSet<ProtocolKind>,
}

impl BlacklistProtocols {
    pub fn new(blocked: impl IntoIterator<Item = ProtocolKind>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
        }
    }
}

impl ProtocolFilterStrategy for BlacklistProtocols {
    fn should_allow(&self, protocol: ProtocolKind) -> bool {
        !self.blocked.contains(&protocol)
    }
}

/// Every member must allow. An empty composite allows everything.
#[derive(Debug, Clone, Default)]
pub struct CompositeProtocolFilter {
    strategies: Vec<Arc<dyn ProtocolFilterStrategy>>,
}

impl CompositeProtocolFilter {
    pub fn new(strategies: Vec<Arc<dyn ProtocolFilterStrategy>>) -> Self {
        Self { strategies }
    }
}

impl ProtocolFilterStrategy for CompositeProtocolFilter {
    fn should_allow(&self, protocol: ProtocolKind) -> bool {
        self.strategies.iter().all(|s| s.should_allow(protocol))
    }
}
