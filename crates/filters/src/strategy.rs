//! Tool filter strategies.
//!
//! A strategy is a pure function from a tool list to a sub-list. Input order
//! is the only tie-break any strategy relies on.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use toolflow_core::ToolSpec;
use tracing::debug;

/// A stateless policy that narrows a tool list.
pub trait ToolFilterStrategy: Send + Sync + std::fmt::Debug {
    /// Kind tag ("threshold", "tag", "priority", "composite").
    fn kind(&self) -> &'static str;

    fn filter(&self, tools: &[Arc<ToolSpec>]) -> Vec<Arc<ToolSpec>>;
}

/// Parameters accepted when building a strategy by kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyParams {
    #[serde(default)]
    pub max_tools: Option<usize>,

    #[serde(default)]
    pub include_tags: Vec<String>,

    #[serde(default)]
    pub exclude_tags: Vec<String>,

    /// Names of already-registered strategies, for composites
    #[serde(default)]
    pub strategies: Vec<String>,
}

/// Keep the first `max_tools` tools in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdFilter {
    pub max_tools: usize,
}

impl ThresholdFilter {
    pub fn new(max_tools: usize) -> Self {
        Self { max_tools }
    }
}

impl ToolFilterStrategy for ThresholdFilter {
    fn kind(&self) -> &'static str {
        "threshold"
    }

    fn filter(&self, tools: &[Arc<ToolSpec>]) -> Vec<Arc<ToolSpec>> {
        let kept: Vec<_> = tools.iter().take(self.max_tools).cloned().collect();
        debug!(before = tools.len(), after = kept.len(), "Threshold filter applied");
        kept
    }
}

/// Keep or drop tools by tag membership.
///
/// A non-empty include set requires at least one matching tag; it is checked
/// before the exclude set, which drops any tool carrying an excluded tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub included: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl TagFilter {
    pub fn new<I, E, S>(included: I, excluded: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            included: included.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    fn admits(&self, tool: &ToolSpec) -> bool {
        if !self.included.is_empty() && tool.tags.is_disjoint(&self.included) {
            return false;
        }
        if !self.excluded.is_empty() && !tool.tags.is_disjoint(&self.excluded) {
            return false;
        }
        true
    }
}

impl ToolFilterStrategy for TagFilter {
    fn kind(&self) -> &'static str {
        "tag"
    }

    fn filter(&self, tools: &[Arc<ToolSpec>]) -> Vec<Arc<ToolSpec>> {
        let kept: Vec<_> = tools.iter().filter(|t| self.admits(t)).cloned().collect();
        debug!(before = tools.len(), after = kept.len(), "Tag filter applied");
        kept
    }
}

/// Sort by descending priority and keep the top `max_tools`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFilter {
    pub max_tools: usize,
}

impl PriorityFilter {
    pub fn new(max_tools: usize) -> Self {
        Self { max_tools }
    }
}

impl ToolFilterStrategy for PriorityFilter {
    fn kind(&self) -> &'static str {
        "priority"
    }

    fn filter(&self, tools: &[Arc<ToolSpec>]) -> Vec<Arc<ToolSpec>> {
        let mut ranked: Vec<(usize, &Arc<ToolSpec>)> = tools.iter().enumerate().collect();
        // Ties fall back to input position.
        ranked.sort_unstable_by_key(|(idx, tool)| (std::cmp::Reverse(tool.priority), *idx));

        let kept: Vec<_> = ranked
            .into_iter()
            .take(self.max_tools)
            .map(|(_, tool)| tool.clone())
            .collect();
        debug!(before = tools.len(), after = kept.len(), "Priority filter applied");
        kept
    }
}

/// Apply strategies left to right. An empty list is the identity.
#[derive(Debug, Clone, Default)]
pub struct CompositeFilter {
    strategies: Vec<Arc<dyn ToolFilterStrategy>>,
}

impl CompositeFilter {
    pub fn new(strategies: Vec<Arc<dyn ToolFilterStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl ToolFilterStrategy for CompositeFilter {
    fn kind(&self) -> &'static str {
        "composite"
    }

    fn filter(&self, tools: &[Arc<ToolSpec>]) -> Vec<Arc<ToolSpec>> {
        self.strategies
            .iter()
            .fold(tools.to_vec(), |acc, strategy| strategy.filter(&acc))
    }
}
