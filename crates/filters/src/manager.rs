//! Named directory of filter strategies.
//!
//! The [`FilterManager`] answers "which tools can this run see" and "may this
//! transport serve a run". Unknown names never fail: tool lookups fall back
//! to `Threshold(5)` and protocol lookups fall back to allow-all.

use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use toolflow_core::{ToolRegistry, ToolSpec};
use tracing::{debug, info, warn};

use crate::FilterError;
use crate::protocol::{
    AllowAllProtocols, DenyAllProtocols, ProtocolFilterStrategy, ProtocolKind, WhitelistProtocols,
};
use crate::strategy::{
    CompositeFilter, PriorityFilter, StrategyParams, TagFilter, ThresholdFilter,
    ToolFilterStrategy,
};

/// Tool count used by the fallback strategy and by kinds built without `max_tools`.
pub const DEFAULT_MAX_TOOLS: usize = 5;

type ToolStrategies = IndexMap<String, Arc<dyn ToolFilterStrategy>>;
type ProtocolStrategies = IndexMap<String, Arc<dyn ProtocolFilterStrategy>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, read-mostly strategy directory.
///
/// Register custom strategies at startup, before runs begin. Lookups take a
/// read lock only.
pub struct FilterManager {
    registry: Arc<ToolRegistry>,
    tool_strategies: RwLock<ToolStrategies>,
    protocol_strategies: RwLock<ProtocolStrategies>,
    fallback: Arc<dyn ToolFilterStrategy>,
}

impl std::fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterManager")
            .field("tool_strategies", &self.list_strategy_names())
            .field("protocol_strategies", &self.list_protocol_strategy_names())
            .finish()
    }
}

impl FilterManager {
    /// Create a manager over `registry` with the default strategies installed.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let manager = Self {
            registry,
            tool_strategies: RwLock::new(IndexMap::new()),
            protocol_strategies: RwLock::new(IndexMap::new()),
            fallback: Arc::new(ThresholdFilter::new(DEFAULT_MAX_TOOLS)),
        };
        manager.install_defaults();
        info!("Initialized filter manager with default strategies");
        manager
    }

    fn install_defaults(&self) {
        {
            let mut tools = write(&self.tool_strategies);
            tools.insert("threshold_5".into(), Arc::new(ThresholdFilter::new(5)));
            tools.insert("threshold_10".into(), Arc::new(ThresholdFilter::new(10)));
            tools.insert("priority".into(), Arc::new(PriorityFilter::new(5)));
        }

        let mut protocols = write(&self.protocol_strategies);
        protocols.insert("allow_all".into(), Arc::new(AllowAllProtocols));
        protocols.insert("deny_all".into(), Arc::new(DenyAllProtocols));
        protocols.insert(
            "http_only".into(),
            Arc::new(WhitelistProtocols::new([ProtocolKind::Http])),
        );
        protocols.insert(
            "sse_only".into(),
            Arc::new(WhitelistProtocols::new([ProtocolKind::Sse])),
        );
        protocols.insert(
            "websocket_only".into(),
            Arc::new(WhitelistProtocols::new([ProtocolKind::WebSocket])),
        );
    }

    /// The registry this manager filters.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    // --- Tool strategies ---

    /// Register a tool strategy. Overwrites any strategy with the same name.
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn ToolFilterStrategy>) {
        let name = name.into();
        info!(strategy = %name, kind = strategy.kind(), "Registered tool filter strategy");
        write(&self.tool_strategies).insert(name, strategy);
    }

    pub fn get_strategy(&self, name: &str) -> Option<Arc<dyn ToolFilterStrategy>> {
        read(&self.tool_strategies).get(name).cloned()
    }

    /// Build a strategy from a kind tag and parameters.
    ///
    /// `composite` resolves `params.strategies` against the strategies
    /// registered so far.
    pub fn build_strategy(
        &self,
        kind: &str,
        params: &StrategyParams,
    ) -> Result<Arc<dyn ToolFilterStrategy>, FilterError> {
        let max_tools = params.max_tools.unwrap_or(DEFAULT_MAX_TOOLS);
        let strategy: Arc<dyn ToolFilterStrategy> = match kind {
            "threshold" => Arc::new(ThresholdFilter::new(max_tools)),
            "priority" => Arc::new(PriorityFilter::new(max_tools)),
            "tag" => Arc::new(TagFilter::new(
                params.include_tags.iter().cloned(),
                params.exclude_tags.iter().cloned(),
            )),
            "composite" => self.create_composite_strategy(&params.strategies, None),
            other => return Err(FilterError::UnknownKind(other.to_string())),
        };
        Ok(strategy)
    }

    /// Build a strategy by kind and register it under `name`.
    pub fn register_from_params(
        &self,
        name: &str,
        kind: &str,
        params: &StrategyParams,
    ) -> Result<(), FilterError> {
        let strategy = self.build_strategy(kind, params)?;
        self.register_strategy(name, strategy);
        Ok(())
    }

    /// Combine registered strategies, in order, into a composite.
    ///
    /// Unknown names are skipped with a warning. If none resolve the composite
    /// wraps the default threshold. Registered under `name` when given.
    pub fn create_composite_strategy<S: AsRef<str>>(
        &self,
        strategy_names: &[S],
        name: Option<&str>,
    ) -> Arc<dyn ToolFilterStrategy> {
        let mut strategies = Vec::with_capacity(strategy_names.len());
        for strategy_name in strategy_names {
            let strategy_name = strategy_name.as_ref();
            match self.get_strategy(strategy_name) {
                Some(s) => strategies.push(s),
                None => warn!(strategy = %strategy_name, "Tool strategy not found, skipping"),
            }
        }

        if strategies.is_empty() {
            warn!("No valid tool strategies for composite, using default threshold");
            strategies.push(self.fallback.clone());
        }

        let composite: Arc<dyn ToolFilterStrategy> = Arc::new(CompositeFilter::new(strategies));
        if let Some(name) = name {
            self.register_strategy(name, composite.clone());
        }
        composite
    }

    /// Build a tag strategy, registered under `name` when given.
    pub fn create_tag_strategy<I, E, S>(
        &self,
        included: I,
        excluded: E,
        name: Option<&str>,
    ) -> Arc<dyn ToolFilterStrategy>
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strategy: Arc<dyn ToolFilterStrategy> = Arc::new(TagFilter::new(included, excluded));
        if let Some(name) = name {
            self.register_strategy(name, strategy.clone());
        }
        strategy
    }

    /// Resolve the tools visible to a run.
    ///
    /// A non-empty `tags` list first keeps only tools with at least one of
    /// those tags. Then the named strategy is applied, or the default
    /// threshold when the name is absent or unknown.
    pub fn resolve(&self, strategy_name: Option<&str>, tags: &[String]) -> Vec<Arc<ToolSpec>> {
        let mut tools = self.registry.list();
        if !tags.is_empty() {
            tools.retain(|t| t.has_any_tag(tags));
        }

        let strategy = match strategy_name {
            Some(name) => self.get_strategy(name).unwrap_or_else(|| {
                warn!(strategy = %name, "Tool strategy not found, using default");
                self.fallback.clone()
            }),
            None => self.fallback.clone(),
        };

        let visible = strategy.filter(&tools);
        debug!(
            strategy = strategy_name.unwrap_or("default"),
            registered = self.registry.len(),
            visible = visible.len(),
            "Resolved visible tools"
        );
        visible
    }

    /// Names of all registered tool strategies, in registration order.
    pub fn list_strategy_names(&self) -> Vec<String> {
        read(&self.tool_strategies).keys().cloned().collect()
    }

    /// Drop every custom registration and restore the defaults.
    pub fn reset(&self) {
        write(&self.tool_strategies).clear();
        write(&self.protocol_strategies).clear();
        self.install_defaults();
        info!("Reset all filter strategies to defaults");
    }

    // --- Protocol strategies ---

    pub fn register_protocol_strategy(
        &self,
        name: impl Into<String>,
        strategy: Arc<dyn ProtocolFilterStrategy>,
    ) {
        let name = name.into();
        info!(strategy = %name, "Registered protocol filter strategy");
        write(&self.protocol_strategies).insert(name, strategy);
    }

    pub fn get_protocol_strategy(&self, name: &str) -> Option<Arc<dyn ProtocolFilterStrategy>> {
        read(&self.protocol_strategies).get(name).cloned()
    }

    /// Whether `protocol` may be served under the named strategy.
    ///
    /// No name, or an unknown one, allows everything.
    pub fn should_allow_protocol(&self, protocol: ProtocolKind, strategy_name: Option<&str>) -> bool {
        let Some(name) = strategy_name else {
            return true;
        };
        match self.get_protocol_strategy(name) {
            Some(strategy) => strategy.should_allow(protocol),
            None => {
                warn!(strategy = %name, "Protocol strategy not found, allowing all");
                true
            }
        }
    }

    pub fn list_protocol_strategy_names(&self) -> Vec<String> {
        read(&self.protocol_strategies).keys().cloned().collect()
    }
}
