//! Tool capability: specifications, invocation records, and the registry.
//!
//! A tool is a [`ToolSpec`] (what the model sees) paired with a
//! [`ToolHandler`] (what actually runs). The [`ToolRegistry`] stores them by
//! name, exposes the specs for filtering, and invokes handlers on behalf of
//! the orchestration engine.

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Named arguments for a tool call.
pub type Parameters = serde_json::Map<String, Value>;

fn default_required() -> bool {
    true
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,

    /// JSON Schema type tag ("string", "number", "integer", "boolean", ...)
    #[serde(rename = "type")]
    pub param_type: String,

    pub description: String,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values, if the parameter is an enumeration
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
}

impl ToolParameter {
    /// A required parameter.
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: Vec::new(),
        }
    }

    /// An optional parameter.
    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = values.into_iter().collect();
        self
    }
}

/// Immutable description of a callable capability.
///
/// Built once, handed to [`ToolRegistry::register`], and shared behind an
/// `Arc` from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique key in the registry
    pub name: String,

    pub description: String,

    #[serde(default)]
    pub parameters: Vec<ToolParameter>,

    /// Labels used by tag filtering
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Higher is preferred by priority filtering
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            tags: BTreeSet::new(),
            priority: 0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this tool carries at least one of the given tags.
    pub fn has_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.tags.contains(t.as_ref()))
    }

    /// JSON Schema object describing the parameters (sent to the model).
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for p in &self.parameters {
            let mut prop = serde_json::json!({
                "type": p.param_type,
                "description": p.description,
            });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            if !p.enum_values.is_empty() {
                prop["enum"] = Value::Array(p.enum_values.clone());
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert this spec into the model-facing definition.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }
}

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// Opaque id correlating the request with its result
    pub call_id: String,

    pub tool_name: String,

    #[serde(default)]
    pub parameters: Parameters,
}

impl ToolInvocationRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Parameters,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// The outcome of executing one [`ToolInvocationRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub call_id: String,

    pub tool_name: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolInvocationResult {
    pub fn succeeded(request: &ToolInvocationRequest, output: Value) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            success: true,
            output: Some(output),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(request: &ToolInvocationRequest, error: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Text of the `tool` message the model sees on its next turn.
    pub fn content(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error: {error}");
        }
        match &self.output {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// The invocation half of a tool.
///
/// Implementations return `Err` for any failure; the registry turns it into
/// a failed [`ToolInvocationResult`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, parameters: Parameters) -> std::result::Result<Value, ToolError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send,
{
    async fn invoke(&self, parameters: Parameters) -> std::result::Result<Value, ToolError> {
        (self.0)(parameters).await
    }
}

/// Wrap an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct RegisteredTool {
    spec: Arc<ToolSpec>,
    handler: Arc<dyn ToolHandler>,
}

/// A registry of available tools.
///
/// Iteration order is registration order. Re-registering a name replaces the
/// spec and handler but keeps the original position.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool. Last registration wins.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        let name = spec.name.clone();
        let replaced = self
            .tools
            .insert(
                name.clone(),
                RegisteredTool {
                    spec: Arc::new(spec),
                    handler,
                },
            )
            .is_some();

        if replaced {
            info!(tool = %name, "Replaced existing tool registration");
        } else {
            info!(tool = %name, "Registered tool");
        }
    }

    /// Get a tool spec by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).map(|t| t.spec.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool specs, in registration order.
    pub fn list(&self) -> Vec<Arc<ToolSpec>> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// Model-facing definitions for every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.spec.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool.
    ///
    /// Returns `Err(ToolError::NotFound)` only for an unknown name. Handler
    /// errors and panics come back as `Ok` with `success == false`.
    pub async fn invoke(
        &self,
        request: &ToolInvocationRequest,
    ) -> std::result::Result<ToolInvocationResult, ToolError> {
        let tool = self
            .tools
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::NotFound(request.tool_name.clone()))?;

        debug!(tool = %request.tool_name, call_id = %request.call_id, "Invoking tool");

        let start = Instant::now();
        let outcome = AssertUnwindSafe(tool.handler.invoke(request.parameters.clone()))
            .catch_unwind()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(output)) => ToolInvocationResult::succeeded(request, output),
            Ok(Err(e)) => {
                warn!(tool = %request.tool_name, error = %e, "Tool returned an error");
                ToolInvocationResult::failed(request, e.to_string())
            }
            Err(panic) => {
                let err = ToolError::Panicked {
                    tool_name: request.tool_name.clone(),
                    reason: panic_message(panic.as_ref()),
                };
                warn!(tool = %request.tool_name, error = %err, "Tool panicked");
                ToolInvocationResult::failed(request, err.to_string())
            }
        };

        Ok(result.with_duration(duration_ms))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn invoke(&self, parameters: Parameters) -> std::result::Result<Value, ToolError> {
            let text = parameters
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))?;
            Ok(Value::String(text.to_string()))
        }
    }

    fn echo_spec() -> ToolSpec {
        ToolSpec::new("echo", "Echoes back the input")
            .with_parameter(ToolParameter::required("text", "string", "Text to echo"))
            .with_tags(["utility"])
    }

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_spec(), Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_lists_in_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["weather", "calculator", "search"] {
            registry.register(ToolSpec::new(name, name), Arc::new(EchoTool));
        }
        assert_eq!(registry.names(), vec!["weather", "calculator", "search"]);
    }

    #[test]
    fn last_registration_wins_and_keeps_position() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::new("a", "first"), Arc::new(EchoTool));
        registry.register(ToolSpec::new("b", "b"), Arc::new(EchoTool));
        registry.register(ToolSpec::new("a", "second").with_priority(9), Arc::new(EchoTool));

        assert_eq!(registry.len(), 2);
        let a = registry.get("a").unwrap();
        assert_eq!(a.description, "second");
        assert_eq!(a.priority, 9);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn parameters_schema_lists_required() {
        let spec = ToolSpec::new("weather", "Weather lookup")
            .with_parameter(ToolParameter::required("city", "string", "City name"))
            .with_parameter(
                ToolParameter::optional("units", "string", "Units")
                    .with_default(json!("metric"))
                    .with_enum([json!("metric"), json!("imperial")]),
            );
        let schema = spec.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["city"]));
        assert_eq!(schema["properties"]["units"]["default"], "metric");
        assert_eq!(schema["properties"]["units"]["enum"][1], "imperial");
    }

    #[tokio::test]
    async fn registry_invoke_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_spec(), Arc::new(EchoTool));

        let request = ToolInvocationRequest::new("call_1", "echo", params(json!({"text": "hello"})));
        let result = registry.invoke(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.output, Some(json!("hello")));
        assert_eq!(result.content(), "hello");
        assert!(result.duration_ms.is_some());
    }

    #[tokio::test]
    async fn registry_invoke_missing_tool() {
        let registry = ToolRegistry::new();
        let request = ToolInvocationRequest::new("call_1", "nonexistent", Parameters::new());
        let err = registry.invoke(&request).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("weather", "Weather"),
            handler_fn(|_| async { Err(ToolError::failed("weather", "ConnectionError: timeout")) }),
        );

        let request = ToolInvocationRequest::new("c1", "weather", Parameters::new());
        let result = registry.invoke(&request).await.unwrap();
        assert!(!result.success);
        assert!(result.output.is_none());
        assert!(result.error.as_deref().unwrap().contains("timeout"));
        assert!(result.content().starts_with("Error: "));
    }

    #[tokio::test]
    async fn handler_panic_becomes_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("boom", "Always panics"),
            handler_fn(|_| async { panic!("kaboom") }),
        );

        let request = ToolInvocationRequest::new("c1", "boom", Parameters::new());
        let result = registry.invoke(&request).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("kaboom"));
    }

    #[test]
    fn result_content_serializes_structured_output() {
        let request = ToolInvocationRequest::new("c1", "calc", Parameters::new());
        let result = ToolInvocationResult::succeeded(&request, json!({"value": 4}));
        assert_eq!(result.content(), r#"{"value":4}"#);
    }
}
