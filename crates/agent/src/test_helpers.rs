//! Shared test helpers for engine and stream tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolflow_core::error::{ProviderError, ToolError};
use toolflow_core::message::Message;
use toolflow_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use toolflow_core::tool::{Parameters, ToolInvocationRequest, ToolParameter, ToolRegistry, ToolSpec, handler_fn};
use toolflow_filters::FilterManager;

/// One scripted model turn.
pub enum Scripted {
    Respond(ProviderResponse),
    Fail(ProviderError),
    /// Never returns; used to hold a run inside DECIDE.
    Hang,
}

/// A mock provider that plays back a script of turns.
///
/// Every request is recorded. Running past the end of the script is a
/// model failure.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Scripted::Respond(text_response(text))])
    }

    /// Create a provider that first requests tools, then answers.
    pub fn tool_then_answer(calls: Vec<ToolInvocationRequest>, answer: &str) -> Self {
        Self::new(vec![
            Scripted::Respond(tool_call_response(calls, "")),
            Scripted::Respond(text_response(answer)),
        ])
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_turn(&self, request: ProviderRequest) -> Option<Scripted> {
        self.requests.lock().unwrap().push(request);
        self.script.lock().unwrap().pop_front()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_turn(request) {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(ProviderError::InvalidResponse("script exhausted".into())),
        }
    }

    /// Streams the scripted text one word at a time, tool calls on the last chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let response = self.complete(request).await?;
        let words: Vec<String> = response
            .message
            .content
            .split_inclusive(' ')
            .map(String::from)
            .collect();

        let (tx, rx) = mpsc::channel(words.len() + 1);
        for word in words {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(word),
                    ..StreamChunk::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Create a response requesting tool calls, with optional content.
pub fn tool_call_response(calls: Vec<ToolInvocationRequest>, content: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content).with_tool_calls(calls),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn call(id: &str, name: &str, args: Value) -> ToolInvocationRequest {
    let parameters: Parameters = args.as_object().cloned().unwrap_or_default();
    ToolInvocationRequest::new(id, name, parameters)
}

/// Registry with a few deterministic tools:
/// - `weather`: echoes the city with a fixed forecast
/// - `calculator`: adds `a` and `b`
/// - `flaky`: always fails with a connection timeout
/// - `boom`: panics
pub fn sample_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec::new("weather", "Current weather for a city")
            .with_parameter(ToolParameter::required("city", "string", "City name"))
            .with_tags(["weather", "external"])
            .with_priority(5),
        handler_fn(|params| async move {
            let city = params.get("city").and_then(Value::as_str).unwrap_or("unknown").to_string();
            Ok(json!({"city": city, "forecast": "sunny", "temp_c": 22}))
        }),
    );

    registry.register(
        ToolSpec::new("calculator", "Adds two numbers")
            .with_parameter(ToolParameter::required("a", "number", "Left operand"))
            .with_parameter(ToolParameter::required("b", "number", "Right operand"))
            .with_tags(["math"])
            .with_priority(5),
        handler_fn(|params| async move {
            let a = params.get("a").and_then(Value::as_f64).unwrap_or_default();
            let b = params.get("b").and_then(Value::as_f64).unwrap_or_default();
            Ok(json!(a + b))
        }),
    );

    registry.register(
        ToolSpec::new("flaky", "Always times out").with_tags(["external"]),
        handler_fn(|_| async { Err(ToolError::failed("flaky", "ConnectionError: timeout")) }),
    );

    registry.register(
        ToolSpec::new("boom", "Always panics").with_priority(-1),
        handler_fn(|_| async { panic!("tool exploded") }),
    );

    registry
}

pub fn sample_filters() -> Arc<FilterManager> {
    Arc::new(FilterManager::new(Arc::new(sample_registry())))
}

/// Sets a flag when dropped; lets tests observe that an in-flight future was released.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Registry whose `stall` tool never completes and flags when its future is dropped.
pub fn stalling_filters(released: Arc<AtomicBool>) -> Arc<FilterManager> {
    let mut registry = sample_registry();
    registry.register(
        ToolSpec::new("stall", "Never finishes"),
        handler_fn(move |_| {
            let guard = DropFlag(released.clone());
            async move {
                let _guard = guard;
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
        }),
    );
    Arc::new(FilterManager::new(Arc::new(registry)))
}
