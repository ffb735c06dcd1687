//! The flow orchestration engine.
//!
//! A run alternates between two states until the model stops asking for
//! tools:
//!
//! - **DECIDE**: send the conversation and the visible tools to the model.
//!   Zero tool calls means DONE; otherwise move to ACT.
//! - **ACT**: execute each requested call in order, report it as a
//!   `tool_call_start` / `tool_call_result` pair, append a `tool` message,
//!   and go back to DECIDE.
//!
//! Tool failures become conversation content. Only a model failure (or
//! hitting the step ceiling) ends a run in FAILED. Cancellation ends it
//! silently.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolflow_config::AppConfig;
use toolflow_core::error::ProviderError;
use toolflow_core::event::{ActionRecord, EventClock, FlowEvent};
use toolflow_core::message::{ConversationId, ConversationState, Message};
use toolflow_core::provider::{Provider, ProviderRequest, ToolDefinition};
use toolflow_core::tool::{ToolInvocationRequest, ToolInvocationResult, ToolRegistry};
use toolflow_filters::FilterManager;
use tracing::{debug, error, info, warn};

use crate::stream::EventStream;

/// Events buffered between a streaming run and its consumer.
const STREAM_BUFFER: usize = 32;

/// Default ceiling on DECIDE turns per run.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Why a run did not reach DONE.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Model failure: {0}")]
    Model(#[from] ProviderError),

    #[error("Step limit of {max_steps} reached without a final answer")]
    StepLimitExceeded { max_steps: usize },

    #[error("Run panicked: {0}")]
    Panicked(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Diagnostic detail for the `error` event.
    fn trace(&self) -> Option<String> {
        match self {
            Self::Model(inner) => Some(format!("{inner:?}")),
            Self::StepLimitExceeded { .. } | Self::Panicked(_) | Self::Cancelled => None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Reached DONE; the last event is `final`.
    Completed,
    /// Reached FAILED; the last event is `error`.
    Failed,
    /// Stopped by the consumer; no terminal event.
    Cancelled,
}

/// Input for one run. Unset fields fall back to the engine's defaults.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub user_input: String,
    pub conversation_id: Option<ConversationId>,
    pub system_message: Option<String>,
    pub filter_strategy: Option<String>,
    pub tool_tags: Vec<String>,
}

impl RunInput {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Self::default()
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_filter_strategy(mut self, name: impl Into<String>) -> Self {
        self.filter_strategy = Some(name.into());
        self
    }

    pub fn with_tool_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of [`FlowOrchestrator::run_buffered`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ConversationState,
    pub events: Vec<FlowEvent>,
    pub status: RunStatus,
}

impl RunOutcome {
    /// The terminal event, if the run produced one.
    pub fn terminal(&self) -> Option<&FlowEvent> {
        self.events.last().filter(|e| e.is_terminal())
    }

    /// Final answer text of a completed run.
    pub fn response_text(&self) -> Option<&str> {
        match self.terminal() {
            Some(FlowEvent::Final { response_text, .. }) => Some(response_text),
            _ => None,
        }
    }

    /// Error message of a failed run.
    pub fn error_message(&self) -> Option<&str> {
        match self.terminal() {
            Some(FlowEvent::Error { message, .. }) => Some(message),
            _ => None,
        }
    }
}

/// Where a run's events go.
enum Sink {
    Buffer(Vec<FlowEvent>),
    Channel(mpsc::Sender<FlowEvent>),
}

impl Sink {
    /// `false` once the consumer is gone.
    async fn send(&mut self, event: FlowEvent) -> bool {
        match self {
            Self::Buffer(events) => {
                events.push(event);
                true
            }
            Self::Channel(tx) => tx.send(event).await.is_ok(),
        }
    }

    fn into_events(self) -> Vec<FlowEvent> {
        match self {
            Self::Buffer(events) => events,
            Self::Channel(_) => Vec::new(),
        }
    }
}

/// Per-run mutable context shared by DECIDE and ACT.
struct RunContext<'a> {
    clock: EventClock,
    sink: &'a mut Sink,
    cancel: CancellationToken,
    actions: Vec<ActionRecord>,
}

impl RunContext<'_> {
    async fn emit(&mut self, event: FlowEvent) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        if self.sink.send(event).await {
            Ok(())
        } else {
            Err(RunError::Cancelled)
        }
    }
}

/// The orchestration engine.
///
/// Cheap to clone; every run works on its own [`ConversationState`] and
/// shares only the read-mostly registry and filter manager.
#[derive(Clone)]
pub struct FlowOrchestrator {
    provider: Arc<dyn Provider>,
    filters: Arc<FilterManager>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_steps: usize,
    system_message: Option<String>,
    filter_strategy: Option<String>,
    tool_tags: Vec<String>,
    stream_tokens: bool,
}

impl std::fmt::Debug for FlowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOrchestrator")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_steps", &self.max_steps)
            .field("filter_strategy", &self.filter_strategy)
            .field("stream_tokens", &self.stream_tokens)
            .finish()
    }
}

impl FlowOrchestrator {
    /// Create an engine. The filter manager supplies the tool registry.
    pub fn new(
        provider: Arc<dyn Provider>,
        filters: Arc<FilterManager>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            filters,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
            system_message: None,
            filter_strategy: None,
            tool_tags: Vec::new(),
            stream_tokens: false,
        }
    }

    /// Create an engine with model and orchestrator settings taken from `config`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        filters: Arc<FilterManager>,
        config: &AppConfig,
    ) -> Self {
        let orchestrator = &config.orchestrator;
        let mut engine = Self::new(provider, filters, &config.model.model)
            .with_temperature(config.model.temperature)
            .with_max_tokens(config.model.max_tokens)
            .with_max_steps(orchestrator.max_steps)
            .with_tool_tags(orchestrator.tool_tags.iter().cloned())
            .with_stream_tokens(orchestrator.stream_tokens);
        engine.system_message = orchestrator.system_message.clone();
        engine.filter_strategy = orchestrator.filter_strategy.clone();
        engine
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the DECIDE-turn ceiling. Zero is treated as one.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    /// Default system message for runs that don't supply one.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Default filter strategy for runs that don't name one.
    pub fn with_filter_strategy(mut self, name: impl Into<String>) -> Self {
        self.filter_strategy = Some(name.into());
        self
    }

    /// Default tag pre-filter for runs that don't supply tags.
    pub fn with_tool_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Request token deltas from the model and emit partial `token` events.
    pub fn with_stream_tokens(mut self, enabled: bool) -> Self {
        self.stream_tokens = enabled;
        self
    }

    pub fn filters(&self) -> &Arc<FilterManager> {
        &self.filters
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.filters.registry()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run to completion and return the final state with every event.
    pub async fn run_buffered(&self, input: RunInput) -> RunOutcome {
        let mut sink = Sink::Buffer(Vec::new());
        let (state, status) = self.execute(input, &mut sink, CancellationToken::new()).await;
        RunOutcome {
            state,
            events: sink.into_events(),
            status,
        }
    }

    /// Start a run in the background and return its event stream.
    ///
    /// Must be called inside a tokio runtime. Dropping the stream cancels
    /// the run.
    pub fn run_streaming(&self, input: RunInput) -> EventStream {
        self.run_streaming_with_cancel(input, &CancellationToken::new())
    }

    /// Like [`run_streaming`](Self::run_streaming), also cancelled when
    /// `parent` is.
    pub fn run_streaming_with_cancel(
        &self,
        mut input: RunInput,
        parent: &CancellationToken,
    ) -> EventStream {
        let token = parent.child_token();
        let conversation_id = input.conversation_id.get_or_insert_with(ConversationId::new).clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let engine = self.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            let mut sink = Sink::Channel(tx);
            engine.execute(input, &mut sink, task_token).await;
        });

        EventStream::new(rx, token, conversation_id)
    }

    /// START: seed state, resolve tools, drive the loop, emit the terminal event.
    async fn execute(
        &self,
        input: RunInput,
        sink: &mut Sink,
        cancel: CancellationToken,
    ) -> (ConversationState, RunStatus) {
        let RunInput {
            user_input,
            conversation_id,
            system_message,
            filter_strategy,
            tool_tags,
        } = input;

        let system_message = system_message.or_else(|| self.system_message.clone());
        let mut state = ConversationState::seed(user_input, conversation_id, system_message);

        let strategy = filter_strategy.or_else(|| self.filter_strategy.clone());
        let tags = if tool_tags.is_empty() { &self.tool_tags } else { &tool_tags };
        let definitions: Vec<ToolDefinition> = self
            .filters
            .resolve(strategy.as_deref(), tags)
            .iter()
            .map(|spec| spec.to_definition())
            .collect();

        info!(
            conversation_id = %state.id,
            provider = self.provider.name(),
            tools = definitions.len(),
            strategy = strategy.as_deref().unwrap_or("default"),
            "Starting run"
        );

        let mut ctx = RunContext {
            clock: EventClock::new(),
            sink,
            cancel,
            actions: Vec::new(),
        };

        let outcome = AssertUnwindSafe(self.drive(&mut state, &definitions, &mut ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RunError::Panicked(panic_message(panic.as_ref()))));

        let status = match outcome {
            Ok(()) => {
                info!(conversation_id = %state.id, actions = ctx.actions.len(), "Run completed");
                RunStatus::Completed
            }
            Err(RunError::Cancelled) => {
                info!(conversation_id = %state.id, "Run cancelled");
                RunStatus::Cancelled
            }
            Err(e) => {
                error!(conversation_id = %state.id, error = %e, "Run failed");
                let event = FlowEvent::error(&ctx.clock, e.to_string(), e.trace());
                if !ctx.sink.send(event).await {
                    debug!(conversation_id = %state.id, "Consumer gone before error event");
                }
                RunStatus::Failed
            }
        };

        (state, status)
    }

    /// The DECIDE/ACT loop. Returns once `final` has been emitted.
    async fn drive(
        &self,
        state: &mut ConversationState,
        definitions: &[ToolDefinition],
        ctx: &mut RunContext<'_>,
    ) -> Result<(), RunError> {
        let cancel = ctx.cancel.clone();
        let mut step = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            step += 1;
            if step > self.max_steps {
                warn!(conversation_id = %state.id, max_steps = self.max_steps, "Step limit reached");
                return Err(RunError::StepLimitExceeded {
                    max_steps: self.max_steps,
                });
            }

            // --- DECIDE ---
            debug!(conversation_id = %state.id, step, "DECIDE");
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: state.messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.to_vec(),
                stream: self.stream_tokens,
            };

            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                reply = self.decide(request, ctx) => reply?,
            };

            if !message.has_tool_calls() {
                let text = message.content.clone();
                state.push(message);
                if !self.stream_tokens {
                    ctx.emit(FlowEvent::token(&ctx.clock, text.clone(), false)).await?;
                }
                let actions = ctx.actions.clone();
                ctx.emit(FlowEvent::final_response(&ctx.clock, text, actions)).await?;
                return Ok(());
            }

            let calls = message.tool_calls.clone();
            state.push(message);

            // --- ACT ---
            debug!(conversation_id = %state.id, step, calls = calls.len(), "ACT");
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                ctx.emit(FlowEvent::tool_call_start(&ctx.clock, call)).await?;

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RunError::Cancelled),
                    result = self.act(call) => result,
                };

                ctx.emit(FlowEvent::tool_call_result(&ctx.clock, &result)).await?;
                ctx.actions.push(ActionRecord::from(&result));
                state.push(Message::tool_result(&result.call_id, result.content()));
            }
        }
    }

    /// One model turn. In token-streaming mode, deltas are emitted as they arrive.
    async fn decide(
        &self,
        request: ProviderRequest,
        ctx: &mut RunContext<'_>,
    ) -> Result<Message, RunError> {
        let mut message = if self.stream_tokens {
            let mut rx = self.provider.stream(request).await?;
            let mut text = String::new();
            let mut tool_calls = Vec::new();

            loop {
                let Some(chunk) = rx.recv().await else {
                    return Err(RunError::Model(ProviderError::StreamInterrupted(
                        "stream ended without a final chunk".into(),
                    )));
                };
                let chunk = chunk?;
                if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                    text.push_str(&delta);
                    ctx.emit(FlowEvent::token(&ctx.clock, delta, true)).await?;
                }
                tool_calls.extend(chunk.tool_calls);
                if chunk.done {
                    break;
                }
            }
            Message::assistant(text).with_tool_calls(tool_calls)
        } else {
            self.provider.complete(request).await?.message
        };

        // Some backends omit call ids; every call needs one for correlation.
        for call in &mut message.tool_calls {
            if call.call_id.is_empty() {
                call.call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
        }
        Ok(message)
    }

    /// One tool call. Never fails: unknown tools become failed results.
    async fn act(&self, call: &ToolInvocationRequest) -> ToolInvocationResult {
        match self.registry().invoke(call).await {
            Ok(result) => {
                if !result.success {
                    warn!(
                        tool = %call.tool_name,
                        call_id = %call.call_id,
                        error = result.error.as_deref().unwrap_or_default(),
                        "Tool call failed"
                    );
                }
                result
            }
            Err(e) => {
                warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "Tool call rejected");
                ToolInvocationResult::failed(call, e.to_string())
            }
        }
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
