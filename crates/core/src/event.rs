//! The event stream a run produces.
//!
//! Every run emits a sequence of [`FlowEvent`]s ending in exactly one
//! terminal event (`final` or `error`) unless it is cancelled. Transport
//! adapters serialize these directly, so the serde tags and field names are a
//! wire contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::tool::{ToolInvocationRequest, ToolInvocationResult};

/// Per-run timestamp source.
///
/// Anchored to wall-clock seconds at creation, advanced by a monotonic
/// `Instant`, so timestamps never go backwards within one run.
#[derive(Debug, Clone, Copy)]
pub struct EventClock {
    origin_secs: f64,
    started: Instant,
}

impl EventClock {
    pub fn new() -> Self {
        let origin_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            origin_secs,
            started: Instant::now(),
        }
    }

    /// Seconds since the Unix epoch, non-decreasing for this clock.
    pub fn now(&self) -> f64 {
        self.origin_secs + self.started.elapsed().as_secs_f64()
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One tool result as reported in the `final` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tool_name: String,

    #[serde(rename = "tool_call_id")]
    pub call_id: String,

    pub success: bool,

    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ToolInvocationResult> for ActionRecord {
    fn from(result: &ToolInvocationResult) -> Self {
        Self {
            tool_name: result.tool_name.clone(),
            call_id: result.call_id.clone(),
            success: result.success,
            result: result.output.clone(),
            error: result.error.clone(),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A tool call is about to run.
    ToolCallStart {
        tool_name: String,
        tool_args: Value,
        #[serde(rename = "tool_call_id")]
        call_id: String,
        timestamp: f64,
    },

    /// A tool call finished, successfully or not.
    ToolCallResult {
        tool_name: String,
        #[serde(rename = "tool_call_id")]
        call_id: String,
        result: Option<Value>,
        error: Option<String>,
        timestamp: f64,
    },

    /// Model text. Partial while streaming, whole otherwise.
    Token {
        #[serde(rename = "token")]
        text: String,
        is_partial: bool,
        timestamp: f64,
    },

    /// Terminal: the run reached DONE.
    Final {
        #[serde(rename = "response")]
        response_text: String,
        actions: Vec<ActionRecord>,
        timestamp: f64,
    },

    /// Terminal: the run reached FAILED.
    Error {
        #[serde(rename = "error")]
        message: String,
        #[serde(rename = "stack_trace")]
        trace: Option<String>,
        timestamp: f64,
    },
}

impl FlowEvent {
    pub fn tool_call_start(clock: &EventClock, request: &ToolInvocationRequest) -> Self {
        Self::ToolCallStart {
            tool_name: request.tool_name.clone(),
            tool_args: Value::Object(request.parameters.clone()),
            call_id: request.call_id.clone(),
            timestamp: clock.now(),
        }
    }

    pub fn tool_call_result(clock: &EventClock, result: &ToolInvocationResult) -> Self {
        Self::ToolCallResult {
            tool_name: result.tool_name.clone(),
            call_id: result.call_id.clone(),
            result: result.output.clone(),
            error: result.error.clone(),
            timestamp: clock.now(),
        }
    }

    pub fn token(clock: &EventClock, text: impl Into<String>, is_partial: bool) -> Self {
        Self::Token {
            text: text.into(),
            is_partial,
            timestamp: clock.now(),
        }
    }

    pub fn final_response(
        clock: &EventClock,
        response_text: impl Into<String>,
        actions: Vec<ActionRecord>,
    ) -> Self {
        Self::Final {
            response_text: response_text.into(),
            actions,
            timestamp: clock.now(),
        }
    }

    pub fn error(clock: &EventClock, message: impl Into<String>, trace: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            trace,
            timestamp: clock.now(),
        }
    }

    /// Wire name of this variant (the serde `type` tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::Token { .. } => "token",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    /// `final` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Self::ToolCallStart { timestamp, .. }
            | Self::ToolCallResult { timestamp, .. }
            | Self::Token { timestamp, .. }
            | Self::Final { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }
}
