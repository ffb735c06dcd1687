//! Wire shapes for each transport.
//!
//! HTTP folds a finished run into one JSON envelope; SSE and WebSocket
//! forward each [`FlowEvent`] as it happens.

use axum::response::sse::Event as SseEvent;
use serde::Serialize;
use serde_json::Value;
use toolflow_core::event::FlowEvent;

/// Error code for a run that ended in FAILED.
pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
/// Error code for a malformed or unsupported request.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Error code for a transport refused by the protocol strategy.
pub const PROTOCOL_DENIED: &str = "PROTOCOL_DENIED";

/// `{status: "error", error: {code, message}}`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

/// `{status: "success", data}`
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

/// One tool call as reported in the aggregated HTTP response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallSummary {
    pub tool_name: String,
    pub tool_args: Value,
    pub tool_call_id: String,
    /// `started` until a matching result arrives, then `completed`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct AggregatedResponse {
    pub response: String,
    pub tool_calls: Vec<ToolCallSummary>,
    /// Seconds between the first and last event
    pub execution_time: f64,
}

/// Outcome of folding a run's events.
#[derive(Debug)]
pub enum Aggregate {
    Success(SuccessEnvelope<AggregatedResponse>),
    Error(ErrorEnvelope),
}

impl Aggregate {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl Serialize for Aggregate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(ok) => ok.serialize(serializer),
            Self::Error(err) => err.serialize(serializer),
        }
    }
}

/// Fold a run's events into the HTTP response body.
///
/// An `error` event anywhere wins. Events without a terminal (a cancelled
/// run) yield an empty successful response.
pub fn aggregate(events: &[FlowEvent]) -> Aggregate {
    let mut tool_calls: Vec<ToolCallSummary> = Vec::new();
    let mut response = String::new();

    for event in events {
        match event {
            FlowEvent::ToolCallStart {
                tool_name,
                tool_args,
                call_id,
                timestamp,
            } => tool_calls.push(ToolCallSummary {
                tool_name: tool_name.clone(),
                tool_args: tool_args.clone(),
                tool_call_id: call_id.clone(),
                status: "started",
                result: None,
                error: None,
                timestamp: *timestamp,
            }),
            FlowEvent::ToolCallResult {
                call_id,
                result,
                error,
                ..
            } => {
                if let Some(call) = tool_calls.iter_mut().find(|c| &c.tool_call_id == call_id) {
                    call.status = "completed";
                    call.result = result.clone();
                    call.error = error.clone();
                }
            }
            FlowEvent::Token { .. } => {}
            FlowEvent::Final { response_text, .. } => {
                response = response_text.clone();
                break;
            }
            FlowEvent::Error { message, .. } => {
                return Aggregate::Error(ErrorEnvelope::new(EXECUTION_ERROR, message.clone()));
            }
        }
    }

    let execution_time = match (events.first(), events.last()) {
        (Some(first), Some(last)) => last.timestamp() - first.timestamp(),
        _ => 0.0,
    };

    Aggregate::Success(SuccessEnvelope::new(AggregatedResponse {
        response,
        tool_calls,
        execution_time,
    }))
}

/// Serialize one event as a JSON text frame body.
pub fn event_json(event: &FlowEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({
            "type": "error",
            "error": format!("failed to serialize event: {e}"),
            "timestamp": event.timestamp(),
        })
        .to_string()
    })
}

/// One SSE message: `event:` is the variant tag, `data:` the event JSON.
pub fn sse_event(event: &FlowEvent) -> SseEvent {
    SseEvent::default()
        .event(event.event_type())
        .data(event_json(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolflow_core::event::{ActionRecord, EventClock};
    use toolflow_core::tool::{ToolInvocationRequest, ToolInvocationResult};

    fn sample_run() -> Vec<FlowEvent> {
        let clock = EventClock::new();
        let mut params = serde_json::Map::new();
        params.insert("city".into(), json!("Paris"));
        let request = ToolInvocationRequest::new("call_1", "weather", params);
        let result = ToolInvocationResult::succeeded(&request, json!({"forecast": "sunny"}));
        vec![
            FlowEvent::tool_call_start(&clock, &request),
            FlowEvent::tool_call_result(&clock, &result),
            FlowEvent::token(&clock, "Sunny.", false),
            FlowEvent::final_response(&clock, "Sunny.", vec![ActionRecord::from(&result)]),
        ]
    }

    #[test]
    fn aggregate_success() {
        let events = sample_run();
        let body = serde_json::to_value(aggregate(&events)).unwrap();

        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["response"], "Sunny.");
        let call = &body["data"]["tool_calls"][0];
        assert_eq!(call["tool_name"], "weather");
        assert_eq!(call["tool_call_id"], "call_1");
        assert_eq!(call["tool_args"]["city"], "Paris");
        assert_eq!(call["status"], "completed");
        assert_eq!(call["result"]["forecast"], "sunny");
        assert!(call.get("error").is_none());
        assert!(body["data"]["execution_time"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn aggregate_error() {
        let clock = EventClock::new();
        let events = vec![FlowEvent::error(&clock, "Model failure: boom", None)];
        let agg = aggregate(&events);
        assert!(!agg.is_success());

        let body = serde_json::to_value(agg).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "EXECUTION_ERROR");
        assert_eq!(body["error"]["message"], "Model failure: boom");
    }

    #[test]
    fn aggregate_empty() {
        let body = serde_json::to_value(aggregate(&[])).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["execution_time"], 0.0);
        assert_eq!(body["data"]["tool_calls"], json!([]));
    }

    #[test]
    fn event_json_uses_wire_names() {
        let clock = EventClock::new();
        let json: Value = serde_json::from_str(&event_json(&FlowEvent::token(&clock, "hi", true))).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["token"], "hi");
        assert_eq!(json["is_partial"], true);
    }
}
