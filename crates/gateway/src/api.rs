//! Agent API routes.
//!
//! Endpoints (relative to the configured prefix):
//!
//! - `POST /respond`    : Run a query; `protocol_type` picks HTTP (aggregated JSON) or SSE
//! - `GET  /ws`         : WebSocket; one run per client message, cancellable
//! - `GET  /strategies` : Registered tool and protocol strategy names
//! - `GET  /tools`      : Registered tool specs

use axum::{
    Router,
    extract::State,
    extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code},
    http::StatusCode,
    response::sse::{KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use toolflow_agent::RunInput;
use toolflow_core::message::ConversationId;
use toolflow_core::tool::ToolSpec;
use toolflow_filters::ProtocolKind;
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::protocol::{
    self, ErrorEnvelope, INVALID_REQUEST, PROTOCOL_DENIED, SuccessEnvelope, aggregate,
};

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/respond", post(respond_handler))
        .route("/ws", get(ws_handler))
        .route("/strategies", get(strategies_handler))
        .route("/tools", get(tools_handler))
        .with_state(state)
}

// ── Request types ─────────────────────────────────────────────────────────

/// Body of `POST /respond`.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol_type: ProtocolKind,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub filter_strategy: Option<String>,
    #[serde(default)]
    pub tool_tags: Vec<String>,
}

fn default_protocol() -> ProtocolKind {
    ProtocolKind::Http
}

/// A run request arriving over the WebSocket.
#[derive(Debug, Deserialize)]
pub struct WsRunRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub filter_strategy: Option<String>,
    #[serde(default)]
    pub tool_tags: Vec<String>,
}

fn run_input(
    query: String,
    conversation_id: Option<String>,
    system_message: Option<String>,
    filter_strategy: Option<String>,
    tool_tags: Vec<String>,
) -> RunInput {
    RunInput {
        user_input: query,
        conversation_id: conversation_id.map(ConversationId::from),
        system_message,
        filter_strategy,
        tool_tags,
    }
}

impl RespondRequest {
    fn into_input(self) -> RunInput {
        run_input(
            self.query,
            self.conversation_id,
            self.system_message,
            self.filter_strategy,
            self.tool_tags,
        )
    }
}

impl WsRunRequest {
    fn into_input(self) -> RunInput {
        run_input(
            self.query,
            self.conversation_id,
            self.system_message,
            self.filter_strategy,
            self.tool_tags,
        )
    }
}

fn reject(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (status, Json(ErrorEnvelope::new(code, message))).into_response()
}

// ── POST /respond ─────────────────────────────────────────────────────────

async fn respond_handler(
    State(state): State<SharedState>,
    Json(payload): Json<RespondRequest>,
) -> Response {
    let kind = payload.protocol_type;
    info!(protocol = %kind, query_len = payload.query.len(), "respond request");

    if payload.query.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, INVALID_REQUEST, "Missing 'query' parameter");
    }
    if !state.allows(kind) {
        warn!(protocol = %kind, "Protocol denied by strategy");
        return reject(
            StatusCode::FORBIDDEN,
            PROTOCOL_DENIED,
            format!("Protocol '{kind}' is not allowed"),
        );
    }

    match kind {
        ProtocolKind::Http => {
            let outcome = state.engine.run_buffered(payload.into_input()).await;
            Json(aggregate(&outcome.events)).into_response()
        }
        ProtocolKind::Sse => {
            // Dropping the body on disconnect drops the EventStream, which cancels the run.
            let events = state
                .engine
                .run_streaming(payload.into_input())
                .map(|event| Ok::<_, Infallible>(protocol::sse_event(&event)));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        ProtocolKind::WebSocket => reject(
            StatusCode::BAD_REQUEST,
            INVALID_REQUEST,
            "Use GET /ws for the websocket protocol",
        ),
    }
}

// ── GET /ws ───────────────────────────────────────────────────────────────

/// What a client text frame asks for.
#[derive(Debug)]
pub enum ClientFrame {
    Run(WsRunRequest),
    Cancel,
}

/// Parse a client text frame. `Err` carries the message for an `INVALID_REQUEST` reply.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {e}"))?;

    if value.get("type").and_then(|t| t.as_str()) == Some("cancel") {
        return Ok(ClientFrame::Cancel);
    }

    let request: WsRunRequest = match value.get("query") {
        Some(q) if q.as_str().is_some_and(|s| !s.trim().is_empty()) => {
            serde_json::from_value(value).map_err(|e| format!("Invalid request: {e}"))?
        }
        _ => return Err("Missing 'query' parameter".into()),
    };
    Ok(ClientFrame::Run(request))
}

fn error_frame(message: impl Into<String>) -> WsMessage {
    let body = serde_json::to_string(&ErrorEnvelope::new(INVALID_REQUEST, message))
        .unwrap_or_default();
    WsMessage::Text(body.into())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    if !state.allows(ProtocolKind::WebSocket) {
        warn!("WebSocket denied by protocol strategy");
        let frame = CloseFrame {
            code: close_code::POLICY,
            reason: "WebSocket protocol not available".into(),
        };
        let _ = sender.send(WsMessage::Close(Some(frame))).await;
        return;
    }

    info!("WebSocket connection established");

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request = match parse_client_frame(text.as_str()) {
            Ok(ClientFrame::Run(request)) => request,
            Ok(ClientFrame::Cancel) => {
                debug!("Cancel received with no run in flight");
                continue;
            }
            Err(message) => {
                if sender.send(error_frame(message)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let mut events = state.engine.run_streaming(request.into_input());
        let conversation_id = events.conversation_id().clone();
        debug!(conversation_id = %conversation_id, "WebSocket run started");

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    let frame = WsMessage::Text(protocol::event_json(&event).into());
                    if sender.send(frame).await.is_err() {
                        // Client gone; dropping `events` cancels the run.
                        info!("WebSocket connection closed mid-run");
                        return;
                    }
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => match parse_client_frame(text.as_str()) {
                        Ok(ClientFrame::Cancel) => {
                            info!(conversation_id = %conversation_id, "Run cancelled by client");
                            events.cancel();
                            break;
                        }
                        Ok(ClientFrame::Run(_)) => {
                            if sender.send(error_frame("A run is already in progress")).await.is_err() {
                                return;
                            }
                        }
                        Err(message) => {
                            if sender.send(error_frame(message)).await.is_err() {
                                return;
                            }
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                        info!(conversation_id = %conversation_id, "WebSocket closed mid-run");
                        events.cancel();
                        return;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── GET /strategies, GET /tools ───────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StrategyList {
    pub tool_strategies: Vec<String>,
    pub protocol_strategies: Vec<String>,
}

async fn strategies_handler(State(state): State<SharedState>) -> Json<SuccessEnvelope<StrategyList>> {
    let filters = state.engine.filters();
    Json(SuccessEnvelope::new(StrategyList {
        tool_strategies: filters.list_strategy_names(),
        protocol_strategies: filters.list_protocol_strategy_names(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ToolList {
    pub tools: Vec<ToolSpec>,
    pub count: usize,
}

async fn tools_handler(State(state): State<SharedState>) -> Json<SuccessEnvelope<ToolList>> {
    let tools: Vec<ToolSpec> = state
        .engine
        .registry()
        .list()
        .iter()
        .map(|spec| spec.as_ref().clone())
        .collect();
    let count = tools.len();
    Json(SuccessEnvelope::new(ToolList { tools, count }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_frame() {
        let frame = parse_client_frame(
            r#"{"query": "weather?", "filter_strategy": "priority", "tool_tags": ["weather"]}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Run(req) => {
                assert_eq!(req.query, "weather?");
                assert_eq!(req.filter_strategy.as_deref(), Some("priority"));
                assert_eq!(req.tool_tags, vec!["weather"]);
                let input = req.into_input();
                assert_eq!(input.user_input, "weather?");
                assert!(input.conversation_id.is_none());
            }
            ClientFrame::Cancel => panic!("expected run"),
        }
    }

    #[test]
    fn parse_cancel_frame() {
        assert!(matches!(
            parse_client_frame(r#"{"type": "cancel"}"#),
            Ok(ClientFrame::Cancel)
        ));
    }

    #[test]
    fn parse_rejects_missing_query() {
        let err = parse_client_frame(r#"{"system_message": "hi"}"#).unwrap_err();
        assert!(err.contains("query"));
        assert!(parse_client_frame(r#"{"query": "   "}"#).is_err());
        assert!(parse_client_frame("not json").unwrap_err().starts_with("Invalid JSON"));
    }

    #[test]
    fn respond_request_defaults_to_http() {
        let req: RespondRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert_eq!(req.protocol_type, ProtocolKind::Http);
        let req: RespondRequest =
            serde_json::from_str(r#"{"query": "hi", "protocol_type": "sse", "conversation_id": "c1"}"#)
                .unwrap();
        assert_eq!(req.protocol_type, ProtocolKind::Sse);
        assert_eq!(req.into_input().conversation_id.unwrap().0, "c1");
    }

    #[test]
    fn error_frame_shape() {
        let WsMessage::Text(text) = error_frame("bad") else {
            panic!("expected text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["code"], "INVALID_REQUEST");
        assert_eq!(json["error"]["message"], "bad");
    }
}
