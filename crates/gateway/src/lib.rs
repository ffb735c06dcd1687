//! HTTP, SSE and WebSocket gateway for toolflow.
//!
//! Serves the agent API under a configurable prefix (default
//! `/api/agent/v1`) plus `GET /health` at the root. Every transport runs
//! the same [`FlowOrchestrator`]; the configured protocol strategy decides
//! which transports may serve a run.
//!
//! Built on Axum.

pub mod api;
pub mod protocol;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use toolflow_agent::FlowOrchestrator;
use toolflow_config::{AppConfig, FilterStrategyConfig, GatewayConfig};
use toolflow_core::error::ProviderError;
use toolflow_core::tool::ToolRegistry;
use toolflow_filters::{FilterError, FilterManager, ProtocolKind, StrategyParams};

/// Errors that stop the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Filter setup failed: {0}")]
    Filter(#[from] FilterError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state for the gateway.
#[derive(Debug)]
pub struct GatewayState {
    pub engine: FlowOrchestrator,
    /// Protocol strategy consulted before serving a transport
    pub protocol_strategy: Option<String>,
}

impl GatewayState {
    pub fn new(engine: FlowOrchestrator) -> Self {
        Self {
            engine,
            protocol_strategy: None,
        }
    }

    pub fn with_protocol_strategy(mut self, name: impl Into<String>) -> Self {
        self.protocol_strategy = Some(name.into());
        self
    }

    /// Whether `protocol` may serve a run.
    pub fn allows(&self, protocol: ProtocolKind) -> bool {
        self.engine
            .filters()
            .should_allow_protocol(protocol, self.protocol_strategy.as_deref())
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build a filter manager over `registry` with the configured `[[filters]]` registered in order.
pub fn build_filter_manager(
    registry: Arc<ToolRegistry>,
    filters: &[FilterStrategyConfig],
) -> Result<Arc<FilterManager>, FilterError> {
    let manager = FilterManager::new(registry);
    for filter in filters {
        let params = StrategyParams {
            max_tools: filter.max_tools,
            include_tags: filter.include_tags.clone(),
            exclude_tags: filter.exclude_tags.clone(),
            strategies: filter.strategies.clone(),
        };
        manager.register_from_params(&filter.name, &filter.kind, &params)?;
    }
    Ok(Arc::new(manager))
}

/// Build the full router: `/health` plus the agent API nested under `config.api_prefix`.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let api = api::api_router(state);
    let router = Router::new().route("/health", get(health_handler));
    let router = if config.api_prefix == "/" {
        router.merge(api)
    } else {
        router.nest(&config.api_prefix, api)
    };
    router
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

/// Start the gateway HTTP server with the given tools.
pub async fn start(config: AppConfig, registry: ToolRegistry) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = toolflow_providers::build_from_config(&config.model)?;
    let filters = build_filter_manager(Arc::new(registry), &config.filters)?;
    let engine = FlowOrchestrator::from_config(provider, filters, &config);

    let mut state = GatewayState::new(engine);
    state.protocol_strategy = config.gateway.protocol_strategy.clone();
    let app = build_router(Arc::new(state), &config.gateway);

    info!(addr = %addr, prefix = %config.gateway.api_prefix, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    use toolflow_core::message::Message;
    use toolflow_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use toolflow_core::tool::{ToolInvocationRequest, ToolSpec, handler_fn};

    /// Lightweight mock provider for gateway tests: plays back turns, then fails.
    struct MockProvider {
        turns: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    }

    impl MockProvider {
        fn new(turns: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("no more turns".into())))
        }
    }

    fn reply(message: Message) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message,
            usage: None,
            model: "mock-model".into(),
        })
    }

    fn weather_then_answer() -> Vec<Result<ProviderResponse, ProviderError>> {
        let mut params = serde_json::Map::new();
        params.insert("city".into(), json!("Paris"));
        vec![
            reply(Message::assistant("").with_tool_calls(vec![ToolInvocationRequest::new(
                "call_1", "weather", params,
            )])),
            reply(Message::assistant("It is sunny in Paris.")),
        ]
    }

    fn test_state(turns: Vec<Result<ProviderResponse, ProviderError>>) -> GatewayState {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("weather", "Weather for a city").with_tags(["weather"]),
            handler_fn(|params| async move {
                Ok(json!({"city": params.get("city").cloned(), "forecast": "sunny"}))
            }),
        );
        let filters = build_filter_manager(Arc::new(registry), &[]).unwrap();
        let engine = FlowOrchestrator::new(Arc::new(MockProvider::new(turns)), filters, "mock-model");
        GatewayState::new(engine)
    }

    fn app(state: GatewayState) -> Router {
        build_router(Arc::new(state), &GatewayConfig::default())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(test_state(vec![])).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn respond_http_aggregates_run() {
        let response = app(test_state(weather_then_answer()))
            .oneshot(post_json("/api/agent/v1/respond", json!({"query": "Weather in Paris?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["response"], "It is sunny in Paris.");
        assert_eq!(body["data"]["tool_calls"][0]["tool_name"], "weather");
        assert_eq!(body["data"]["tool_calls"][0]["result"]["forecast"], "sunny");
    }

    #[tokio::test]
    async fn respond_http_reports_model_failure() {
        let turns = vec![Err(ProviderError::Network("connection refused".into()))];
        let response = app(test_state(turns))
            .oneshot(post_json("/api/agent/v1/respond", json!({"query": "hi"})))
            .await
            .unwrap();

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "EXECUTION_ERROR");
        assert!(body["error"]["message"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn respond_sse_streams_events() {
        let response = app(test_state(weather_then_answer()))
            .oneshot(post_json(
                "/api/agent/v1/respond",
                json!({"query": "Weather in Paris?", "protocol_type": "sse"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let text = body_text(response).await;
        let names: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(names, vec!["tool_call_start", "tool_call_result", "token", "final"]);
        assert!(text.contains("It is sunny in Paris."));
    }

    #[tokio::test]
    async fn denied_protocol_is_forbidden() {
        let state = test_state(weather_then_answer()).with_protocol_strategy("http_only");
        let response = app(state)
            .oneshot(post_json(
                "/api/agent/v1/respond",
                json!({"query": "hi", "protocol_type": "sse"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "PROTOCOL_DENIED");
    }

    #[tokio::test]
    async fn unknown_protocol_strategy_allows() {
        let state = test_state(weather_then_answer()).with_protocol_strategy("nonexistent");
        let response = app(state)
            .oneshot(post_json("/api/agent/v1/respond", json!({"query": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn respond_rejects_empty_query_and_websocket() {
        let response = app(test_state(vec![]))
            .oneshot(post_json("/api/agent/v1/respond", json!({"query": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(test_state(vec![]))
            .oneshot(post_json(
                "/api/agent/v1/respond",
                json!({"query": "hi", "protocol_type": "websocket"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_strategies() {
        let req = Request::builder()
            .uri("/api/agent/v1/strategies")
            .body(Body::empty())
            .unwrap();
        let response = app(test_state(vec![])).oneshot(req).await.unwrap();
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();

        assert_eq!(body["status"], "success");
        let tools: Vec<String> = serde_json::from_value(body["data"]["tool_strategies"].clone()).unwrap();
        assert!(tools.contains(&"threshold_5".to_string()));
        let protocols: Vec<String> =
            serde_json::from_value(body["data"]["protocol_strategies"].clone()).unwrap();
        assert!(protocols.contains(&"http_only".to_string()));
    }

    #[tokio::test]
    async fn list_tools() {
        let req = Request::builder()
            .uri("/api/agent/v1/tools")
            .body(Body::empty())
            .unwrap();
        let response = app(test_state(vec![])).oneshot(req).await.unwrap();
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["data"]["count"], 1);
        assert_eq!(body["data"]["tools"][0]["name"], "weather");
    }

    #[test]
    fn configured_filters_are_registered() {
        let filters = vec![
            FilterStrategyConfig {
                name: "weather_only".into(),
                kind: "tag".into(),
                max_tools: None,
                include_tags: vec!["weather".into()],
                exclude_tags: vec![],
                strategies: vec![],
            },
            FilterStrategyConfig {
                name: "weather_top".into(),
                kind: "composite".into(),
                max_tools: None,
                include_tags: vec![],
                exclude_tags: vec![],
                strategies: vec!["weather_only".into(), "priority".into()],
            },
        ];
        let manager = build_filter_manager(Arc::new(ToolRegistry::new()), &filters).unwrap();
        assert!(manager.get_strategy("weather_only").is_some());
        assert_eq!(manager.get_strategy("weather_top").unwrap().kind(), "composite");

        let bad = vec![FilterStrategyConfig {
            name: "x".into(),
            kind: "fancy".into(),
            max_tools: None,
            include_tags: vec![],
            exclude_tags: vec![],
            strategies: vec![],
        }];
        assert_eq!(
            build_filter_manager(Arc::new(ToolRegistry::new()), &bad).unwrap_err(),
            FilterError::UnknownKind("fancy".into())
        );
    }
}
