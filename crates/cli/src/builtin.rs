//! Tools registered by the binary so a fresh install has something to call.

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use toolflow_core::error::ToolError;
use toolflow_core::tool::{ToolParameter, ToolRegistry, ToolSpec, handler_fn};

pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec::new("current_time", "Get the current UTC date and time")
            .with_parameter(
                ToolParameter::optional("format", "string", "Output format")
                    .with_enum([json!("rfc3339"), json!("unix")])
                    .with_default(json!("rfc3339")),
            )
            .with_tags(["time", "utility"])
            .with_priority(1),
        handler_fn(|params| async move {
            let now = Utc::now();
            match params.get("format").and_then(Value::as_str).unwrap_or("rfc3339") {
                "rfc3339" => Ok(json!(now.to_rfc3339_opts(SecondsFormat::Secs, true))),
                "unix" => Ok(json!(now.timestamp())),
                other => Err(ToolError::InvalidArguments(format!(
                    "unknown format '{other}', expected rfc3339 or unix"
                ))),
            }
        }),
    );

    registry.register(
        ToolSpec::new("echo", "Repeat the given text back")
            .with_parameter(ToolParameter::required("text", "string", "Text to echo"))
            .with_tags(["utility", "debug"]),
        handler_fn(|params| async move {
            params
                .get("text")
                .and_then(Value::as_str)
                .map(|text| json!(text))
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }),
    );

    registry
}
