//! `toolflow ask`: Run one query and print its events.

use futures::StreamExt;
use std::path::Path;
use toolflow_agent::{FlowOrchestrator, RunInput};
use toolflow_core::event::FlowEvent;
use tracing::debug;

pub struct AskOptions {
    pub strategy: Option<String>,
    pub tags: Vec<String>,
    pub system: Option<String>,
    pub json: bool,
}

pub async fn run(
    path: Option<&Path>,
    query: String,
    options: AskOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;

    let provider = match toolflow_providers::build_from_config(&config.model) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set TOOLFLOW_API_KEY or OPENAI_API_KEY, or add api_key under [model] in:");
            eprintln!("    {}", super::config_path(path).display());
            eprintln!();
            return Err(e.into());
        }
    };
    let filters = super::filter_manager(&config)?;
    let engine = FlowOrchestrator::from_config(provider, filters, &config);

    let mut input = RunInput::new(query).with_tool_tags(options.tags);
    input.filter_strategy = options.strategy;
    input.system_message = options.system;

    let mut events = engine.run_streaming(input);
    debug!(conversation_id = %events.conversation_id(), json = options.json, "ask started");
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                failed |= matches!(event, FlowEvent::Error { .. });
                if options.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                events.cancel();
                eprintln!("\n  Cancelled.");
                break;
            }
        }
    }

    if failed {
        return Err("run failed".into());
    }
    Ok(())
}

fn print_event(event: &FlowEvent) {
    match event {
        FlowEvent::ToolCallStart {
            tool_name,
            tool_args,
            ..
        } => println!("  -> {tool_name}({tool_args})"),
        FlowEvent::ToolCallResult {
            tool_name,
            result,
            error,
            ..
        } => match (result, error) {
            (_, Some(error)) => println!("  <- {tool_name} failed: {error}"),
            (Some(result), None) => println!("  <- {tool_name}: {result}"),
            (None, None) => println!("  <- {tool_name}"),
        },
        FlowEvent::Token {
            text,
            is_partial: true,
            ..
        } => {
            use std::io::Write;
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        FlowEvent::Token { text, .. } => println!("\n{text}"),
        FlowEvent::Final { actions, .. } => {
            println!();
            if !actions.is_empty() {
                println!("  ({} tool call(s))", actions.len());
            }
        }
        FlowEvent::Error { message, .. } => eprintln!("\n  ERROR: {message}"),
    }
}
