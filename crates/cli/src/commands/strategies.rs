//! `toolflow strategies`: List filter strategies.

use std::path::Path;

pub fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let filters = super::filter_manager(&config)?;

    println!("Tool strategies:");
    for name in filters.list_strategy_names() {
        let kind = filters.get_strategy(&name).map(|s| s.kind()).unwrap_or("?");
        let marker = if config.orchestrator.filter_strategy.as_deref() == Some(name.as_str()) {
            "  (default)"
        } else {
            ""
        };
        println!("  {name:<16} {kind}{marker}");
    }

    println!("\nProtocol strategies:");
    for name in filters.list_protocol_strategy_names() {
        let marker = if config.gateway.protocol_strategy.as_deref() == Some(name.as_str()) {
            "  (active)"
        } else {
            ""
        };
        println!("  {name}{marker}");
    }

    Ok(())
}
