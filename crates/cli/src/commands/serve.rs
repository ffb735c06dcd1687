//! `toolflow serve`: Start the gateway.

use std::path::Path;

pub async fn run(
    path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("toolflow gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   API:       {}", config.gateway.api_prefix);
    println!("   Model:     {}", config.model.model);
    if let Some(strategy) = &config.gateway.protocol_strategy {
        println!("   Protocols: {strategy}");
    }

    toolflow_gateway::start(config, crate::builtin::builtin_registry()).await?;

    Ok(())
}
