//! `toolflow init`: Write a default config file.

use std::path::Path;
use toolflow_config::AppConfig;

pub fn run(path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(path);

    if config_path.exists() && !force {
        println!("Config already exists: {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Wrote {}", config_path.display());
    println!("Set TOOLFLOW_API_KEY (or OPENAI_API_KEY), then try: toolflow ask \"What time is it?\"");

    Ok(())
}
