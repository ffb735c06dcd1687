pub mod ask;
pub mod init;
pub mod serve;
pub mod strategies;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolflow_config::AppConfig;
use toolflow_filters::FilterManager;

/// Load config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Built-in tools plus the configured strategies.
pub fn filter_manager(config: &AppConfig) -> Result<Arc<FilterManager>, Box<dyn std::error::Error>> {
    let registry = Arc::new(crate::builtin::builtin_registry());
    Ok(toolflow_gateway::build_filter_manager(registry, &config.filters)?)
}
