//! Model clients for toolflow.
//!
//! All providers implement the `toolflow_core::Provider` trait.
//! [`build_from_config`] constructs the one selected by configuration.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use toolflow_config::ModelConfig;
use toolflow_core::{Provider, ProviderError};

/// Build the configured provider.
///
/// A missing API key is only accepted for local endpoints.
pub fn build_from_config(config: &ModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let is_local = config.api_url.contains("localhost") || config.api_url.contains("127.0.0.1");
    if config.api_key.is_none() && !is_local {
        return Err(ProviderError::NotConfigured(
            "no API key; set TOOLFLOW_API_KEY or model.api_key".into(),
        ));
    }

    let provider =
        OpenAiCompatProvider::new("openai_compat", &config.api_url, config.api_key.clone())?;
    tracing::info!(url = %provider.base_url(), model = %config.model, "Model provider ready");
    Ok(Arc::new(provider))
}
