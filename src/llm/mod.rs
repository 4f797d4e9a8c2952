//! LLM integration for Mindful Match.
//!
//! The analysis gateway talks to the model through the `LlmProvider` trait;
//! `AnthropicProvider` is the production backend.

pub mod anthropic;
mod costs;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use costs::model_cost;
pub use provider::*;

use std::sync::Arc;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override of the provider's API host.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => {
            let mut provider = AnthropicProvider::new(config.api_key.clone(), &config.model);
            if let Some(ref url) = config.base_url {
                provider = provider.with_base_url(url);
            }
            tracing::info!("Using Anthropic (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}
