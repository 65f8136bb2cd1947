//! Provider registry.
//!
//! Constructs and holds the two configured model-tier adapters. At startup
//! the registry reads the [`LlmConfig`], resolves authentication (env vars,
//! keychain, or a direct key), and instantiates an Anthropic adapter for
//! each tier.

use crate::anthropic::AnthropicProvider;
use crate::traits::LlmProvider;
use sa_domain::capability::ModelRole;
use sa_domain::config::LlmConfig;
use sa_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Holds the instantiated LLM providers, keyed by tier.
///
/// Providers that fail to initialize are recorded rather than aborting
/// startup, so the gateway can still boot and surface the problem on the
/// first request that needs that tier.
pub struct ProviderRegistry {
    providers: HashMap<ModelRole, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub role: ModelRole,
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message before it reaches logs.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<ModelRole, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for (role, entry) in [
            (ModelRole::Fast, &config.fast),
            (ModelRole::Strong, &config.strong),
        ] {
            match AnthropicProvider::from_config(entry, &config.auth) {
                Ok(p) => {
                    tracing::info!(?role, model = %entry.model, "registered LLM provider");
                    providers.insert(role, Arc::new(p) as Arc<dyn LlmProvider>);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(?role, error = %safe_error, "failed to initialize LLM provider");
                    init_errors.push(ProviderInitError {
                        role,
                        error: safe_error,
                    });
                }
            }
        }

        Self {
            providers,
            init_errors,
        }
    }

    /// Get the provider for a model tier.
    pub fn get(&self, role: ModelRole) -> Result<Arc<dyn LlmProvider>> {
        self.providers.get(&role).cloned().ok_or_else(|| {
            Error::Config(format!(
                "no LLM provider available for tier {:?} — check configured auth",
                role
            ))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}
