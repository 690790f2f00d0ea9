use std::collections::HashMap;
use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::openai::OpenAiProvider;
use super::provider::LlmProvider;
use super::types::ModelInfo;
use crate::core::config::Settings;
use crate::core::errors::AppError;

/// Chat models offered to the orchestrator, in `provider/model` form.
const MODEL_CATALOG: &[&str] = &[
    "openai/gpt-4o",
    "openai/gpt-4o-mini",
    "anthropic/claude-3-5-sonnet-20240620",
];

const EMBEDDING_PROVIDER: &str = "openai";

/// Routes `provider/model` ids to a configured provider.
///
/// A provider is only present when its credential is configured, so routing
/// doubles as the pre-flight credential check: a missing key surfaces as a
/// `Config` error before any network call is attempted.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    embedding_model: String,
}

impl ProviderRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        if let Some(key) = settings.providers.openai.api_key.clone() {
            let provider =
                OpenAiProvider::new(key, settings.providers.openai.base_url.clone());
            providers.insert("openai".to_string(), Arc::new(provider));
        }
        if let Some(key) = settings.providers.anthropic.api_key.clone() {
            let provider =
                AnthropicProvider::new(key, settings.providers.anthropic.base_url.clone());
            providers.insert("anthropic".to_string(), Arc::new(provider));
        }

        Self {
            providers,
            embedding_model: settings.rag.embedding_model.clone(),
        }
    }

    /// Register a provider under its own name. Used to slot in test doubles.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn has_any_provider(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Split a `provider/model` id and return the provider plus the bare
    /// model name to pass through to it.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn LlmProvider>, String), AppError> {
        let (provider_name, model_id) = model
            .split_once('/')
            .ok_or_else(|| AppError::BadRequest(format!("invalid model id: {model}")))?;

        let provider = self.providers.get(provider_name).cloned().ok_or_else(|| {
            AppError::Config(format!(
                "no API key configured for provider '{provider_name}'"
            ))
        })?;

        Ok((provider, model_id.to_string()))
    }

    /// The provider used for embeddings, with its model name.
    pub fn embedder(&self) -> Result<(Arc<dyn LlmProvider>, String), AppError> {
        let provider = self.providers.get(EMBEDDING_PROVIDER).cloned().ok_or_else(|| {
            AppError::Config(format!(
                "embeddings require an API key for provider '{EMBEDDING_PROVIDER}'"
            ))
        })?;
        Ok((provider, self.embedding_model.clone()))
    }

    /// Catalog entries whose provider has a credential configured.
    pub fn available_models(&self) -> Vec<ModelInfo> {
        MODEL_CATALOG
            .iter()
            .filter_map(|id| {
                let (provider, _) = id.split_once('/')?;
                self.providers.contains_key(provider).then(|| ModelInfo {
                    id: id.to_string(),
                    provider: provider.to_string(),
                })
            })
            .collect()
    }
}
