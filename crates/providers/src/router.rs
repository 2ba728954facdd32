//! Provider router — maps provider keys to adapters.
//!
//! Every known backend is registered whether or not it has a credential;
//! unconfigured adapters answer in demo mode.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_config::AppConfig;
use conclave_core::error::ProviderError;
use conclave_core::provider::Provider;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes requests to the correct provider.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Builder-style registration, handy in tests.
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    /// Get a specific provider by key.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider keys, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.list())
            .finish()
    }
}

/// Build all adapters from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new();

    let openai = config.provider("openai");
    let mut p = OpenAiCompatProvider::openai(openai.api_key)?;
    if let Some(url) = openai.api_url {
        p = p.with_base_url(url);
    }
    router.register(Arc::new(p));

    let openrouter = config.provider("openrouter");
    let mut p = OpenAiCompatProvider::openrouter(openrouter.api_key)?;
    if let Some(url) = openrouter.api_url {
        p = p.with_base_url(url);
    }
    router.register(Arc::new(p));

    let anthropic = config.provider("anthropic");
    let mut p = AnthropicProvider::new(anthropic.api_key)?;
    if let Some(url) = anthropic.api_url {
        p = p.with_base_url(url);
    }
    router.register(Arc::new(p));

    let google = config.provider("google");
    let mut p = GoogleProvider::new(google.api_key)?;
    if let Some(url) = google.api_url {
        p = p.with_base_url(url);
    }
    router.register(Arc::new(p));

    Ok(router)
}
