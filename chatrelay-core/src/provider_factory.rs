use std::{collections::HashMap, sync::Arc};

use secrecy::SecretString;

use crate::config::Config;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::provider::{NullProvider, StreamProvider};
use crate::providers::anthropic::Anthropic;
use crate::providers::openai::OpenAi;

/// Registry of concrete provider instances by name.
/// Names correspond to config keys (e.g., "openai", "anthropic", "null").
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn StreamProvider>>,
}

impl ProviderRegistry {
    /// Build a registry from configuration. A `null` provider is always
    /// registered; real providers only when their API-key env var is set.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let mut providers: HashMap<String, Arc<dyn StreamProvider>> = HashMap::new();
        providers.insert("null".into(), Arc::new(NullProvider));

        if let Some(pc) = &cfg.providers.openai
            && let Ok(api_key) = std::env::var(&pc.api_key_env)
        {
            let base = pc
                .base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            let org = std::env::var("OPENAI_ORG").ok();
            let http = HttpClient::new(&cfg.http)?;
            let openai = OpenAi::new(http, api_key, base, org, pc.model.clone());
            providers.insert("openai".to_string(), Arc::new(openai));
        }

        if let Some(pc) = &cfg.providers.anthropic
            && let Ok(api_key) = std::env::var(&pc.api_key_env)
        {
            let base = pc
                .base
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string());
            let http = HttpClient::new(&cfg.http)?;
            let anthropic = Anthropic::new(
                http,
                SecretString::new(api_key.into()),
                base,
                pc.model.clone(),
            );
            providers.insert("anthropic".to_string(), Arc::new(anthropic));
        }

        Ok(Self { providers })
    }

    /// Build a registry from explicit instances. Used by tests and by
    /// callers that construct providers themselves; `null` is still added.
    pub fn with_providers(list: Vec<Arc<dyn StreamProvider>>) -> Self {
        let mut providers: HashMap<String, Arc<dyn StreamProvider>> = HashMap::new();
        providers.insert("null".into(), Arc::new(NullProvider));
        for p in list {
            providers.insert(p.name().to_string(), p);
        }
        Self { providers }
    }

    /// Get a provider by name (e.g., "openai", "anthropic", "null").
    pub fn get(&self, name: &str) -> Option<Arc<dyn StreamProvider>> {
        self.providers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_registry_with_null() {
        let reg = ProviderRegistry::from_config(&Config::default()).unwrap();
        assert!(reg.get("null").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn with_providers_registers_by_name() {
        let reg = ProviderRegistry::with_providers(vec![]);
        assert_eq!(reg.get("null").unwrap().name(), "null");
    }
}
