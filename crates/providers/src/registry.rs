//! Provider registry: maps agent-facing aliases to provider instances.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ratchet_config::ProvidersConfig;
use ratchet_core::error::ProviderError;
use ratchet_core::provider::Provider;
use tracing::{debug, warn};

use crate::scripted::ScriptedProvider;

/// Resolves provider aliases (as stored on agent rows) to providers.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    default_alias: String,
}

impl ProviderRegistry {
    /// Create an empty registry whose blank alias resolves to `default_alias`.
    pub fn new(default_alias: impl Into<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_alias: default_alias.into(),
        }
    }

    /// Register (or replace) a provider under `alias`.
    pub fn register(&self, alias: impl Into<String>, provider: Arc<dyn Provider>) {
        let alias = alias.into();
        debug!(alias = %alias, provider = provider.name(), "Registered provider");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias, provider);
    }

    pub fn get(&self, alias: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    pub fn default_alias(&self) -> &str {
        &self.default_alias
    }

    /// Look up `alias`, or the default alias when `alias` is blank.
    pub fn resolve(&self, alias: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let alias = if alias.trim().is_empty() {
            self.default_alias.as_str()
        } else {
            alias
        };
        self.get(alias)
            .ok_or_else(|| ProviderError::NotConfigured(format!("no provider registered as '{alias}'")))
    }

    /// Registered aliases, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        aliases.sort();
        aliases
    }
}

/// Build a registry from the `[providers]` config section.
///
/// Only the `mock` kind is built in; aliases of other kinds are skipped with
/// a warning so an external backend can register them afterwards. The
/// default alias always resolves: it falls back to a mock that answers
/// "Done." when nothing else claims it.
pub fn build_from_config(config: &ProvidersConfig) -> ProviderRegistry {
    let registry = ProviderRegistry::new(&config.default);

    for (alias, provider_config) in &config.aliases {
        match provider_config.kind.as_str() {
            "mock" => {
                let mut provider = ScriptedProvider::always("Done.");
                if let Some(model) = &provider_config.model {
                    provider = provider.with_model(model);
                }
                registry.register(alias.clone(), Arc::new(provider));
            }
            other => warn!(alias = %alias, kind = other, "No built-in provider for this kind; skipping"),
        }
    }

    if registry.get(&config.default).is_none() {
        registry.register(config.default.clone(), Arc::new(ScriptedProvider::always("Done.")));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_config::ProviderConfig;

    #[test]
    fn resolve_known_blank_and_unknown_aliases() {
        let registry = ProviderRegistry::new("mock");
        registry.register("mock", Arc::new(ScriptedProvider::always("hi")));
        registry.register("fast", Arc::new(ScriptedProvider::always("hi").with_model("tiny")));

        assert_eq!(registry.resolve("fast").unwrap().default_model(), "tiny");
        assert_eq!(registry.resolve("").unwrap().default_model(), "mock");
        assert!(matches!(
            registry.resolve("claude"),
            Err(ProviderError::NotConfigured(_))
        ));
        assert_eq!(registry.list(), vec!["fast", "mock"]);
    }

    #[test]
    fn config_builds_mock_aliases_and_default() {
        let mut config = ProvidersConfig::default();
        config.aliases.insert(
            "local".into(),
            ProviderConfig {
                kind: "mock".into(),
                model: Some("mock-7b".into()),
                api_url: None,
                api_key: None,
            },
        );
        config.aliases.insert(
            "remote".into(),
            ProviderConfig {
                kind: "anthropic".into(),
                model: None,
                api_url: None,
                api_key: Some("sk-test".into()),
            },
        );

        let registry = build_from_config(&config);
        assert_eq!(registry.resolve("local").unwrap().default_model(), "mock-7b");
        assert!(registry.resolve("remote").is_err());
        assert!(registry.resolve(&config.default).is_ok());
    }
}
