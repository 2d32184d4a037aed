//! Secret providers: an in-memory map and a prefix-filtered view of the
//! process environment.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use ratchet_core::error::SecretError;
use ratchet_core::secrets::SecretProvider;
use tokio::sync::RwLock;

/// A writable in-process secret store.
#[derive(Default)]
pub struct InMemorySecretProvider {
    values: RwLock<BTreeMap<String, String>>,
}

impl InMemorySecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an iterator of `(name, value)` pairs.
    pub fn with_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SecretProvider for InMemorySecretProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<Option<String>, SecretError> {
        Ok(self.values.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.values
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, SecretError> {
        Ok(self.values.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, SecretError> {
        Ok(self.values.write().await.remove(name).is_some())
    }
}

/// Environment variables with a fixed prefix, exposed under the name that
/// follows the prefix (`RATCHET_SECRET_GH_TOKEN` → `GH_TOKEN`).
///
/// The environment is captured once; writes land in an overlay map so the
/// process environment is never mutated.
pub struct EnvSecretProvider {
    prefix: String,
    captured: HashMap<String, String>,
    overlay: RwLock<HashMap<String, Option<String>>>,
}

impl EnvSecretProvider {
    /// Capture the current process environment.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from an explicit variable list.
    pub fn from_vars<I>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = prefix.into();
        let captured = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix.as_str())
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value))
            })
            .collect();
        Self {
            prefix,
            captured,
            overlay: RwLock::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get(&self, name: &str) -> Result<Option<String>, SecretError> {
        if let Some(entry) = self.overlay.read().await.get(name) {
            return Ok(entry.clone());
        }
        Ok(self.captured.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.overlay
            .write()
            .await
            .insert(name.to_string(), Some(value.to_string()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, SecretError> {
        let overlay = self.overlay.read().await;
        let mut names: Vec<String> = self
            .captured
            .keys()
            .filter(|k| !matches!(overlay.get(*k), Some(None)))
            .cloned()
            .collect();
        for (name, value) in overlay.iter() {
            if value.is_some() && !self.captured.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, SecretError> {
        let existed = self.get(name).await?.is_some();
        self.overlay.write().await.insert(name.to_string(), None);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_crud() {
        let provider = InMemorySecretProvider::new();
        provider.set("B", "2").await.unwrap();
        provider.set("A", "1").await.unwrap();
        assert_eq!(provider.list().await.unwrap(), vec!["A", "B"]);
        assert_eq!(provider.get("A").await.unwrap().as_deref(), Some("1"));
        assert!(provider.delete("A").await.unwrap());
        assert!(!provider.delete("A").await.unwrap());
        assert_eq!(provider.get("A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn env_provider_filters_by_prefix() {
        let provider = EnvSecretProvider::from_vars(
            "RATCHET_SECRET_",
            vec![
                ("RATCHET_SECRET_GH_TOKEN".to_string(), "ghp_1".to_string()),
                ("RATCHET_SECRET_".to_string(), "ignored".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ],
        );
        assert_eq!(provider.list().await.unwrap(), vec!["GH_TOKEN"]);
        assert_eq!(provider.get("GH_TOKEN").await.unwrap().as_deref(), Some("ghp_1"));
        assert_eq!(provider.get("PATH").await.unwrap(), None);
    }

    #[tokio::test]
    async fn env_provider_writes_go_to_overlay() {
        let provider = EnvSecretProvider::from_vars(
            "P_",
            vec![("P_OLD".to_string(), "x".to_string())],
        );
        provider.set("NEW", "y").await.unwrap();
        assert_eq!(provider.list().await.unwrap(), vec!["NEW", "OLD"]);

        assert!(provider.delete("OLD").await.unwrap());
        assert_eq!(provider.get("OLD").await.unwrap(), None);
        assert_eq!(provider.list().await.unwrap(), vec!["NEW"]);
    }
}
