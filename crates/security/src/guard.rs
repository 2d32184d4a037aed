//! Secret Guard: content-based redaction of known secret values.
//!
//! The guard keeps a map of secret value → secret name, populated from a
//! [`SecretProvider`]. Every piece of content that leaves the loop (to the
//! model, a log line, or a transcript row) passes through [`SecretGuard::redact`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ratchet_core::message::{Message, ToolCall};
use ratchet_core::secrets::SecretProvider;
use tracing::{debug, info, warn};

struct GuardState {
    provider: Arc<dyn SecretProvider>,
    backend_name: String,
    /// value → name
    known: HashMap<String, String>,
}

/// Redacts known secret values and exposes the backing provider.
pub struct SecretGuard {
    state: RwLock<GuardState>,
}

impl SecretGuard {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        let backend_name = provider.name().to_string();
        Self {
            state: RwLock::new(GuardState {
                provider,
                backend_name,
                known: HashMap::new(),
            }),
        }
    }

    /// Replace every occurrence of a known secret value with
    /// `[REDACTED:<name>]`.
    ///
    /// Longer values are replaced first so output is deterministic when one
    /// secret contains another.
    pub fn redact(&self, text: &str) -> String {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.known.is_empty() || text.is_empty() {
            return text.to_string();
        }

        let mut pairs: Vec<(&String, &String)> = state
            .known
            .iter()
            .filter(|(value, _)| text.contains(value.as_str()))
            .collect();
        if pairs.is_empty() {
            return text.to_string();
        }
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        let mut out = text.to_string();
        for (value, name) in pairs {
            out = out.replace(value.as_str(), &format!("[REDACTED:{name}]"));
        }
        out
    }

    /// Redact `message.content` and its tool-call arguments in place.
    /// Returns whether anything changed.
    pub fn check_and_redact(&self, message: &mut Message) -> bool {
        let redacted = self.redact(&message.content);
        let mut changed = redacted != message.content;
        if changed {
            message.content = redacted;
        }
        changed |= self.redact_tool_calls(&mut message.tool_calls);
        changed
    }

    /// Redact every string inside the calls' arguments. Returns whether
    /// any changed.
    pub fn redact_tool_calls(&self, calls: &mut [ToolCall]) -> bool {
        let mut changed = false;
        for call in calls {
            for value in call.arguments.values_mut() {
                changed |= self.redact_json(value);
            }
        }
        changed
    }

    fn redact_json(&self, value: &mut serde_json::Value) -> bool {
        match value {
            serde_json::Value::String(text) => {
                let redacted = self.redact(text);
                if redacted == *text {
                    return false;
                }
                *text = redacted;
                true
            }
            serde_json::Value::Array(items) => items.iter_mut().fold(false, |changed, v| self.redact_json(v) | changed),
            serde_json::Value::Object(map) => map.values_mut().fold(false, |changed, v| self.redact_json(v) | changed),
            _ => false,
        }
    }

    /// Remember a single secret value. Empty values are ignored.
    pub fn add_known_secret(&self, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .known
            .insert(value.to_string(), name.to_string());
    }

    /// Load every secret the provider holds. Failures skip the name.
    pub async fn load_all_secrets(&self) -> usize {
        let provider = self.provider();
        let names = match provider.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!(backend = provider.name(), error = %e, "Listing secrets failed");
                return 0;
            }
        };
        self.load_secrets(&names).await
    }

    /// Load the named secrets. Returns how many were added.
    pub async fn load_secrets(&self, names: &[String]) -> usize {
        let provider = self.provider();
        let fetched = fetch_values(provider.as_ref(), names).await;
        let count = fetched.len();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for (value, name) in fetched {
            state.known.insert(value, name);
        }
        debug!(count, "Loaded secrets into guard");
        count
    }

    /// Swap in a new backend.
    ///
    /// The replacement map is built from the new provider before the lock
    /// is taken, so readers see either the old or the new state in full.
    pub async fn set_provider(&self, provider: Arc<dyn SecretProvider>, backend_name: &str) {
        let names = match provider.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!(backend = backend_name, error = %e, "Listing secrets failed");
                Vec::new()
            }
        };
        let known: HashMap<String, String> = fetch_values(provider.as_ref(), &names)
            .await
            .into_iter()
            .collect();

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.provider = provider;
        state.backend_name = backend_name.to_string();
        state.known = known;
        info!(backend = backend_name, secrets = state.known.len(), "Secret backend switched");
    }

    pub fn backend_name(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .backend_name
            .clone()
    }

    pub fn provider(&self) -> Arc<dyn SecretProvider> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .provider
            .clone()
    }

    /// Number of distinct secret values being redacted.
    pub fn known_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .known
            .len()
    }

    /// Whether `text` still contains any known value verbatim.
    pub fn contains_secret(&self, text: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .known
            .keys()
            .any(|v| text.contains(v.as_str()))
    }
}

impl std::fmt::Debug for SecretGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretGuard")
            .field("backend", &self.backend_name())
            .field("known", &self.known_count())
            .finish()
    }
}

async fn fetch_values(provider: &dyn SecretProvider, names: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        match provider.get(name).await {
            Ok(Some(value)) if !value.is_empty() => out.push((value, name.clone())),
            Ok(_) => {}
            Err(e) => debug!(secret = %name, error = %e, "Skipping unreadable secret"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemorySecretProvider;

    fn guard_with(pairs: &[(&str, &str)]) -> SecretGuard {
        let guard = SecretGuard::new(Arc::new(InMemorySecretProvider::new()));
        for (name, value) in pairs {
            guard.add_known_secret(name, value);
        }
        guard
    }

    #[test]
    fn redacts_every_occurrence() {
        let guard = guard_with(&[("GH_TOKEN", "ghp_abc123")]);
        assert_eq!(
            guard.redact("token ghp_abc123 and again ghp_abc123"),
            "token [REDACTED:GH_TOKEN] and again [REDACTED:GH_TOKEN]"
        );
    }

    #[test]
    fn text_without_secrets_is_unchanged() {
        let guard = guard_with(&[("GH_TOKEN", "ghp_abc123")]);
        let text = "nothing to see here";
        assert_eq!(guard.redact(text), text);
    }

    #[test]
    fn empty_values_are_never_known() {
        let guard = guard_with(&[("EMPTY", "")]);
        assert_eq!(guard.known_count(), 0);
        assert_eq!(guard.redact("abc"), "abc");
    }

    #[test]
    fn longer_secret_wins_when_nested() {
        let guard = guard_with(&[("SHORT", "abc"), ("LONG", "abcdef")]);
        assert_eq!(guard.redact("x abcdef y"), "x [REDACTED:LONG] y");
    }

    #[test]
    fn check_and_redact_reports_change() {
        let guard = guard_with(&[("KEY", "s3cr3t-value")]);
        let mut dirty = Message::user("use s3cr3t-value please");
        assert!(guard.check_and_redact(&mut dirty));
        assert_eq!(dirty.content, "use [REDACTED:KEY] please");

        let mut clean = Message::user("nothing");
        assert!(!guard.check_and_redact(&mut clean));
    }

    #[test]
    fn tool_call_arguments_are_redacted() {
        let guard = guard_with(&[("KEY", "s3cr3t-value")]);
        let call = ToolCall::new(
            "tc1",
            "shell",
            serde_json::json!({
                "command": "curl -H 'token: s3cr3t-value' host",
                "env": [{"KEY": "s3cr3t-value"}],
                "timeout_secs": 5,
            }),
        );
        let mut message = Message::assistant_with_tools("calling", vec![call]);
        assert!(guard.contains_secret(&serde_json::to_string(&message.tool_calls).unwrap()));

        assert!(guard.check_and_redact(&mut message));
        let encoded = serde_json::to_string(&message.tool_calls).unwrap();
        assert!(!guard.contains_secret(&encoded), "{encoded}");
        assert_eq!(
            message.tool_calls[0].arguments["command"],
            "curl -H 'token: [REDACTED:KEY]' host"
        );
        assert_eq!(message.tool_calls[0].arguments["env"][0]["KEY"], "[REDACTED:KEY]");
        assert_eq!(message.tool_calls[0].arguments["timeout_secs"], 5);
    }

    #[tokio::test]
    async fn load_all_pulls_from_provider() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("API_KEY", "key-123456").await.unwrap();
        provider.set("BLANK", "").await.unwrap();
        let guard = SecretGuard::new(provider);

        assert_eq!(guard.load_all_secrets().await, 1);
        assert_eq!(guard.redact("key-123456"), "[REDACTED:API_KEY]");
    }

    #[tokio::test]
    async fn set_provider_replaces_map_and_backend() {
        let guard = guard_with(&[("OLD", "old-secret-value")]);
        let next = Arc::new(InMemorySecretProvider::new());
        next.set("NEW", "new-secret-value").await.unwrap();

        guard.set_provider(next, "vault").await;
        assert_eq!(guard.backend_name(), "vault");
        assert_eq!(guard.redact("old-secret-value"), "old-secret-value");
        assert_eq!(guard.redact("new-secret-value"), "[REDACTED:NEW]");
        assert_eq!(
            guard.provider().get("NEW").await.unwrap().as_deref(),
            Some("new-secret-value")
        );
    }
}
