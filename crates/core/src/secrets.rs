//! Secret provider trait: a named key/value backend for secret material.

use async_trait::async_trait;

use crate::error::SecretError;

/// A backend holding named secret values.
///
/// Implementations: in-memory (tests, writable default) and environment
/// variables. Vault-style backends plug in behind the same contract.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Backend name used in logs and status output.
    fn name(&self) -> &str;

    /// Fetch one secret. `Ok(None)` when the name is unknown.
    async fn get(&self, name: &str) -> Result<Option<String>, SecretError>;

    /// Store or overwrite a secret.
    async fn set(&self, name: &str, value: &str) -> Result<(), SecretError>;

    /// Names of every secret the backend holds, sorted.
    async fn list(&self) -> Result<Vec<String>, SecretError>;

    /// Remove a secret; returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, SecretError>;
}
