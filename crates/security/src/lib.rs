//! Security module for Ratchet: secret redaction, secret backends, tool
//! policies, and workspace path confinement.
//!
//! Provides:
//! - **Guard**: redact known secret values from everything the loop emits
//! - **Providers**: in-memory and environment secret backends
//! - **Policy**: scoped allow / deny / require-approval rules per tool
//! - **Path validation**: filesystem sandboxing to the project workspace

pub mod guard;
pub mod path;
pub mod policy;
pub mod providers;

pub use guard::SecretGuard;
pub use path::{PathValidationError, resolve_in_workspace};
pub use policy::{PolicyRule, RulePolicyEngine, RuleScope};
pub use providers::{EnvSecretProvider, InMemorySecretProvider};
