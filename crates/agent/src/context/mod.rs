//! Context window management.
//!
//! - **token**: message-level token estimation
//! - **manager**: model-aware limits and conversation compaction

pub mod manager;
pub mod token;

pub use manager::{ContextManager, DEFAULT_CONTEXT_LIMIT, KEEP_TAIL, context_limit};
pub use token::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens};
