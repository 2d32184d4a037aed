//! Token estimation utilities.
//!
//! Character-based heuristic: 4 characters per token, plus a fixed 4-token
//! overhead per message for the role and wire delimiters.

use ratchet_core::message::Message;

/// Per-message overhead in tokens.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count for a string. Rounds down.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
