//! Context manager: keeps a conversation inside the model's window.
//!
//! When the estimated size reaches the compaction threshold, everything
//! between the system prompt and the last [`KEEP_TAIL`] messages is
//! summarized by the provider and replaced with a single synthetic user
//! message. If the provider cannot summarize, a plain excerpt is used so
//! compaction itself never fails.

use std::collections::HashMap;

use ratchet_config::ContextConfig;
use ratchet_core::error::Error;
use ratchet_core::message::Message;
use ratchet_core::provider::{Provider, ProviderRequest};
use ratchet_core::CancellationToken;
use tracing::{info, warn};

use super::token::estimate_messages_tokens;

/// Window size assumed for models not in the table.
pub const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// Most recent messages always kept verbatim.
pub const KEEP_TAIL: usize = 4;

/// Characters of the raw transcript kept when summarization fails.
pub const FALLBACK_EXCERPT_CHARS: usize = 500;

const FALLBACK_PREFIX: &str = "(auto-summary unavailable; excerpt follows)\n";

const SUMMARY_PROMPT: &str = "You are compressing the middle of an agent's working conversation. \
Summarize the transcript you are given: keep every decision made, file touched, command run, \
result obtained and open question. Be factual and terse. Do not invent anything. \
Reply with the summary only.";

/// Known model families and their context windows, matched as
/// case-insensitive substrings of the model name.
const MODEL_LIMITS: &[(&str, usize)] = &[
    ("claude", 200_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4.1", 1_000_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o1", 200_000),
    ("o3", 200_000),
    ("gemini", 1_000_000),
    ("llama3", 8_192),
    ("llama-3.1", 128_000),
    ("mistral", 32_000),
    ("qwen", 32_768),
    ("deepseek", 64_000),
];

/// Context window of `model`: the limit of the longest key that occurs in
/// the model name, ignoring case. `overrides` take part in the match and win
/// ties. No match gives [`DEFAULT_CONTEXT_LIMIT`].
pub fn context_limit(model: &str, overrides: &HashMap<String, usize>) -> usize {
    let model = model.to_lowercase();
    let mut best: Option<(usize, usize)> = None;
    let candidates = MODEL_LIMITS
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .chain(overrides.iter().map(|(k, v)| (k.to_lowercase(), *v)));
    for (key, limit) in candidates {
        if key.is_empty() || !model.contains(&key) {
            continue;
        }
        if best.is_none_or(|(len, _)| key.len() >= len) {
            best = Some((key.len(), limit));
        }
    }
    best.map_or(DEFAULT_CONTEXT_LIMIT, |(_, limit)| limit)
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    model: String,
    limit: usize,
    threshold: f64,
    compactions: usize,
}

impl ContextManager {
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_config(model, &ContextConfig::default())
    }

    pub fn from_config(model: impl Into<String>, config: &ContextConfig) -> Self {
        let model = model.into();
        let threshold = if config.compaction_threshold > 0.0 && config.compaction_threshold <= 1.0 {
            config.compaction_threshold
        } else {
            0.80
        };
        Self {
            limit: context_limit(&model, &config.model_limits),
            model,
            threshold,
            compactions: 0,
        }
    }

    /// Override the window size.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn compactions(&self) -> usize {
        self.compactions
    }

    /// Estimated size at which compaction kicks in.
    pub fn threshold_tokens(&self) -> usize {
        // The epsilon keeps e.g. 0.29 × 100 from flooring to 28.
        (self.limit as f64 * self.threshold + 1e-9).floor() as usize
    }

    pub fn needs_compaction(&self, messages: &[Message]) -> bool {
        estimate_messages_tokens(messages) >= self.threshold_tokens()
    }

    /// Compress the middle of `messages`.
    ///
    /// Conversations with fewer than five messages, or with nothing between
    /// the system prompt and the tail, come back unchanged. Only
    /// cancellation is an error; a failed summary falls back to an excerpt.
    pub async fn compact(
        &mut self,
        cancel: &CancellationToken,
        messages: &[Message],
        provider: &dyn Provider,
    ) -> Result<Vec<Message>, Error> {
        if messages.len() < KEEP_TAIL + 1 {
            return Ok(messages.to_vec());
        }
        let tail_start = messages.len() - KEEP_TAIL;
        let middle = &messages[1..tail_start];
        if middle.is_empty() {
            return Ok(messages.to_vec());
        }

        let transcript: String = middle
            .iter()
            .map(|m| format!("[{}]: {}\n\n", m.role, m.content))
            .collect();

        let request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(SUMMARY_PROMPT), Message::user(transcript.clone())],
            vec![],
        );
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = provider.complete(request) => response,
        };

        let summary = match response {
            Ok(resp) if !resp.content().trim().is_empty() => resp.content().trim().to_string(),
            Ok(_) => {
                warn!(model = %self.model, "Empty compaction summary; using excerpt");
                fallback_excerpt(&transcript)
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Compaction summary failed; using excerpt");
                fallback_excerpt(&transcript)
            }
        };

        self.compactions += 1;
        let note = format!(
            "[CONTEXT COMPACTED - compaction #{}]\n\nSummary of prior conversation:\n{summary}\n\n\
             The conversation continues from this point.",
            self.compactions
        );

        let mut compacted = Vec::with_capacity(KEEP_TAIL + 2);
        compacted.push(messages[0].clone());
        compacted.push(Message::user(note));
        compacted.extend_from_slice(&messages[tail_start..]);

        info!(
            compaction = self.compactions,
            before = messages.len(),
            after = compacted.len(),
            "Conversation compacted"
        );
        Ok(compacted)
    }
}

fn fallback_excerpt(transcript: &str) -> String {
    let excerpt: String = transcript.chars().take(FALLBACK_EXCERPT_CHARS).collect();
    format!("{FALLBACK_PREFIX}{excerpt}")
}
