//! Loop detector: classifies recent tool-call history.
//!
//! Four strategies run in priority order over the recorded calls and the
//! first non-OK verdict wins:
//!
//! 1. **Repeated error**: the same call failed with the same message too often
//! 2. **No progress**: the same call keeps returning the same result
//! 3. **Consecutive**: the same call is issued back to back
//! 4. **Alternating**: two calls ping-pong (A, B, A, B, ...)
//!
//! Calls are compared by tool name plus a short hash of the arguments.

use ratchet_config::LoopDetectionConfig;
use sha2::{Digest, Sha256};

/// Oldest entries are dropped past this many calls.
pub const MAX_HISTORY: usize = 100;

/// First 8 bytes of the SHA-256 digest, hex encoded (16 chars).
pub fn short_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

/// Hash of a call's arguments. `serde_json::Map` keeps keys sorted, so the
/// encoding is canonical.
pub fn hash_arguments(arguments: &serde_json::Map<String, serde_json::Value>) -> String {
    short_hash(&serde_json::to_string(arguments).unwrap_or_default())
}

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEntry {
    pub tool_name: String,
    pub args_hash: String,
    pub result_hash: String,
    pub is_error: bool,
    pub error_msg: String,
}

impl LoopEntry {
    fn same_call(&self, other: &LoopEntry) -> bool {
        self.tool_name == other.tool_name && self.args_hash == other.args_hash
    }
}

/// Outcome of [`LoopDetector::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    Ok,
    Warning(String),
    Break(String),
}

impl LoopVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, LoopVerdict::Ok)
    }

    pub fn is_break(&self) -> bool {
        matches!(self, LoopVerdict::Break(_))
    }
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: LoopDetectionConfig,
    history: Vec<LoopEntry>,
}

impl LoopDetector {
    /// Zero thresholds in `config` fall back to the defaults.
    pub fn new(config: LoopDetectionConfig) -> Self {
        Self {
            config: config.normalized(),
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &LoopDetectionConfig {
        &self.config
    }

    pub fn history(&self) -> &[LoopEntry] {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Append one tool invocation. `result` is the text fed back to the model.
    pub fn record(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        result: &str,
        is_error: bool,
    ) {
        if self.history.len() == MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(LoopEntry {
            tool_name: tool_name.to_string(),
            args_hash: hash_arguments(arguments),
            result_hash: short_hash(result),
            is_error,
            error_msg: if is_error { result.to_string() } else { String::new() },
        });
    }

    pub fn check(&self) -> LoopVerdict {
        let Some(last) = self.history.last() else {
            return LoopVerdict::Ok;
        };

        if last.is_error {
            let count = self
                .history
                .iter()
                .filter(|e| e.is_error && e.same_call(last) && e.error_msg == last.error_msg)
                .count();
            if count >= self.config.max_errors {
                return LoopVerdict::Break(format!(
                    "tool '{}' failed {count} times with the same arguments and error",
                    last.tool_name
                ));
            }
        } else {
            let count = self
                .history
                .iter()
                .filter(|e| !e.is_error && e.same_call(last) && e.result_hash == last.result_hash)
                .count();
            if count >= self.config.max_no_progress {
                return LoopVerdict::Break(format!(
                    "tool '{}' returned the same result {count} times without progress",
                    last.tool_name
                ));
            }
        }

        let run = self
            .history
            .iter()
            .rev()
            .take_while(|e| e.same_call(last))
            .count();
        if run >= self.config.max_consecutive {
            return LoopVerdict::Break(format!(
                "tool '{}' called {run} times in a row with identical arguments",
                last.tool_name
            ));
        }
        if run > 1 && run + 1 >= self.config.max_consecutive {
            return LoopVerdict::Warning(format!(
                "tool '{}' called {run} times in a row with identical arguments",
                last.tool_name
            ));
        }

        self.check_alternating()
    }

    fn check_alternating(&self) -> LoopVerdict {
        let n = self.history.len();
        if n < 4 {
            return LoopVerdict::Ok;
        }
        let last = &self.history[n - 1];
        let prev = &self.history[n - 2];
        if last.same_call(prev) {
            return LoopVerdict::Ok;
        }

        // Count complete (prev, last) pairs from the tail; a lone entry left
        // over at the old end never counts.
        let mut cycles = 0;
        let mut end = n;
        while end >= 2 {
            let a = &self.history[end - 2];
            let b = &self.history[end - 1];
            if !(a.same_call(prev) && b.same_call(last)) {
                break;
            }
            cycles += 1;
            end -= 2;
        }

        if cycles >= self.config.max_alternating {
            LoopVerdict::Break(format!(
                "alternating between '{}' and '{}' for {cycles} cycles",
                prev.tool_name, last.tool_name
            ))
        } else {
            LoopVerdict::Ok
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(LoopDetectionConfig::default())
    }
}
