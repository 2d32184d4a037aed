//! Memory trait: per-agent persistent knowledge with hybrid search.
//!
//! The loop recalls entries relevant to a task before the first model call
//! and, when the task ends, distills the assistant's output into new entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::provider::Embedder;

/// Category given to entries distilled from a finished task.
pub const TRANSCRIPT_CATEGORY: &str = "transcript";

/// Fragments shorter than this are not worth remembering.
pub const MIN_FRAGMENT_CHARS: usize = 20;

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID; assigned on save when empty
    pub id: String,

    /// The agent this memory belongs to
    pub agent_id: String,

    /// The content of the memory
    pub content: String,

    /// Free-form category (e.g. "transcript", "fact")
    pub category: String,

    /// Optional embedding vector (stored as a little-endian f32 blob)
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(
        agent_id: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            agent_id: agent_id.into(),
            content: content.into(),
            category: category.into(),
            embedding: None,
            created_at: Utc::now(),
            score: 0.0,
        }
    }
}

/// Split a transcript into rememberable fragments: blank-line separated,
/// trimmed, and at least [`MIN_FRAGMENT_CHARS`] long.
pub fn transcript_fragments(transcript: &str) -> Vec<String> {
    transcript
        .split("\n\n")
        .map(str::trim)
        .filter(|f| f.chars().count() >= MIN_FRAGMENT_CHARS)
        .map(String::from)
        .collect()
}

/// The core MemoryStore trait.
///
/// Implementations: SQLite (FTS5 + vectors), in-memory (for testing).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Persist an entry and return its id.
    async fn save(&self, entry: MemoryEntry) -> Result<String, MemoryError>;

    /// Ranked search over one agent's memories.
    ///
    /// With a `query_embedding` the keyword rank is blended with cosine
    /// similarity (hybrid); without one the search is keyword-only.
    async fn search(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Get a memory by ID.
    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// Delete a memory by ID.
    async fn delete(&self, id: &str) -> Result<bool, MemoryError>;

    /// Number of memories held for an agent.
    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError>;

    /// Split `transcript` into fragments, embed each when an embedder is
    /// available, and save them under [`TRANSCRIPT_CATEGORY`].
    ///
    /// Returns the number of entries saved. An embedding failure stores the
    /// fragment without a vector.
    async fn extract_and_save(
        &self,
        agent_id: &str,
        transcript: &str,
        embedder: Option<&dyn Embedder>,
    ) -> Result<usize, MemoryError> {
        let mut saved = 0;
        for fragment in transcript_fragments(transcript) {
            let mut entry = MemoryEntry::new(agent_id, fragment, TRANSCRIPT_CATEGORY);
            if let Some(embedder) = embedder {
                match embedder.embed(&entry.content).await {
                    Ok(vector) => entry.embedding = Some(vector),
                    Err(e) => tracing::warn!(error = %e, "Embedding failed; saving without vector"),
                }
            }
            self.save(entry).await?;
            saved += 1;
        }
        Ok(saved)
    }
}
