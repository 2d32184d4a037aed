//! In-memory store: useful for testing and ephemeral runs.

use async_trait::async_trait;
use ratchet_core::error::MemoryError;
use ratchet_core::memory::{MemoryEntry, MemoryStore};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vector;

/// Keeps memories in a Vec. Keyword relevance is the number of query words
/// found in the content.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn query_words(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(id)
    }

    async fn search(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        let own = entries.iter().filter(|e| e.agent_id == agent_id);
        let words = query_words(query);

        if words.is_empty() && query_embedding.is_none() {
            let mut recent: Vec<MemoryEntry> = own.cloned().collect();
            recent.reverse();
            recent.truncate(limit);
            return Ok(recent);
        }

        let keyword_hits: Vec<MemoryEntry> = own
            .clone()
            .filter_map(|e| {
                let content = e.content.to_lowercase();
                let hits = words.iter().filter(|w| content.contains(w.as_str())).count();
                (hits > 0).then(|| {
                    let mut hit = e.clone();
                    hit.score = hits as f32;
                    hit
                })
            })
            .collect();

        match query_embedding {
            Some(qe) => {
                let candidates = own.filter(|e| e.embedding.is_some()).cloned().collect();
                Ok(vector::hybrid_merge(keyword_hits, candidates, qe, limit))
            }
            None => {
                let mut results = keyword_hits;
                results.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                results.truncate(limit);
                Ok(results)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < len_before)
    }

    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get() {
        let mem = InMemoryStore::new();
        let id = mem
            .save(MemoryEntry::new("a1", "Rust is a systems language", "fact"))
            .await
            .unwrap();
        assert_eq!(
            mem.get(&id).await.unwrap().unwrap().content,
            "Rust is a systems language"
        );
    }

    #[tokio::test]
    async fn search_ranks_by_matching_words() {
        let mem = InMemoryStore::new();
        mem.save(MemoryEntry::new("a1", "Rust is great for systems programming", "fact"))
            .await
            .unwrap();
        mem.save(MemoryEntry::new("a1", "Rust programming is fun", "fact"))
            .await
            .unwrap();
        mem.save(MemoryEntry::new("a1", "JavaScript runs in the browser", "fact"))
            .await
            .unwrap();
        mem.save(MemoryEntry::new("a2", "Rust systems for someone else", "fact"))
            .await
            .unwrap();

        let results = mem.search("a1", "rust systems", 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("systems"));
    }

    #[tokio::test]
    async fn extract_and_save_filters_short_fragments() {
        let mem = InMemoryStore::new();
        let saved = mem
            .extract_and_save("a1", "short\n\nThis fragment is long enough to keep.", None)
            .await
            .unwrap();
        assert_eq!(saved, 1);
        assert_eq!(mem.count("a1").await.unwrap(), 1);
        let hits = mem.search("a1", "fragment", 5, None).await.unwrap();
        assert_eq!(hits[0].category, "transcript");
    }

    #[tokio::test]
    async fn delete_entry() {
        let mem = InMemoryStore::new();
        let id = mem
            .save(MemoryEntry::new("a1", "To be deleted", "fact"))
            .await
            .unwrap();
        assert!(mem.delete(&id).await.unwrap());
        assert_eq!(mem.count("a1").await.unwrap(), 0);
    }
}
