//! SQLite memory store with FTS5 full-text search.
//!
//! Uses the shared database's `memory_entries` table and its external-content
//! FTS5 index `memory_entries_fts` (kept in sync by triggers). Keyword search
//! is BM25-ranked; with a query embedding the rank is blended with cosine
//! similarity over stored vectors.

use crate::vector;
use async_trait::async_trait;
use ratchet_core::error::MemoryError;
use ratchet_core::memory::{MemoryEntry, MemoryStore};
use ratchet_store::{Database, format_ts, parse_ts};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// How many keyword hits to fetch per requested result before blending.
const OVERFETCH: usize = 4;

/// Memory store backed by the shared SQLite database.
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Use the `memory_entries` tables of an open database.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Parse a `MemoryEntry` from a SQLite row.
    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryEntry, MemoryError> {
        let get = |col: &str| -> Result<String, MemoryError> {
            row.try_get(col)
                .map_err(|e| MemoryError::QueryFailed(format!("{col} column: {e}")))
        };

        let created_at = parse_ts(&get("created_at")?).map_err(MemoryError::QueryFailed)?;
        let blob: Option<Vec<u8>> = row
            .try_get("embedding")
            .map_err(|e| MemoryError::QueryFailed(format!("embedding column: {e}")))?;
        let embedding = blob.as_deref().map(vector::bytes_to_float32).transpose()?;

        Ok(MemoryEntry {
            id: get("id")?,
            agent_id: get("agent_id")?,
            content: get("content")?,
            category: get("category")?,
            embedding,
            created_at,
            score: 0.0,
        })
    }

    /// Build a safe FTS5 query from free text.
    ///
    /// Each word is stripped to alphanumerics, quoted, and prefix-matched;
    /// words are OR-ed so long task descriptions still find partial matches.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|clean| !clean.is_empty())
            .map(|clean| format!("\"{clean}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    async fn recent(&self, agent_id: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM memory_entries WHERE agent_id = ?1 \
             ORDER BY created_at DESC, iid DESC LIMIT ?2",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Recent entries: {e}")))?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn keyword_search(
        &self,
        agent_id: &str,
        fts_query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT m.*, bm25(memory_entries_fts) AS rank
            FROM memory_entries_fts f
            JOIN memory_entries m ON m.iid = f.rowid
            WHERE memory_entries_fts MATCH ?1 AND m.agent_id = ?2
            ORDER BY rank
            LIMIT ?3
            "#,
        )
        .bind(fts_query)
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter()
            .map(|row| {
                let mut entry = Self::row_to_entry(row)?;
                // bm25() is negative; lower is better
                let rank: f64 = row.try_get("rank").unwrap_or(0.0);
                entry.score = (-rank) as f32;
                Ok(entry)
            })
            .collect()
    }

    async fn embedded_entries(&self, agent_id: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM memory_entries WHERE agent_id = ?1 AND embedding IS NOT NULL",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Vector scan: {e}")))?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let blob = entry.embedding.as_deref().map(vector::float32_to_bytes);

        sqlx::query(
            r#"
            INSERT INTO memory_entries (id, agent_id, content, category, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                category = excluded.category,
                embedding = excluded.embedding
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.agent_id)
        .bind(&entry.content)
        .bind(&entry.category)
        .bind(blob.as_deref())
        .bind(format_ts(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(memory_id = %entry.id, agent_id = %entry.agent_id, "Stored memory");
        Ok(entry.id)
    }

    async fn search(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() && query_embedding.is_none() {
            return self.recent(agent_id, limit).await;
        }

        let keyword_hits = if fts_query.is_empty() {
            vec![]
        } else {
            self.keyword_search(agent_id, &fts_query, limit * OVERFETCH)
                .await?
        };

        match query_embedding {
            Some(qe) => {
                let candidates = self.embedded_entries(agent_id).await?;
                Ok(vector::hybrid_merge(keyword_hits, candidates, qe, limit))
            }
            None => {
                let mut results = keyword_hits;
                results.truncate(limit);
                Ok(results)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memory_entries WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET by ID: {e}")))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memory_entries WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM memory_entries WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }
}
