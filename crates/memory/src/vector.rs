//! Vector similarity, the embedding blob codec, and hybrid score blending.

use std::collections::HashMap;

use ratchet_core::error::MemoryError;
use ratchet_core::memory::MemoryEntry;

/// Weight of the normalized keyword rank in a hybrid score.
pub const KEYWORD_WEIGHT: f32 = 0.3;

/// Weight of cosine similarity in a hybrid score.
pub const VECTOR_WEIGHT: f32 = 0.7;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Encode an embedding as `len × 4` little-endian f32 bytes.
pub fn float32_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 blob.
pub fn bytes_to_float32(blob: &[u8]) -> Result<Vec<f32>, MemoryError> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::Storage(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Blend keyword hits with vector candidates.
///
/// `keyword_hits` carry a raw keyword score (higher is better) which is
/// normalized by the best hit; `candidates` are entries with embeddings.
/// Each entry's final score is `0.3 × keyword + 0.7 × cosine`.
pub fn hybrid_merge(
    keyword_hits: Vec<MemoryEntry>,
    candidates: Vec<MemoryEntry>,
    query_embedding: &[f32],
    limit: usize,
) -> Vec<MemoryEntry> {
    let best = keyword_hits
        .iter()
        .map(|e| e.score)
        .fold(0.0f32, f32::max);

    // id → (keyword part, vector part, entry)
    let mut merged: HashMap<String, (f32, f32, MemoryEntry)> = HashMap::new();

    for entry in keyword_hits {
        let keyword = if best > 0.0 { entry.score / best } else { 0.0 };
        let vector = entry
            .embedding
            .as_deref()
            .map(|e| cosine_similarity(e, query_embedding))
            .unwrap_or(0.0);
        merged.insert(entry.id.clone(), (keyword, vector, entry));
    }

    for entry in candidates {
        if merged.contains_key(&entry.id) {
            continue;
        }
        let Some(embedding) = entry.embedding.as_deref() else {
            continue;
        };
        let vector = cosine_similarity(embedding, query_embedding);
        merged.insert(entry.id.clone(), (0.0, vector, entry));
    }

    let mut results: Vec<MemoryEntry> = merged
        .into_values()
        .map(|(keyword, vector, mut entry)| {
            entry.score = KEYWORD_WEIGHT * keyword + VECTOR_WEIGHT * vector;
            entry
        })
        .filter(|e| e.score > 0.0)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    results.truncate(limit);
    results
}
