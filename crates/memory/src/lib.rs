//! Memory store implementations for Ratchet.

pub mod in_memory;
pub mod sqlite;
pub mod vector;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;
pub use vector::{bytes_to_float32, cosine_similarity, float32_to_bytes, hybrid_merge};
