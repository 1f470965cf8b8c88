//! Storage abstraction over the vector backend.
//!
//! The [`VectorStore`] trait is the complete interface the core consumes
//! from the backend: an indexed key/payload/vector store with
//! filter-predicate retrieval, deletion, and payload mutation. Two
//! implementations exist: [`memory::MemoryStore`] for tests and local
//! runs, and [`qdrant::QdrantStore`] for the real backend.
//!
//! # Point references
//!
//! The backend assigns every point an id of its native shape; the core
//! generates UUIDs for writes and otherwise treats the reference as
//! opaque. All mutation goes through filter predicates
//! ([`VectorStore::set_meta_by_filter`], [`VectorStore::delete_by_filter`]);
//! the only id-native operation is [`VectorStore::fetch`], which resolves
//! a caller-supplied reference back into a record.
//!
//! # Index discipline
//!
//! Every payload path used in a filter must be indexed. Implementations
//! validate predicates against their known index set and fail with
//! `IndexRequired` rather than letting an unindexed scan through.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::models::{Record, ScoredRecord, StoredRecord};

/// Payload paths that carry a keyword index on every collection. These
/// are exactly the fields the core uses as filter predicates.
pub const INDEXED_META_FIELDS: &[&str] = &[
    "meta.doc_id",
    "meta.category",
    "meta.status",
    "meta.repo",
    "meta.version",
    "meta.file_path",
    "meta.hash_content",
    "meta.metadata_hash",
    "meta.chunk_id",
    "meta.chunk_index",
    "meta.parent_doc_id",
    "meta.is_chunk",
];

/// A point ready to be written: generated reference, payload halves, and
/// the embedding vector.
#[derive(Debug, Clone)]
pub struct PointPayload {
    pub point_ref: String,
    pub content: String,
    pub meta: Value,
    pub vector: Vec<f32>,
}

impl PointPayload {
    /// Build a writable point from a record, generating a fresh
    /// backend-native reference. The record must carry its vector.
    pub fn from_record(record: &Record) -> Result<PointPayload> {
        let vector = record
            .vector()
            .ok_or_else(|| {
                VaultError::Internal("attempted to write a record without a vector".into())
            })?
            .to_vec();
        Ok(PointPayload {
            point_ref: Uuid::new_v4().to_string(),
            content: record.content().to_string(),
            meta: record.to_meta(),
            vector,
        })
    }

    /// The full backend payload object `{content, meta}`.
    pub fn payload_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("content".into(), Value::String(self.content.clone()));
        obj.insert("meta".into(), self.meta.clone());
        Value::Object(obj)
    }
}

/// Abstract vector backend.
///
/// All operations are async and must be safe to call from concurrent
/// tool invocations sharing one client.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Create keyword payload indexes for the given paths; returns the
    /// paths that were newly created.
    async fn ensure_payload_indexes(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<Vec<String>>;

    /// Insert or overwrite points.
    async fn upsert(&self, collection: &str, points: Vec<PointPayload>) -> Result<()>;

    /// Retrieve records matching a filter, up to `limit`, ordered by
    /// point reference.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoredRecord>>;

    /// Vector similarity search with an optional payload filter.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// Resolve a caller-supplied point reference to a record.
    async fn fetch(&self, collection: &str, point_ref: &str) -> Result<Option<StoredRecord>>;

    /// Merge `patch` into the `meta` payload of every point matching the
    /// filter. Returns the number of points matched.
    async fn set_meta_by_filter(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Map<String, Value>,
    ) -> Result<u64>;

    /// Delete every point matching the filter. Returns the number of
    /// points matched.
    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Count points, optionally restricted by a filter.
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64>;
}

/// Cosine similarity between two vectors; 0.0 on mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
