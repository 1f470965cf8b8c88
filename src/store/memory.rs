//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! Uses `BTreeMap` behind `std::sync::RwLock`; vector search is
//! brute-force cosine similarity. The index discipline is enforced the
//! same way the real backend enforces it: filters over paths that were
//! never indexed fail with `IndexRequired`, which keeps the boundary
//! behavior testable without a running backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::models::{Record, ScoredRecord, StoredRecord};

use super::{cosine_similarity, PointPayload, VectorStore, INDEXED_META_FIELDS};

struct MemPoint {
    payload: Value,
    vector: Vec<f32>,
}

struct Collection {
    points: BTreeMap<String, MemPoint>,
    indexed: HashSet<String>,
    #[allow(dead_code)]
    dims: usize,
}

/// In-memory vector store.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with the given collections pre-created and the standard
    /// payload index set in place. Convenience for tests.
    pub fn with_collections(names: &[&str], dims: usize) -> Self {
        let store = Self::new();
        {
            let mut guard = store.collections.write().unwrap();
            for name in names {
                guard.insert(
                    name.to_string(),
                    Collection {
                        points: BTreeMap::new(),
                        indexed: INDEXED_META_FIELDS.iter().map(|s| s.to_string()).collect(),
                        dims,
                    },
                );
            }
        }
        store
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&Collection) -> Result<T>,
    ) -> Result<T> {
        let guard = self.collections.read().unwrap();
        let col = guard
            .get(collection)
            .ok_or_else(|| VaultError::NotFound(format!("collection '{collection}'")))?;
        f(col)
    }

    fn with_collection_mut<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.collections.write().unwrap();
        let col = guard
            .get_mut(collection)
            .ok_or_else(|| VaultError::NotFound(format!("collection '{collection}'")))?;
        f(col)
    }
}

fn validate_filter(filter: Option<&Filter>, indexed: &HashSet<String>) -> Result<()> {
    if let Some(f) = filter {
        f.validate_indexed(indexed)?;
    }
    Ok(())
}

fn to_stored(point_ref: &str, point: &MemPoint, with_vector: bool) -> Result<StoredRecord> {
    let content = point.payload["content"].as_str().unwrap_or_default().to_string();
    let vector = with_vector.then(|| point.vector.clone());
    let record = Record::from_meta(&point.payload["meta"], content, vector)?;
    Ok(StoredRecord {
        point_ref: point_ref.to_string(),
        record,
    })
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut guard = self.collections.write().unwrap();
        guard.entry(collection.to_string()).or_insert_with(|| Collection {
            points: BTreeMap::new(),
            indexed: HashSet::new(),
            dims,
        });
        Ok(())
    }

    async fn ensure_payload_indexes(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<Vec<String>> {
        self.with_collection_mut(collection, |col| {
            let mut created = Vec::new();
            for field in fields {
                if col.indexed.insert(field.to_string()) {
                    created.push(field.to_string());
                }
            }
            Ok(created)
        })
    }

    async fn upsert(&self, collection: &str, points: Vec<PointPayload>) -> Result<()> {
        self.with_collection_mut(collection, |col| {
            for p in points {
                let payload = p.payload_json();
                col.points.insert(
                    p.point_ref,
                    MemPoint {
                        payload,
                        vector: p.vector,
                    },
                );
            }
            Ok(())
        })
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoredRecord>> {
        self.with_collection(collection, |col| {
            validate_filter(filter, &col.indexed)?;
            let mut out = Vec::new();
            for (point_ref, point) in &col.points {
                if filter.map(|f| f.matches(&point.payload)).unwrap_or(true) {
                    out.push(to_stored(point_ref, point, with_vectors)?);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        self.with_collection(collection, |col| {
            validate_filter(filter, &col.indexed)?;
            let mut hits: Vec<ScoredRecord> = Vec::new();
            for (point_ref, point) in &col.points {
                if filter.map(|f| f.matches(&point.payload)).unwrap_or(true) {
                    let score = cosine_similarity(vector, &point.vector);
                    hits.push(ScoredRecord {
                        stored: to_stored(point_ref, point, false)?,
                        score,
                    });
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(top_k);
            Ok(hits)
        })
    }

    async fn fetch(&self, collection: &str, point_ref: &str) -> Result<Option<StoredRecord>> {
        self.with_collection(collection, |col| {
            col.points
                .get(point_ref)
                .map(|p| to_stored(point_ref, p, true))
                .transpose()
        })
    }

    async fn set_meta_by_filter(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Map<String, Value>,
    ) -> Result<u64> {
        self.with_collection_mut(collection, |col| {
            filter.validate_indexed(&col.indexed)?;
            let mut matched = 0u64;
            for point in col.points.values_mut() {
                if filter.matches(&point.payload) {
                    if let Some(meta) = point.payload.get_mut("meta").and_then(Value::as_object_mut)
                    {
                        for (k, v) in &patch {
                            meta.insert(k.clone(), v.clone());
                        }
                    }
                    matched += 1;
                }
            }
            Ok(matched)
        })
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.with_collection_mut(collection, |col| {
            filter.validate_indexed(&col.indexed)?;
            let before = col.points.len();
            col.points.retain(|_, p| !filter.matches(&p.payload));
            Ok((before - col.points.len()) as u64)
        })
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64> {
        self.with_collection(collection, |col| {
            validate_filter(filter, &col.indexed)?;
            let n = col
                .points
                .values()
                .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
                .count();
            Ok(n as u64)
        })
    }
}
