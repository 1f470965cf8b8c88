//! Shared service context.
//!
//! One [`ServiceContext`] is built at startup and threaded explicitly
//! through every component: the backend client, the embedder, the
//! similarity probe, and the resolved configuration. There is no
//! module-level state; initialization and teardown are bounded by the
//! service lifecycle.

use std::sync::Arc;

use crate::config::Config;
use crate::dedup::{NoSimilarity, SimilarityProbe};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::{VectorStore, INDEXED_META_FIELDS};

/// Which collection a tool call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTarget {
    Docs,
    Code,
}

/// Shared handles for one service process. Cheap to clone; all fields
/// are behind `Arc`.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub similarity: Arc<dyn SimilarityProbe>,
    pub config: Arc<Config>,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, config: Config) -> Self {
        Self {
            store,
            embedder,
            similarity: Arc::new(NoSimilarity),
            config: Arc::new(config),
        }
    }

    pub fn collection_for(&self, target: ContentTarget) -> &str {
        match target {
            ContentTarget::Docs => &self.config.docs_collection,
            ContentTarget::Code => &self.config.code_collection,
        }
    }

    pub fn collections(&self) -> [&str; 2] {
        [&self.config.docs_collection, &self.config.code_collection]
    }

    /// Create both collections and their payload indexes. Idempotent;
    /// run at startup before the server accepts requests.
    pub async fn bootstrap(&self) -> Result<()> {
        let dims = self.config.embedding.dims;
        for collection in self.collections() {
            self.store.ensure_collection(collection, dims).await?;
            let created = self
                .store
                .ensure_payload_indexes(collection, INDEXED_META_FIELDS)
                .await?;
            if !created.is_empty() {
                tracing::info!(collection, created = created.len(), "created payload indexes");
            }
        }
        Ok(())
    }
}
