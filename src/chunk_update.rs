//! Chunk diff engine for incremental updates.
//!
//! Aligns the stored chunk set of a document against a freshly chunked
//! version of its new content and classifies every index:
//!
//! | old | new | hashes equal | class |
//! |-----|-----|--------------|-------|
//! | yes | yes | yes | unchanged — keep, no embedding |
//! | yes | yes | no  | changed — deprecate old, embed new |
//! | no  | yes | —   | added — embed new |
//! | yes | no  | —   | removed — deprecate old |
//!
//! The engine is pure; the ingestion controller applies the plan. Only
//! `changed` and `added` chunks ever reach the embedder, which is the
//! whole point of chunked storage: an update re-embeds exactly the
//! chunks whose content moved.

use std::collections::BTreeMap;

use crate::chunker::ChunkPiece;
use crate::models::StoredRecord;

/// The classified plan for one chunked update.
#[derive(Debug, Default)]
pub struct ChunkDiff {
    /// Old records kept as-is.
    pub unchanged: Vec<StoredRecord>,
    /// New piece paired with the old record it replaces.
    pub changed: Vec<(ChunkPiece, StoredRecord)>,
    /// New pieces with no old counterpart.
    pub added: Vec<ChunkPiece>,
    /// Old records with no new counterpart.
    pub removed: Vec<StoredRecord>,
}

/// Per-class counts included in the controller's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCounts {
    pub total_chunks: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
}

impl ChunkDiff {
    pub fn counts(&self, total_chunks: usize) -> ChunkCounts {
        ChunkCounts {
            total_chunks,
            unchanged: self.unchanged.len(),
            changed: self.changed.len(),
            added: self.added.len(),
            removed: self.removed.len(),
        }
    }
}

/// Compare existing chunk records with the new chunk set, aligning by
/// `chunk_index`. Existing records without a chunk identity are ignored.
pub fn diff_chunks(existing: &[StoredRecord], new_pieces: &[ChunkPiece]) -> ChunkDiff {
    let mut old_by_index: BTreeMap<usize, &StoredRecord> = BTreeMap::new();
    for record in existing {
        if let Some(identity) = record.record.chunk_identity() {
            old_by_index.insert(identity.chunk_index, record);
        }
    }

    let mut diff = ChunkDiff::default();

    for piece in new_pieces {
        match old_by_index.remove(&piece.index) {
            Some(old) => {
                if old.envelope().hash_content == piece.hash_content {
                    diff.unchanged.push((*old).clone());
                } else {
                    diff.changed.push((piece.clone(), (*old).clone()));
                }
            }
            None => diff.added.push(piece.clone()),
        }
    }

    // Whatever is left in the map has no new counterpart.
    diff.removed = old_by_index.into_values().cloned().collect();
    diff
}
