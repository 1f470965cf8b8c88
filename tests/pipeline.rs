//! End-to-end pipeline tests against the in-memory backend.
//!
//! Exercises the ingestion controller through the same surfaces the
//! tools use: duplicate classification, versioned deprecation, chunked
//! incremental updates with minimal re-embedding, and the export/import
//! and backup/restore round trips.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use kbvault::bulk::{export_documents, import_documents, ImportPolicy};
use kbvault::config::Config;
use kbvault::context::{ContentTarget, ServiceContext};
use kbvault::dedup::StorageAction;
use kbvault::embedding::{Embedder, HashEmbedder};
use kbvault::error::Result;
use kbvault::filter::Filter;
use kbvault::ingest::{ingest_document, ChunkingOptions, IngestOutcome, IngestRequest};
use kbvault::metadata::EnvelopeFragment;
use kbvault::models::Category;
use kbvault::store::memory::MemoryStore;
use kbvault::store::VectorStore;

const DIMS: usize = 16;

/// Embedder wrapper that counts calls and texts, for the minimal
/// re-embedding property.
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

struct Harness {
    ctx: ServiceContext,
    embedder: Arc<CountingEmbedder>,
}

fn harness() -> Harness {
    let config = Config::in_memory(DIMS);
    let store = MemoryStore::with_collections(
        &[config.docs_collection.as_str(), config.code_collection.as_str()],
        DIMS,
    );
    let embedder = Arc::new(CountingEmbedder::new());
    let ctx = ServiceContext::new(Arc::new(store), embedder.clone(), config);
    Harness { ctx, embedder }
}

fn fragment(doc_id: &str) -> EnvelopeFragment {
    EnvelopeFragment {
        doc_id: doc_id.into(),
        category: Some(Category::Other),
        ..Default::default()
    }
}

async fn add(h: &Harness, doc_id: &str, content: &str) -> IngestOutcome {
    let collection = h.ctx.collection_for(ContentTarget::Docs).to_string();
    ingest_document(
        &h.ctx,
        &collection,
        IngestRequest {
            content: content.into(),
            fragment: fragment(doc_id),
            chunking: None,
        },
    )
    .await
    .unwrap()
}

async fn add_chunked(h: &Harness, doc_id: &str, content: &str) -> IngestOutcome {
    let collection = h.ctx.collection_for(ContentTarget::Docs).to_string();
    ingest_document(
        &h.ctx,
        &collection,
        IngestRequest {
            content: content.into(),
            fragment: fragment(doc_id),
            chunking: Some(ChunkingOptions::new(200, 20).unwrap()),
        },
    )
    .await
    .unwrap()
}

fn doc_outcome(outcome: IngestOutcome) -> kbvault::ingest::DocumentOutcome {
    match outcome {
        IngestOutcome::Document(d) => d,
        IngestOutcome::Chunked(_) => panic!("expected a document outcome"),
    }
}

fn chunked_outcome(outcome: IngestOutcome) -> kbvault::ingest::ChunkedOutcome {
    match outcome {
        IngestOutcome::Chunked(c) => c,
        IngestOutcome::Document(_) => panic!("expected a chunked outcome"),
    }
}

async fn docs_count(h: &Harness, filter: Option<&Filter>) -> u64 {
    h.ctx
        .store
        .count(h.ctx.collection_for(ContentTarget::Docs), filter)
        .await
        .unwrap()
}

/// A ~700-character paragraph whose tail is independent of the marker,
/// so edits to the marker leave the chunk-overlap window unchanged.
fn para(marker: &str) -> String {
    let body = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod \
                tempor incididunt ut labore et dolore magna. "
        .repeat(6);
    format!("{marker} {body}")
}

fn three_para_doc() -> String {
    [para("Alpha one."), para("Beta two."), para("Gamma three.")].join("\n\n")
}

// ── boundary scenario 1: exact duplicate ────────────────────────────────

#[tokio::test]
async fn exact_duplicate_is_skipped() {
    let h = harness();

    let first = doc_outcome(add(&h, "A", "hello").await);
    assert_eq!(first.action, StorageAction::Store);
    assert_eq!(first.duplicate_level.as_number(), 4);
    assert!(first.point_ref.is_some());

    let second = doc_outcome(add(&h, "A", "hello").await);
    assert_eq!(second.action, StorageAction::Skip);
    assert_eq!(second.duplicate_level.as_number(), 1);
    assert!(second.point_ref.is_none());

    // Store size unchanged, and no embedding was spent on the re-add.
    assert_eq!(docs_count(&h, None).await, 1);
    assert_eq!(h.embedder.texts.load(Ordering::SeqCst), 1);
}

// ── boundary scenario 2: content update ─────────────────────────────────

#[tokio::test]
async fn content_update_deprecates_prior_version() {
    let h = harness();

    add(&h, "A", "v1").await;
    let second = doc_outcome(add(&h, "A", "v2").await);
    assert_eq!(second.action, StorageAction::Update);
    assert_eq!(second.duplicate_level.as_number(), 2);
    assert_eq!(second.deprecated, 1);

    let active_filter = Filter::and(vec![
        Filter::eq("meta.doc_id", "A"),
        Filter::eq("meta.status", "active"),
    ]);
    let active = h
        .ctx
        .store
        .scroll(
            h.ctx.collection_for(ContentTarget::Docs),
            Some(&active_filter),
            100,
            false,
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content(), "v2");

    let deprecated_filter = Filter::and(vec![
        Filter::eq("meta.doc_id", "A"),
        Filter::eq("meta.status", "deprecated"),
    ]);
    let deprecated = h
        .ctx
        .store
        .scroll(
            h.ctx.collection_for(ContentTarget::Docs),
            Some(&deprecated_filter),
            100,
            false,
        )
        .await
        .unwrap();
    assert_eq!(deprecated.len(), 1);
    assert_eq!(deprecated[0].content(), "v1");
}

// ── boundary scenario 3: chunked partial update ─────────────────────────

#[tokio::test]
async fn chunked_partial_update_reembeds_only_changed_chunk() {
    let h = harness();

    let initial = chunked_outcome(add_chunked(&h, "doc", &three_para_doc()).await);
    assert_eq!(initial.counts.total_chunks, 3);
    assert_eq!(initial.counts.added, 3);
    let calls_after_initial = h.embedder.calls.load(Ordering::SeqCst);
    let texts_after_initial = h.embedder.texts.load(Ordering::SeqCst);
    assert_eq!(texts_after_initial, 3);

    // Modify only the marker of the middle paragraph; the paragraph
    // tail (the overlap window of the next chunk) stays identical.
    let modified = [para("Alpha one."), para("Beta CHANGED."), para("Gamma three.")].join("\n\n");
    let update = chunked_outcome(add_chunked(&h, "doc", &modified).await);

    assert_eq!(update.counts.unchanged, 2);
    assert_eq!(update.counts.changed, 1);
    assert_eq!(update.counts.added, 0);
    assert_eq!(update.counts.removed, 0);

    // Exactly one embedding call with exactly one text.
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls_after_initial + 1);
    assert_eq!(h.embedder.texts.load(Ordering::SeqCst), texts_after_initial + 1);
}

// ── boundary scenario 4: chunk growth ───────────────────────────────────

#[tokio::test]
async fn chunk_growth_adds_tail_chunk() {
    let h = harness();
    add_chunked(&h, "doc", &three_para_doc()).await;

    let grown = format!("{}\n\n{}", three_para_doc(), para("Delta four."));
    let update = chunked_outcome(add_chunked(&h, "doc", &grown).await);

    assert_eq!(update.counts.unchanged, 3);
    assert_eq!(update.counts.changed, 0);
    assert_eq!(update.counts.added, 1);
    assert_eq!(update.counts.removed, 0);
    assert_eq!(update.chunk_ids, vec!["doc_chunk_3".to_string()]);
}

// ── boundary scenario 5: chunk shrink ───────────────────────────────────

#[tokio::test]
async fn chunk_shrink_deprecates_overflow_chunk() {
    let h = harness();
    add_chunked(&h, "doc", &three_para_doc()).await;

    let shrunk = [para("Alpha one."), para("Beta two.")].join("\n\n");
    let update = chunked_outcome(add_chunked(&h, "doc", &shrunk).await);

    assert_eq!(update.counts.unchanged, 2);
    assert_eq!(update.counts.changed, 0);
    assert_eq!(update.counts.added, 0);
    assert_eq!(update.counts.removed, 1);

    // Chunk index 2 is deprecated, not deleted.
    let deprecated = h
        .ctx
        .store
        .scroll(
            h.ctx.collection_for(ContentTarget::Docs),
            Some(&Filter::and(vec![
                Filter::eq("meta.parent_doc_id", "doc"),
                Filter::eq("meta.status", "deprecated"),
            ])),
            100,
            false,
        )
        .await
        .unwrap();
    assert_eq!(deprecated.len(), 1);
    assert_eq!(
        deprecated[0].record.chunk_identity().unwrap().chunk_index,
        2
    );

    // Active chunks form a contiguous [0, 2) range.
    let active = h
        .ctx
        .store
        .scroll(
            h.ctx.collection_for(ContentTarget::Docs),
            Some(&Filter::and(vec![
                Filter::eq("meta.parent_doc_id", "doc"),
                Filter::eq("meta.status", "active"),
            ])),
            100,
            false,
        )
        .await
        .unwrap();
    let mut indices: Vec<usize> = active
        .iter()
        .map(|r| r.record.chunk_identity().unwrap().chunk_index)
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1]);
}

// ── boundary scenario 6: filter over unindexed field ────────────────────

#[tokio::test]
async fn unindexed_filter_field_is_rejected() {
    let h = harness();
    add(&h, "A", "hello").await;

    let err = h
        .ctx
        .store
        .scroll(
            h.ctx.collection_for(ContentTarget::Docs),
            Some(&Filter::eq("meta.unindexed", "x")),
            10,
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "IndexRequired");
}

// ── boundary scenario 7: deprecation without hash ───────────────────────

#[tokio::test]
async fn deprecation_without_hash_is_rejected() {
    let h = harness();
    add(&h, "A", "hello").await;

    let err = kbvault::versioning::deprecate_by_hash(
        h.ctx.store.as_ref(),
        h.ctx.collection_for(ContentTarget::Docs),
        "",
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidInput");

    // Store unchanged: the record is still active.
    let active = docs_count(&h, Some(&Filter::eq("meta.status", "active"))).await;
    assert_eq!(active, 1);
}

// ── invariants ──────────────────────────────────────────────────────────

#[tokio::test]
async fn active_uniqueness_holds_across_update_chains() {
    let h = harness();
    for version in ["v1", "v2", "v3", "v4"] {
        add(&h, "A", version).await;
    }

    let active = docs_count(
        &h,
        Some(&Filter::and(vec![
            Filter::eq("meta.doc_id", "A"),
            Filter::eq("meta.status", "active"),
        ])),
    )
    .await;
    assert_eq!(active, 1);

    // Every superseded version is retained as deprecated.
    let deprecated = docs_count(
        &h,
        Some(&Filter::and(vec![
            Filter::eq("meta.doc_id", "A"),
            Filter::eq("meta.status", "deprecated"),
        ])),
    )
    .await;
    assert_eq!(deprecated, 3);
}

#[tokio::test]
async fn stored_envelopes_are_sound() {
    let h = harness();
    add(&h, "A", "first document body\n").await;
    add(&h, "B", "second document body\r\nwith windows line endings\r\n").await;

    let records = h
        .ctx
        .store
        .scroll(h.ctx.collection_for(ContentTarget::Docs), None, 100, false)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(
            kbvault::hash::hash_content(record.content()),
            record.envelope().hash_content,
        );
    }
}

// ── round-trip laws ─────────────────────────────────────────────────────

fn export_key(entry: &serde_json::Value) -> (String, String, String) {
    (
        entry["meta"]["doc_id"].as_str().unwrap_or("").to_string(),
        entry["meta"]["hash_content"].as_str().unwrap_or("").to_string(),
        entry["meta"]["status"].as_str().unwrap_or("").to_string(),
    )
}

#[tokio::test]
async fn export_import_round_trip_preserves_store() {
    let source = harness();
    add(&source, "A", "alpha content").await;
    add(&source, "B", "beta content").await;
    add(&source, "B", "beta content, revised").await; // creates a deprecated version

    let exported = export_documents(&source.ctx, None, true).await.unwrap();
    let documents = exported["documents"].as_array().unwrap().clone();
    assert_eq!(documents.len(), 3);

    let fresh = harness();
    let result = import_documents(&fresh.ctx, &documents, ImportPolicy::Skip, ContentTarget::Docs)
        .await
        .unwrap();
    assert_eq!(result["imported"], json!(3));
    assert_eq!(result["errors"].as_array().unwrap().len(), 0);

    let re_exported = export_documents(&fresh.ctx, None, true).await.unwrap();
    let mut original: Vec<_> = documents.clone();
    let mut restored: Vec<_> = re_exported["documents"].as_array().unwrap().clone();
    original.sort_by_key(export_key);
    restored.sort_by_key(export_key);

    assert_eq!(original.len(), restored.len());
    for (a, b) in original.iter().zip(restored.iter()) {
        assert_eq!(a["content"], b["content"]);
        assert_eq!(a["meta"], b["meta"]);
        // Embeddings carried through the import are preserved verbatim.
        assert_eq!(a["embedding"], b["embedding"]);
    }
}

#[tokio::test]
async fn backup_restore_round_trip() {
    use kbvault::backup::{create_backup, list_backups, restore_backup};

    let source = harness();
    add(&source, "A", "alpha content").await;
    add(&source, "B", "beta content").await;

    let tmp = tempfile::TempDir::new().unwrap();
    let created = create_backup(&source.ctx, ContentTarget::Docs, Some(tmp.path()), true, None)
        .await
        .unwrap();
    assert_eq!(created["document_count"], json!(2));
    let backup_path = created["backup_path"].as_str().unwrap().to_string();

    let listing = list_backups(&source.ctx, Some(tmp.path())).unwrap();
    assert_eq!(listing["count"], json!(1));

    let fresh = harness();
    let restored = restore_backup(&fresh.ctx, &backup_path, ImportPolicy::Skip)
        .await
        .unwrap();
    assert_eq!(restored["imported"], json!(2));

    assert_eq!(docs_count(&fresh, None).await, 2);

    // Vectors survive the round trip byte-for-byte.
    let originals = source
        .ctx
        .store
        .scroll(source.ctx.collection_for(ContentTarget::Docs), None, 100, true)
        .await
        .unwrap();
    let restored_records = fresh
        .ctx
        .store
        .scroll(fresh.ctx.collection_for(ContentTarget::Docs), None, 100, true)
        .await
        .unwrap();
    for original in &originals {
        let twin = restored_records
            .iter()
            .find(|r| r.envelope().doc_id == original.envelope().doc_id)
            .expect("restored record");
        assert_eq!(original.record.vector(), twin.record.vector());
    }
}

#[tokio::test]
async fn restore_rejects_tampered_backup() {
    use kbvault::backup::{create_backup, restore_backup};

    let source = harness();
    add(&source, "A", "alpha content").await;

    let tmp = tempfile::TempDir::new().unwrap();
    let created = create_backup(&source.ctx, ContentTarget::Docs, Some(tmp.path()), false, None)
        .await
        .unwrap();
    let backup_path = created["backup_path"].as_str().unwrap().to_string();

    // Corrupt the documents file after the manifest was written.
    let documents_file = std::path::Path::new(&backup_path).join("documents.json");
    std::fs::write(&documents_file, b"[]").unwrap();

    let fresh = harness();
    let err = restore_backup(&fresh.ctx, &backup_path, ImportPolicy::Skip)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "IntegrityMismatch");
    assert_eq!(docs_count(&fresh, None).await, 0);
}

#[tokio::test]
async fn import_policy_error_fails_on_existing_doc_id() {
    let source = harness();
    add(&source, "A", "alpha content").await;

    let exported = export_documents(&source.ctx, None, false).await.unwrap();
    let documents = exported["documents"].as_array().unwrap().clone();

    let err = import_documents(&source.ctx, &documents, ImportPolicy::Error, ContentTarget::Docs)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Conflict");
}

#[tokio::test]
async fn import_policy_update_runs_classifier() {
    let source = harness();
    add(&source, "A", "alpha content").await;

    let exported = export_documents(&source.ctx, None, true).await.unwrap();
    let documents = exported["documents"].as_array().unwrap().clone();

    // Re-import the identical record: the classifier sees an exact
    // duplicate and skips it.
    let result = import_documents(&source.ctx, &documents, ImportPolicy::Update, ContentTarget::Docs)
        .await
        .unwrap();
    assert_eq!(result["imported"], json!(0));
    assert_eq!(result["skipped"], json!(1));
    assert_eq!(docs_count(&source, None).await, 1);
}
