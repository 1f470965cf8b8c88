//! Ingestion controller.
//!
//! Orchestrates the full write path: build the envelope, fingerprint the
//! content, classify against existing records, and perform the chosen
//! action, calling the embedder only when something will actually be
//! written. For chunked documents the controller runs the chunker and
//! the diff engine instead of the whole-document classifier, so an
//! update re-embeds only the chunks whose content changed.
//!
//! # Write pipeline
//!
//! ```text
//! content ──▶ normalize+hash ──▶ envelope ──▶ classify
//!                                               │
//!           skip ◀── level 1                    │
//!           update ◀─ level 2: deprecate old, embed, write
//!           warn  ◀── level 3: embed, write (flagged)
//!           store ◀── level 4: embed, write
//! ```
//!
//! Ordering: within one write, the deprecation of the prior version is
//! issued strictly before the replacement is written; in a chunked
//! update the same holds per chunk index.
//!
//! # Failure policy
//!
//! The controller reports the first failing sub-step and does not roll
//! back earlier ones. A deprecation that succeeds before a failed write
//! leaves the prior version deprecated with no active replacement; the
//! caller retries the ingestion.

use std::collections::HashSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::chunk_update::{diff_chunks, ChunkCounts};
use crate::chunker::{chunk_content, ChunkPiece};
use crate::context::{ContentTarget, ServiceContext};
use crate::dedup::{classify, Candidate, DuplicateLevel, StorageAction};
use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::hash;
use crate::metadata::{build_chunk_envelope, build_document_envelope, EnvelopeFragment};
use crate::models::{Record, Status, StoredRecord};
use crate::store::PointPayload;
use crate::versioning::deprecate_by_hash;

/// Upper bound on records pre-queried for classification or diffing.
const EXISTING_SCAN_LIMIT: usize = 10_000;

/// Chunking parameters, validated at construction.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingOptions {
    pub const SIZE_RANGE: std::ops::RangeInclusive<usize> = 128..=2048;
    pub const OVERLAP_RANGE: std::ops::RangeInclusive<usize> = 0..=256;

    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if !Self::SIZE_RANGE.contains(&chunk_size) {
            return Err(VaultError::InvalidInput(format!(
                "chunk_size must be in [{}, {}], got {chunk_size}",
                Self::SIZE_RANGE.start(),
                Self::SIZE_RANGE.end()
            )));
        }
        if !Self::OVERLAP_RANGE.contains(&chunk_overlap) {
            return Err(VaultError::InvalidInput(format!(
                "chunk_overlap must be in [{}, {}], got {chunk_overlap}",
                Self::OVERLAP_RANGE.start(),
                Self::OVERLAP_RANGE.end()
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// One write request, already reduced to content + envelope fragment.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub content: String,
    pub fragment: EnvelopeFragment,
    pub chunking: Option<ChunkingOptions>,
}

/// Report for an unchunked write.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub doc_id: String,
    pub action: StorageAction,
    pub duplicate_level: DuplicateLevel,
    /// Records deprecated by this write.
    pub deprecated: u64,
    /// Backend reference of the new record, when one was written.
    pub point_ref: Option<String>,
    pub reason: String,
    /// Set when the classifier flagged semantic similarity (level 3).
    pub similarity_warning: Option<f32>,
}

impl DocumentOutcome {
    pub fn to_response(&self) -> Value {
        let mut resp = json!({
            "status": "success",
            "doc_id": self.doc_id,
            "action": self.action.as_str(),
            "duplicate_level": self.duplicate_level.as_number(),
            "deprecated": self.deprecated,
            "reason": self.reason,
        });
        if let Some(point_ref) = &self.point_ref {
            resp["point_reference"] = json!(point_ref);
        }
        if let Some(similarity) = self.similarity_warning {
            resp["similarity_warning"] = json!(similarity);
        }
        resp
    }
}

/// Report for a chunked write.
#[derive(Debug, Clone)]
pub struct ChunkedOutcome {
    pub doc_id: String,
    pub counts: ChunkCounts,
    /// Chunk ids written by this call (changed + added).
    pub chunk_ids: Vec<String>,
}

impl ChunkedOutcome {
    pub fn to_response(&self) -> Value {
        json!({
            "status": "success",
            "doc_id": self.doc_id,
            "chunked": true,
            "total_chunks": self.counts.total_chunks,
            "unchanged": self.counts.unchanged,
            "changed": self.counts.changed,
            "added": self.counts.added,
            "removed": self.counts.removed,
            "chunk_ids": self.chunk_ids,
        })
    }
}

/// Result of one ingestion call.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Document(DocumentOutcome),
    Chunked(ChunkedOutcome),
}

impl IngestOutcome {
    pub fn to_response(&self) -> Value {
        match self {
            IngestOutcome::Document(d) => d.to_response(),
            IngestOutcome::Chunked(c) => c.to_response(),
        }
    }
}

/// Ingest one document into the given collection.
pub async fn ingest_document(
    ctx: &ServiceContext,
    collection: &str,
    request: IngestRequest,
) -> Result<IngestOutcome> {
    match request.chunking {
        Some(options) => ingest_chunked(ctx, collection, &request, options)
            .await
            .map(IngestOutcome::Chunked),
        None => ingest_whole(ctx, collection, &request)
            .await
            .map(IngestOutcome::Document),
    }
}

async fn ingest_whole(
    ctx: &ServiceContext,
    collection: &str,
    request: &IngestRequest,
) -> Result<DocumentOutcome> {
    let hash_content = hash::hash_content(&request.content);
    let envelope = build_document_envelope(&request.fragment, &hash_content)?;
    let record = Record::Whole {
        envelope,
        content: request.content.clone(),
        vector: None,
    };
    ingest_prepared(ctx, collection, record).await
}

/// Classify a fully-built record against the store and apply the chosen
/// action. Records arriving without a vector are embedded before the
/// write; records that carry one (restored from a backup) keep it.
///
/// This is the shared trunk of the unchunked add path and the
/// import/restore path, which must preserve envelopes verbatim.
pub(crate) async fn ingest_prepared(
    ctx: &ServiceContext,
    collection: &str,
    mut record: Record,
) -> Result<DocumentOutcome> {
    let doc_id = record.envelope().doc_id.clone();
    if doc_id.trim().is_empty() {
        return Err(VaultError::InvalidMetadata(
            "doc_id is required and cannot be empty".into(),
        ));
    }

    let existing = ctx
        .store
        .scroll(
            collection,
            Some(&Filter::eq("meta.doc_id", doc_id.clone())),
            EXISTING_SCAN_LIMIT,
            false,
        )
        .await?;

    let candidate = Candidate {
        doc_id: &doc_id,
        hash_content: &record.envelope().hash_content,
        metadata_hash: &record.envelope().metadata_hash,
        content: record.content(),
    };
    let classification = classify(&candidate, &existing, ctx.similarity.as_ref());

    let mut deprecated = 0u64;
    let mut point_ref = None;

    match classification.action {
        StorageAction::Skip => {}
        StorageAction::Update => {
            let matched = classification.matched.as_ref().ok_or_else(|| {
                VaultError::Internal("update classification without matched record".into())
            })?;
            deprecated =
                deprecate_by_hash(ctx.store.as_ref(), collection, &matched.hash_content).await?;
            point_ref = Some(write_record(ctx, collection, &mut record).await?);
            enforce_active_uniqueness(ctx, collection, &doc_id).await;
        }
        StorageAction::Warn | StorageAction::Store => {
            point_ref = Some(write_record(ctx, collection, &mut record).await?);
        }
    }

    Ok(DocumentOutcome {
        doc_id,
        action: classification.action,
        duplicate_level: classification.level,
        deprecated,
        point_ref,
        reason: classification.reason,
        similarity_warning: classification.similarity,
    })
}

/// Embed (when needed) and upsert one record; returns its reference.
pub(crate) async fn write_record(
    ctx: &ServiceContext,
    collection: &str,
    record: &mut Record,
) -> Result<String> {
    if record.vector().is_none() {
        let vectors = ctx.embedder.embed(&[record.content().to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::EmbeddingFailure("embedder returned no vectors".into()))?;
        record.set_vector(vector);
    }
    let point = PointPayload::from_record(record)?;
    let point_ref = point.point_ref.clone();
    ctx.store.upsert(collection, vec![point]).await?;
    Ok(point_ref)
}

async fn ingest_chunked(
    ctx: &ServiceContext,
    collection: &str,
    request: &IngestRequest,
    options: ChunkingOptions,
) -> Result<ChunkedOutcome> {
    if request.fragment.doc_id.trim().is_empty() {
        return Err(VaultError::InvalidMetadata(
            "doc_id is required and cannot be empty".into(),
        ));
    }
    let doc_id = request.fragment.doc_id.clone();

    let pieces = chunk_content(&request.content, options.chunk_size, options.chunk_overlap);
    if pieces.is_empty() {
        return Err(VaultError::InvalidInput(
            "content is empty; nothing to chunk".into(),
        ));
    }

    let existing = ctx
        .store
        .scroll(
            collection,
            Some(&Filter::and(vec![
                Filter::eq("meta.parent_doc_id", doc_id.clone()),
                Filter::eq("meta.status", Status::Active.as_str()),
            ])),
            EXISTING_SCAN_LIMIT,
            false,
        )
        .await?;

    let diff = diff_chunks(&existing, &pieces);
    let counts = diff.counts(pieces.len());

    // Deprecate before any replacement becomes observable.
    for (_, old) in &diff.changed {
        deprecate_by_hash(ctx.store.as_ref(), collection, &old.envelope().hash_content).await?;
    }
    for old in &diff.removed {
        deprecate_by_hash(ctx.store.as_ref(), collection, &old.envelope().hash_content).await?;
    }

    // Embed exactly the changed + added chunks, one batch.
    let to_write: Vec<&ChunkPiece> = diff
        .changed
        .iter()
        .map(|(piece, _)| piece)
        .chain(diff.added.iter())
        .collect();

    let mut chunk_ids = Vec::with_capacity(to_write.len());
    if !to_write.is_empty() {
        let texts: Vec<String> = to_write.iter().map(|p| p.content.clone()).collect();
        let vectors = ctx.embedder.embed(&texts).await?;
        if vectors.len() != to_write.len() {
            return Err(VaultError::EmbeddingFailure(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                to_write.len()
            )));
        }

        let mut points = Vec::with_capacity(to_write.len());
        for (piece, vector) in to_write.iter().zip(vectors) {
            let (envelope, identity) = build_chunk_envelope(
                &request.fragment,
                &doc_id,
                piece.index,
                pieces.len(),
                &piece.hash_content,
            )?;
            chunk_ids.push(identity.chunk_id.clone());
            let record = Record::Chunk {
                envelope,
                identity,
                content: piece.content.clone(),
                vector: Some(vector),
            };
            points.push(PointPayload::from_record(&record)?);
        }
        ctx.store.upsert(collection, points).await?;
    }

    Ok(ChunkedOutcome {
        doc_id,
        counts,
        chunk_ids,
    })
}

/// Best-effort post-write check: concurrent writes to one `doc_id` can
/// briefly leave two active records; keep the newest and deprecate the
/// rest. Failures are logged, never surfaced.
async fn enforce_active_uniqueness(ctx: &ServiceContext, collection: &str, doc_id: &str) {
    let filter = Filter::and(vec![
        Filter::eq("meta.doc_id", doc_id),
        Filter::eq("meta.status", Status::Active.as_str()),
    ]);
    let mut active: Vec<StoredRecord> = match ctx
        .store
        .scroll(collection, Some(&filter), EXISTING_SCAN_LIMIT, false)
        .await
    {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(doc_id, error = %e, "active-uniqueness check failed");
            return;
        }
    };
    if active.len() <= 1 {
        return;
    }

    active.sort_by(|a, b| {
        b.envelope()
            .updated_at
            .cmp(&a.envelope().updated_at)
            .then_with(|| b.envelope().created_at.cmp(&a.envelope().created_at))
    });
    for stale in &active[1..] {
        if let Err(e) =
            deprecate_by_hash(ctx.store.as_ref(), collection, &stale.envelope().hash_content).await
        {
            tracing::warn!(doc_id, error = %e, "failed to deprecate stale active record");
        }
    }
}

// ── file and directory ingestion ────────────────────────────────────────

/// File extensions treated as code when scanning a directory.
const DEFAULT_CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".jsx", ".java", ".c", ".cpp", ".h", ".hpp", ".go", ".rs", ".rb",
    ".php", ".swift", ".kt", ".scala", ".sh", ".sql",
];

/// Paths skipped by default when scanning.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/target/**",
];

fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "sh" => "shell",
        "sql" => "sql",
        _ => return None,
    })
}

fn read_file(path: &str) -> Result<(String, String)> {
    let raw = std::fs::read(path)
        .map_err(|e| VaultError::InvalidInput(format!("cannot read file '{path}': {e}")))?;
    let content = String::from_utf8_lossy(&raw).into_owned();
    let file_hash = hash::hash_bytes(&raw);
    Ok((content, file_hash))
}

/// Ingest a text file into the documents collection.
pub async fn ingest_file(
    ctx: &ServiceContext,
    file_path: &str,
    metadata: &Value,
) -> Result<IngestOutcome> {
    let (content, file_hash) = read_file(file_path)?;
    let mut fragment = EnvelopeFragment::from_json(metadata, Some(file_path))?;
    fragment.file_hash.get_or_insert(file_hash);
    ingest_document(
        ctx,
        ctx.collection_for(ContentTarget::Docs),
        IngestRequest {
            content,
            fragment,
            chunking: None,
        },
    )
    .await
}

/// Ingest a code file into the code collection, tagging its language.
pub async fn ingest_code_file(
    ctx: &ServiceContext,
    file_path: &str,
    language: Option<&str>,
    metadata: &Value,
    chunking: Option<ChunkingOptions>,
) -> Result<IngestOutcome> {
    let (content, file_hash) = read_file(file_path)?;
    let mut fragment = EnvelopeFragment::from_json(metadata, Some(file_path))?;
    fragment.file_hash.get_or_insert(file_hash);

    let detected = language.map(String::from).or_else(|| {
        Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(language_for_extension)
            .map(String::from)
    });
    if let Some(lang) = detected {
        fragment
            .extra
            .entry("language".to_string())
            .or_insert_with(|| json!(lang));
    }

    ingest_document(
        ctx,
        ctx.collection_for(ContentTarget::Code),
        IngestRequest {
            content,
            fragment,
            chunking,
        },
    )
    .await
}

/// Report for a directory scan.
#[derive(Debug, Clone)]
pub struct DirectoryOutcome {
    pub total_files: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errors: Vec<Value>,
}

impl DirectoryOutcome {
    pub fn to_response(&self) -> Value {
        json!({
            "status": "success",
            "total_files": self.total_files,
            "indexed": self.indexed,
            "skipped": self.skipped,
            "errors": self.errors,
        })
    }
}

fn build_exclude_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDES
        .iter()
        .map(|s| s.to_string())
        .chain(patterns.iter().cloned())
    {
        // Bare names like "vendor" are treated as directory matches.
        let glob_pattern = if pattern.contains('/') || pattern.contains('*') {
            pattern
        } else {
            format!("**/{pattern}/**")
        };
        let glob = Glob::new(&glob_pattern)
            .map_err(|e| VaultError::InvalidInput(format!("bad exclude pattern: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| VaultError::InvalidInput(format!("bad exclude patterns: {e}")))
}

/// Recursively ingest all code files under a directory. Per-file errors
/// are collected, never abort the scan.
pub async fn ingest_code_directory(
    ctx: &ServiceContext,
    directory: &str,
    extensions: Option<Vec<String>>,
    exclude_patterns: Option<Vec<String>>,
    metadata: &Value,
) -> Result<DirectoryOutcome> {
    let root = Path::new(directory);
    if !root.is_dir() {
        return Err(VaultError::InvalidInput(format!(
            "'{directory}' is not a directory"
        )));
    }

    let wanted: HashSet<String> = extensions
        .unwrap_or_else(|| {
            DEFAULT_CODE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
        .into_iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    let excludes = build_exclude_set(&exclude_patterns.unwrap_or_default())?;

    let mut outcome = DirectoryOutcome {
        total_files: 0,
        indexed: 0,
        skipped: 0,
        errors: Vec::new(),
    };

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                outcome.errors.push(json!({"error": e.to_string()}));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if excludes.is_match(path) {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if !ext.map(|e| wanted.contains(&e)).unwrap_or(false) {
            continue;
        }

        outcome.total_files += 1;
        let path_str = path.to_string_lossy().into_owned();
        match ingest_code_file(ctx, &path_str, None, metadata, None).await {
            Ok(IngestOutcome::Document(doc)) => {
                if doc.action == StorageAction::Skip {
                    outcome.skipped += 1;
                } else {
                    outcome.indexed += 1;
                }
            }
            Ok(IngestOutcome::Chunked(_)) => outcome.indexed += 1,
            Err(e) => outcome
                .errors
                .push(json!({"file": path_str, "kind": e.kind(), "error": e.to_string()})),
        }
    }

    Ok(outcome)
}
