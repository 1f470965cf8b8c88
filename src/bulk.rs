//! Bulk surface: filtered deletion, bulk metadata mutation, clear-all,
//! and export/import.
//!
//! Bulk metadata mutation patches declared envelope fields only; it
//! refuses to touch content, fingerprints, or chunk identity. Import
//! applies a per-record policy — `skip` keeps existing documents,
//! `update` re-runs the duplicate classifier through the ingestion
//! controller, `error` fails on the first existing `doc_id`.

use serde_json::{json, Map, Value};

use crate::context::{ContentTarget, ServiceContext};
use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::hash;
use crate::ingest::ingest_prepared;
use crate::metadata::now_iso;
use crate::models::{Category, Record, SourceKind, Status};

const BULK_SCAN_LIMIT: usize = 100_000;

/// Envelope fields the bulk surface refuses to patch.
const PROTECTED_FIELDS: &[&str] = &[
    "content",
    "doc_id",
    "hash_content",
    "metadata_hash",
    "created_at",
    "is_chunk",
    "chunk_id",
    "chunk_index",
    "parent_doc_id",
    "total_chunks",
];

/// Matches every record; status is a required envelope field.
fn match_all_filter() -> Filter {
    Filter::Leaf {
        field: "meta.status".into(),
        operator: crate::filter::Op::In,
        value: json!(["active", "deprecated", "draft"]),
    }
}

/// Identity filter for a single stored record, safe to hand to the
/// backend: content hash plus logical id.
fn identity_filter(doc_id: &str, hash_content: &str) -> Filter {
    Filter::and(vec![
        Filter::eq("meta.doc_id", doc_id),
        Filter::eq("meta.hash_content", hash_content),
    ])
}

/// Delete all records matching a caller-supplied filter, across both
/// collections.
pub async fn delete_by_filter(ctx: &ServiceContext, filters: &Value) -> Result<Value> {
    let filter = Filter::parse(filters)?;
    let mut by_collection = Map::new();
    let mut total = 0u64;
    for collection in ctx.collections() {
        let deleted = ctx.store.delete_by_filter(collection, &filter).await?;
        total += deleted;
        by_collection.insert(collection.to_string(), json!(deleted));
    }
    Ok(json!({
        "status": "success",
        "deleted": total,
        "by_collection": by_collection,
    }))
}

/// Delete one record by its point reference.
pub async fn delete_document(ctx: &ServiceContext, point_ref: &str) -> Result<Value> {
    if point_ref.trim().is_empty() {
        return Err(VaultError::InvalidInput("document_id must not be empty".into()));
    }
    for collection in ctx.collections() {
        if let Some(record) = ctx.store.fetch(collection, point_ref).await? {
            let env = record.envelope();
            let deleted = ctx
                .store
                .delete_by_filter(collection, &identity_filter(&env.doc_id, &env.hash_content))
                .await?;
            return Ok(json!({
                "status": "success",
                "deleted": deleted,
                "collection": collection,
                "doc_id": env.doc_id,
            }));
        }
    }
    Err(VaultError::NotFound(format!(
        "no record with reference '{point_ref}'"
    )))
}

fn validate_patch(patch: &Map<String, Value>) -> Result<()> {
    if patch.is_empty() {
        return Err(VaultError::InvalidInput("metadata_updates is empty".into()));
    }
    for key in patch.keys() {
        if PROTECTED_FIELDS.contains(&key.as_str()) {
            return Err(VaultError::InvalidInput(format!(
                "field '{key}' cannot be modified through metadata updates"
            )));
        }
    }
    if let Some(status) = patch.get("status").and_then(Value::as_str) {
        Status::parse(status)?;
    }
    if let Some(category) = patch.get("category").and_then(Value::as_str) {
        Category::parse(category)?;
    }
    if let Some(source) = patch.get("source").and_then(Value::as_str) {
        SourceKind::parse(source)?;
    }
    Ok(())
}

/// Apply a metadata patch to every record matching the filter. The
/// metadata fingerprint is recomputed per record, since the envelope it
/// covers changed.
pub async fn bulk_update_metadata(
    ctx: &ServiceContext,
    filters: &Value,
    metadata_updates: &Value,
) -> Result<Value> {
    let filter = Filter::parse(filters)?;
    let patch = metadata_updates
        .as_object()
        .ok_or_else(|| VaultError::InvalidInput("metadata_updates must be a JSON object".into()))?;
    validate_patch(patch)?;

    let mut matched = 0u64;
    let mut updated = 0u64;
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, Some(&filter), BULK_SCAN_LIMIT, false)
            .await?;
        matched += records.len() as u64;
        for record in &records {
            let mut meta = match record.record.to_meta() {
                Value::Object(m) => m,
                _ => continue,
            };
            for (k, v) in patch {
                meta.insert(k.clone(), v.clone());
            }
            meta.insert("updated_at".into(), json!(now_iso()));
            let new_metadata_hash = hash::hash_metadata(&Value::Object(meta.clone()));

            let mut full_patch = patch.clone();
            full_patch.insert("updated_at".into(), meta["updated_at"].clone());
            full_patch.insert("metadata_hash".into(), json!(new_metadata_hash));

            let env = record.envelope();
            updated += ctx
                .store
                .set_meta_by_filter(
                    collection,
                    &identity_filter(&env.doc_id, &env.hash_content),
                    full_patch,
                )
                .await?;
        }
    }

    Ok(json!({
        "status": "success",
        "matched": matched,
        "updated": updated,
        "updated_fields": patch.keys().collect::<Vec<_>>(),
    }))
}

/// Replace a record's content through the ingestion controller,
/// preserving its logical identity. The stored envelope (minus volatile
/// fields) seeds the new version; `metadata_updates` is overlaid on top.
/// Content replacement is deprecate-then-write, never in place.
pub async fn update_document(
    ctx: &ServiceContext,
    point_ref: &str,
    content: &str,
    metadata_updates: Option<&Value>,
) -> Result<Value> {
    for collection in ctx.collections() {
        let Some(record) = ctx.store.fetch(collection, point_ref).await? else {
            continue;
        };
        if record.record.is_chunk() {
            return Err(VaultError::InvalidInput(
                "chunk records are updated through their parent document".into(),
            ));
        }

        // Seed the fragment from the stored envelope, then overlay the
        // caller's updates. Volatile fields and fingerprints regenerate.
        let mut seed = match record.record.to_meta() {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for volatile in ["version", "status", "created_at", "updated_at", "hash_content", "metadata_hash", "file_hash"] {
            seed.remove(volatile);
        }
        if let Some(updates) = metadata_updates {
            let updates = updates.as_object().ok_or_else(|| {
                VaultError::InvalidInput("metadata_updates must be a JSON object".into())
            })?;
            validate_patch(updates)?;
            for (k, v) in updates {
                seed.insert(k.clone(), v.clone());
            }
        }

        let fragment =
            crate::metadata::EnvelopeFragment::from_json(&Value::Object(seed), None)?;
        let outcome = crate::ingest::ingest_document(
            ctx,
            collection,
            crate::ingest::IngestRequest {
                content: content.to_string(),
                fragment,
                chunking: None,
            },
        )
        .await?;
        return Ok(outcome.to_response());
    }
    Err(VaultError::NotFound(format!(
        "no record with reference '{point_ref}'"
    )))
}

/// Patch metadata fields of a single record without touching its
/// content. The metadata fingerprint is recomputed.
pub async fn update_metadata(
    ctx: &ServiceContext,
    point_ref: &str,
    metadata_updates: &Value,
) -> Result<Value> {
    let patch = metadata_updates
        .as_object()
        .ok_or_else(|| VaultError::InvalidInput("metadata_updates must be a JSON object".into()))?;
    validate_patch(patch)?;

    for collection in ctx.collections() {
        let Some(record) = ctx.store.fetch(collection, point_ref).await? else {
            continue;
        };
        let mut meta = match record.record.to_meta() {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for (k, v) in patch {
            meta.insert(k.clone(), v.clone());
        }
        meta.insert("updated_at".into(), json!(now_iso()));
        let new_metadata_hash = hash::hash_metadata(&Value::Object(meta.clone()));

        let mut full_patch = patch.clone();
        full_patch.insert("updated_at".into(), meta["updated_at"].clone());
        full_patch.insert("metadata_hash".into(), json!(new_metadata_hash));

        let env = record.envelope();
        let updated = ctx
            .store
            .set_meta_by_filter(
                collection,
                &identity_filter(&env.doc_id, &env.hash_content),
                full_patch,
            )
            .await?;
        return Ok(json!({
            "status": "success",
            "updated": updated,
            "doc_id": env.doc_id,
            "updated_fields": patch.keys().collect::<Vec<_>>(),
        }));
    }
    Err(VaultError::NotFound(format!(
        "no record with reference '{point_ref}'"
    )))
}

/// Hard-delete everything in both collections. Requires explicit
/// confirmation in the tool arguments.
pub async fn clear_all(ctx: &ServiceContext, confirm: bool) -> Result<Value> {
    if !confirm {
        return Err(VaultError::InvalidInput(
            "clear_all requires \"confirm\": true".into(),
        ));
    }
    let filter = match_all_filter();
    let mut by_collection = Map::new();
    let mut total = 0u64;
    for collection in ctx.collections() {
        let deleted = ctx.store.delete_by_filter(collection, &filter).await?;
        total += deleted;
        by_collection.insert(collection.to_string(), json!(deleted));
    }
    Ok(json!({
        "status": "success",
        "deleted": total,
        "by_collection": by_collection,
    }))
}

/// Materialize documents as `(content, envelope, optional embedding)`.
pub async fn export_documents(
    ctx: &ServiceContext,
    filters: Option<&Value>,
    include_embeddings: bool,
) -> Result<Value> {
    let filter = filters.map(Filter::parse).transpose()?;

    let mut documents = Vec::new();
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(
                collection,
                filter.as_ref(),
                BULK_SCAN_LIMIT,
                include_embeddings,
            )
            .await?;
        for record in records {
            let mut entry = json!({
                "collection": collection,
                "content": record.content(),
                "meta": record.record.to_meta(),
            });
            if include_embeddings {
                if let Some(vector) = record.record.vector() {
                    entry["embedding"] = json!(vector);
                }
            }
            documents.push(entry);
        }
    }

    Ok(json!({
        "status": "success",
        "count": documents.len(),
        "documents": documents,
    }))
}

/// Duplicate-handling policy for imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPolicy {
    Skip,
    Update,
    Error,
}

impl ImportPolicy {
    pub fn parse(s: &str) -> Result<ImportPolicy> {
        match s {
            "skip" => Ok(ImportPolicy::Skip),
            "update" => Ok(ImportPolicy::Update),
            "error" => Ok(ImportPolicy::Error),
            other => Err(VaultError::InvalidInput(format!(
                "duplicate_strategy must be one of [skip, update, error], got: {other}"
            ))),
        }
    }
}

fn parse_import_entry(entry: &Value) -> Result<Record> {
    let content = entry
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| VaultError::InvalidInput("import entry is missing 'content'".into()))?;
    let meta = entry
        .get("meta")
        .filter(|m| m.is_object())
        .ok_or_else(|| VaultError::InvalidInput("import entry is missing 'meta'".into()))?;
    let vector = entry.get("embedding").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>()
    });
    Record::from_meta(meta, content.to_string(), vector)
        .map_err(|e| VaultError::InvalidInput(format!("import entry has a bad envelope: {e}")))
}

/// Import documents with a duplicate policy. Envelopes are preserved
/// verbatim; provided embeddings are reused, otherwise records are
/// re-embedded on write.
///
/// The `skip` and `error` policies compare against the store as it was
/// when the import began: the records of one batch are the versions of
/// a history and never conflict with each other. Only `update` re-runs
/// the duplicate classifier per record.
pub async fn import_documents(
    ctx: &ServiceContext,
    documents: &[Value],
    policy: ImportPolicy,
    default_target: ContentTarget,
) -> Result<Value> {
    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut errors: Vec<Value> = Vec::new();

    // Snapshot which doc_ids pre-exist, before any writes land.
    let mut preexisting: std::collections::HashMap<(String, String), bool> =
        std::collections::HashMap::new();
    for entry in documents {
        let Ok(record) = parse_import_entry(entry) else {
            continue;
        };
        let collection = import_collection(ctx, entry, default_target).to_string();
        let doc_id = record.envelope().doc_id.clone();
        let key = (collection.clone(), doc_id.clone());
        if !preexisting.contains_key(&key) {
            let count = ctx
                .store
                .count(&collection, Some(&Filter::eq("meta.doc_id", doc_id)))
                .await?;
            preexisting.insert(key, count > 0);
        }
    }

    for (index, entry) in documents.iter().enumerate() {
        let record = match parse_import_entry(entry) {
            Ok(r) => r,
            Err(e) => {
                errors.push(json!({"index": index, "kind": e.kind(), "error": e.to_string()}));
                continue;
            }
        };

        let collection = import_collection(ctx, entry, default_target);
        let doc_id = record.envelope().doc_id.clone();
        let existed = preexisting
            .get(&(collection.to_string(), doc_id.clone()))
            .copied()
            .unwrap_or(false);

        let result = match policy {
            ImportPolicy::Error if existed => {
                return Err(VaultError::Conflict(format!(
                    "doc_id '{doc_id}' already exists (import policy 'error')"
                )));
            }
            ImportPolicy::Skip if existed => {
                skipped += 1;
                continue;
            }
            // Classifier re-run: level 2 semantics apply.
            ImportPolicy::Update => ingest_prepared(ctx, collection, record)
                .await
                .map(|outcome| outcome.action != crate::dedup::StorageAction::Skip),
            // Fresh history: write the version verbatim.
            ImportPolicy::Skip | ImportPolicy::Error => {
                let mut record = record;
                crate::ingest::write_record(ctx, collection, &mut record)
                    .await
                    .map(|_| true)
            }
        };

        match result {
            Ok(true) => imported += 1,
            Ok(false) => skipped += 1,
            Err(e) => {
                errors.push(json!({
                    "index": index,
                    "doc_id": doc_id,
                    "kind": e.kind(),
                    "error": e.to_string(),
                }));
            }
        }
    }

    Ok(json!({
        "status": "success",
        "total": documents.len(),
        "imported": imported,
        "skipped": skipped,
        "errors": errors,
    }))
}

fn import_collection<'a>(
    ctx: &'a ServiceContext,
    entry: &Value,
    default_target: ContentTarget,
) -> &'a str {
    match entry.get("collection").and_then(Value::as_str) {
        Some(name) if name == ctx.config.code_collection => {
            ctx.collection_for(ContentTarget::Code)
        }
        Some(_) | None => ctx.collection_for(default_target),
    }
}
