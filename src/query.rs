//! Query surface: filtered semantic search, path lookup, metadata
//! aggregation, version history, and collection statistics.
//!
//! Reads bypass the ingestion pipeline entirely. Search applies a
//! default `meta.status == active` predicate unless the caller's filter
//! already constrains `meta.status`, so deprecated versions stay out of
//! results until explicitly requested.

use serde_json::{json, Map, Value};

use crate::context::{ContentTarget, ServiceContext};
use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::models::{ScoredRecord, Status, StoredRecord};

/// Maximum records pulled for aggregation queries.
const AGGREGATION_SCAN_LIMIT: usize = 100_000;

/// Which collections a search fans out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    All,
    Docs,
    Code,
}

impl ContentType {
    pub fn parse(s: &str) -> Result<ContentType> {
        match s {
            "all" => Ok(ContentType::All),
            "docs" => Ok(ContentType::Docs),
            "code" => Ok(ContentType::Code),
            other => Err(VaultError::InvalidInput(format!(
                "content_type must be one of [all, docs, code], got: {other}"
            ))),
        }
    }
}

fn targets(ctx: &ServiceContext, content_type: ContentType) -> Vec<&str> {
    match content_type {
        ContentType::All => ctx.collections().to_vec(),
        ContentType::Docs => vec![ctx.collection_for(ContentTarget::Docs)],
        ContentType::Code => vec![ctx.collection_for(ContentTarget::Code)],
    }
}

/// Combine the caller's filter with the default `status = active`
/// restriction. The default is dropped as soon as the caller mentions
/// `meta.status` anywhere in their predicate.
fn effective_filter(caller: Option<Filter>) -> Filter {
    let active = Filter::eq("meta.status", Status::Active.as_str());
    match caller {
        None => active,
        Some(f) if f.references_field("meta.status") => f,
        Some(f) => Filter::and(vec![f, active]),
    }
}

fn hit_json(collection: &str, hit: &ScoredRecord) -> Value {
    let env = hit.stored.envelope();
    json!({
        "score": hit.score,
        "point_reference": hit.stored.point_ref,
        "collection": collection,
        "doc_id": env.doc_id,
        "category": env.category.as_str(),
        "status": env.status.as_str(),
        "version": env.version,
        "file_path": env.file_path,
        "content": hit.stored.content(),
    })
}

/// Semantic search across one or both collections.
pub async fn search_documents(
    ctx: &ServiceContext,
    query: &str,
    top_k: usize,
    content_type: ContentType,
    metadata_filters: Option<&Value>,
) -> Result<Value> {
    if query.trim().is_empty() {
        return Err(VaultError::InvalidInput("query must not be empty".into()));
    }
    if !(1..=50).contains(&top_k) {
        return Err(VaultError::InvalidInput(format!(
            "top_k must be in [1, 50], got {top_k}"
        )));
    }

    let caller_filter = metadata_filters.map(Filter::parse).transpose()?;
    let filter = effective_filter(caller_filter);

    let vectors = ctx.embedder.embed(&[query.to_string()]).await?;
    let query_vec = vectors
        .into_iter()
        .next()
        .ok_or_else(|| VaultError::EmbeddingFailure("embedder returned no vectors".into()))?;

    let mut hits: Vec<(String, ScoredRecord)> = Vec::new();
    for collection in targets(ctx, content_type) {
        let results = ctx
            .store
            .search(collection, &query_vec, Some(&filter), top_k)
            .await?;
        hits.extend(results.into_iter().map(|h| (collection.to_string(), h)));
    }
    hits.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);

    Ok(json!({
        "status": "success",
        "query": query,
        "total": hits.len(),
        "results": hits
            .iter()
            .map(|(collection, hit)| hit_json(collection, hit))
            .collect::<Vec<_>>(),
    }))
}

fn record_json(collection: &str, stored: &StoredRecord) -> Value {
    json!({
        "point_reference": stored.point_ref,
        "collection": collection,
        "content": stored.content(),
        "meta": stored.record.to_meta(),
    })
}

/// Look a document up by its `file_path`, active by default.
pub async fn get_document_by_path(
    ctx: &ServiceContext,
    file_path: &str,
    status: Option<Status>,
) -> Result<Value> {
    if file_path.trim().is_empty() {
        return Err(VaultError::InvalidInput("file_path must not be empty".into()));
    }

    let mut conditions = vec![Filter::eq("meta.file_path", file_path)];
    if let Some(status) = status {
        conditions.push(Filter::eq("meta.status", status.as_str()));
    }
    let filter = Filter::and(conditions);

    let mut documents = Vec::new();
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, Some(&filter), AGGREGATION_SCAN_LIMIT, false)
            .await?;
        documents.extend(records.iter().map(|r| record_json(collection, r)));
    }

    Ok(json!({
        "status": "success",
        "file_path": file_path,
        "count": documents.len(),
        "documents": documents,
    }))
}

/// Aggregate counts of distinct values for the requested envelope
/// fields over all records matching the filter.
pub async fn get_metadata_stats(
    ctx: &ServiceContext,
    metadata_filters: Option<&Value>,
    group_by_fields: &[String],
) -> Result<Value> {
    let filter = metadata_filters.map(Filter::parse).transpose()?;

    let fields: Vec<String> = if group_by_fields.is_empty() {
        vec!["category".into(), "status".into(), "source".into()]
    } else {
        group_by_fields.to_vec()
    };

    let mut total = 0usize;
    let mut stats: Map<String, Value> = Map::new();
    for field in &fields {
        stats.insert(field.clone(), Value::Object(Map::new()));
    }

    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, filter.as_ref(), AGGREGATION_SCAN_LIMIT, false)
            .await?;
        total += records.len();
        for record in &records {
            let meta = record.record.to_meta();
            for field in &fields {
                let value = match meta.get(field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Bool(b)) => b.to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                if let Some(bucket) = stats.get_mut(field).and_then(Value::as_object_mut) {
                    let count = bucket.get(&value).and_then(Value::as_u64).unwrap_or(0);
                    bucket.insert(value, json!(count + 1));
                }
            }
        }
    }

    Ok(json!({
        "status": "success",
        "total_documents": total,
        "group_by": fields,
        "stats": stats,
    }))
}

/// Per-collection record counts.
pub async fn get_stats(ctx: &ServiceContext) -> Result<Value> {
    let mut collections = Map::new();
    for collection in ctx.collections() {
        let total = ctx.store.count(collection, None).await?;
        let active = ctx
            .store
            .count(
                collection,
                Some(&Filter::eq("meta.status", Status::Active.as_str())),
            )
            .await?;
        let deprecated = ctx
            .store
            .count(
                collection,
                Some(&Filter::eq("meta.status", Status::Deprecated.as_str())),
            )
            .await?;
        collections.insert(
            collection.to_string(),
            json!({
                "total": total,
                "active": active,
                "deprecated": deprecated,
            }),
        );
    }
    Ok(json!({
        "status": "success",
        "collections": collections,
    }))
}

/// All stored versions of a logical document, oldest first.
pub async fn get_version_history(
    ctx: &ServiceContext,
    doc_id: &str,
    category: Option<&str>,
    include_deprecated: bool,
) -> Result<Value> {
    if doc_id.trim().is_empty() {
        return Err(VaultError::InvalidInput("doc_id must not be empty".into()));
    }

    let mut conditions = vec![Filter::eq("meta.doc_id", doc_id)];
    if let Some(category) = category {
        crate::models::Category::parse(category)?;
        conditions.push(Filter::eq("meta.category", category));
    }
    if !include_deprecated {
        conditions.push(Filter::eq("meta.status", Status::Active.as_str()));
    }
    let filter = Filter::and(conditions);

    let mut versions: Vec<(String, StoredRecord)> = Vec::new();
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, Some(&filter), AGGREGATION_SCAN_LIMIT, false)
            .await?;
        versions.extend(records.into_iter().map(|r| (collection.to_string(), r)));
    }
    versions.sort_by(|a, b| {
        let ea = a.1.envelope();
        let eb = b.1.envelope();
        ea.version
            .cmp(&eb.version)
            .then_with(|| ea.created_at.cmp(&eb.created_at))
    });

    Ok(json!({
        "status": "success",
        "doc_id": doc_id,
        "count": versions.len(),
        "versions": versions
            .iter()
            .map(|(collection, record)| {
                let env = record.envelope();
                json!({
                    "point_reference": record.point_ref,
                    "collection": collection,
                    "version": env.version,
                    "status": env.status.as_str(),
                    "category": env.category.as_str(),
                    "hash_content": env.hash_content,
                    "created_at": env.created_at,
                    "updated_at": env.updated_at,
                })
            })
            .collect::<Vec<_>>(),
    }))
}
