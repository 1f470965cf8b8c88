//! Tool-surface tests: drive the registry the way the MCP server does
//! and check the JSON contract of responses and errors.

use std::sync::Arc;

use serde_json::{json, Value};

use kbvault::config::Config;
use kbvault::context::ServiceContext;
use kbvault::embedding::HashEmbedder;
use kbvault::error::VaultError;
use kbvault::store::memory::MemoryStore;
use kbvault::tools::{Tool as _, ToolRegistry};

const DIMS: usize = 16;

fn ctx() -> ServiceContext {
    let config = Config::in_memory(DIMS);
    let store = MemoryStore::with_collections(
        &[config.docs_collection.as_str(), config.code_collection.as_str()],
        DIMS,
    );
    ServiceContext::new(Arc::new(store), Arc::new(HashEmbedder::new(DIMS)), config)
}

async fn call(
    registry: &ToolRegistry,
    ctx: &ServiceContext,
    name: &str,
    params: Value,
) -> Result<Value, VaultError> {
    registry
        .find(name)
        .unwrap_or_else(|| panic!("tool {name} not registered"))
        .execute(params, ctx)
        .await
}

#[tokio::test]
async fn add_and_search_round_trip() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let added = call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "deployment runbook for the ingestion service",
            "metadata": {"doc_id": "runbook", "category": "design_doc"}
        }),
    )
    .await
    .unwrap();
    assert_eq!(added["status"], "success");
    assert_eq!(added["action"], "store");
    assert!(added["point_reference"].is_string());

    call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "unrelated note about testing",
            "metadata": {"doc_id": "note", "category": "other"}
        }),
    )
    .await
    .unwrap();

    // The hashing embedder maps identical text to identical vectors, so
    // searching with the stored content must rank its record first.
    let found = call(
        &registry,
        &ctx,
        "search_documents",
        json!({
            "query": "deployment runbook for the ingestion service",
            "top_k": 2
        }),
    )
    .await
    .unwrap();
    assert_eq!(found["status"], "success");
    let results = found["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["doc_id"], "runbook");
}

#[tokio::test]
async fn search_filters_respect_category() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    for (doc_id, category) in [("a", "user_rule"), ("b", "design_doc")] {
        call(
            &registry,
            &ctx,
            "add_document",
            json!({
                "content": format!("document body for {doc_id}"),
                "metadata": {"doc_id": doc_id, "category": category}
            }),
        )
        .await
        .unwrap();
    }

    let found = call(
        &registry,
        &ctx,
        "search_documents",
        json!({
            "query": "document body for a",
            "top_k": 10,
            "metadata_filters": {"field": "meta.category", "operator": "==", "value": "user_rule"}
        }),
    )
    .await
    .unwrap();
    let results = found["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["category"], "user_rule");
}

#[tokio::test]
async fn search_with_unindexed_filter_field_errors() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let err = call(
        &registry,
        &ctx,
        "search_documents",
        json!({
            "query": "anything",
            "metadata_filters": {"field": "meta.unindexed", "operator": "==", "value": "x"}
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "IndexRequired");
    assert_eq!(err.to_response()["status"], "error");
    assert_eq!(err.to_response()["retryable"], false);
}

#[tokio::test]
async fn add_document_with_chunking_reports_chunk_counts() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let long_text = (0..8)
        .map(|i| format!("Section {i}. {}", "filler sentence with several words. ".repeat(20)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let added = call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": long_text,
            "metadata": {"doc_id": "long-doc", "category": "design_doc"},
            "enable_chunking": true,
            "chunk_size": 128,
            "chunk_overlap": 10
        }),
    )
    .await
    .unwrap();
    assert_eq!(added["chunked"], true);
    let total = added["total_chunks"].as_u64().unwrap();
    assert!(total > 1);
    assert_eq!(added["added"].as_u64().unwrap(), total);
    assert_eq!(added["unchanged"], json!(0));
}

#[tokio::test]
async fn chunk_size_out_of_range_is_invalid_input() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let err = call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "body",
            "metadata": {"doc_id": "d"},
            "enable_chunking": true,
            "chunk_size": 4096
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidInput");
}

#[tokio::test]
async fn update_document_deprecates_and_version_history_shows_both() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let added = call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "first version",
            "metadata": {"doc_id": "doc-1", "category": "other"}
        }),
    )
    .await
    .unwrap();
    let point_ref = added["point_reference"].as_str().unwrap().to_string();

    let updated = call(
        &registry,
        &ctx,
        "update_document",
        json!({
            "point_reference": point_ref,
            "content": "second version"
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated["action"], "update");
    assert_eq!(updated["duplicate_level"], 2);

    let history = call(
        &registry,
        &ctx,
        "get_version_history",
        json!({"doc_id": "doc-1"}),
    )
    .await
    .unwrap();
    assert_eq!(history["count"], json!(2));
    let versions = history["versions"].as_array().unwrap();
    let statuses: Vec<&str> = versions
        .iter()
        .map(|v| v["status"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"active"));
    assert!(statuses.contains(&"deprecated"));

    let active_only = call(
        &registry,
        &ctx,
        "get_version_history",
        json!({"doc_id": "doc-1", "include_deprecated": false}),
    )
    .await
    .unwrap();
    assert_eq!(active_only["count"], json!(1));
}

#[tokio::test]
async fn update_metadata_rejects_protected_fields() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let added = call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "some body",
            "metadata": {"doc_id": "doc-1"}
        }),
    )
    .await
    .unwrap();
    let point_ref = added["point_reference"].as_str().unwrap().to_string();

    let err = call(
        &registry,
        &ctx,
        "update_metadata",
        json!({
            "point_reference": point_ref,
            "metadata_updates": {"hash_content": "forged"}
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidInput");

    let ok = call(
        &registry,
        &ctx,
        "update_metadata",
        json!({
            "point_reference": point_ref,
            "metadata_updates": {"repo": "new-repo", "tags": ["x"]}
        }),
    )
    .await
    .unwrap();
    assert_eq!(ok["updated"], json!(1));
}

#[tokio::test]
async fn delete_document_and_not_found() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let added = call(
        &registry,
        &ctx,
        "add_document",
        json!({"content": "to be deleted", "metadata": {"doc_id": "victim"}}),
    )
    .await
    .unwrap();
    let point_ref = added["point_reference"].as_str().unwrap().to_string();

    let deleted = call(
        &registry,
        &ctx,
        "delete_document",
        json!({"document_id": point_ref}),
    )
    .await
    .unwrap();
    assert_eq!(deleted["deleted"], json!(1));

    let err = call(
        &registry,
        &ctx,
        "delete_document",
        json!({"document_id": point_ref}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[tokio::test]
async fn clear_all_requires_confirmation() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    call(
        &registry,
        &ctx,
        "add_document",
        json!({"content": "body", "metadata": {"doc_id": "d"}}),
    )
    .await
    .unwrap();

    let err = call(&registry, &ctx, "clear_all", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidInput");

    let stats = call(&registry, &ctx, "get_stats", json!({})).await.unwrap();
    assert_eq!(
        stats["collections"][&ctx.config.docs_collection]["total"],
        json!(1)
    );

    let cleared = call(&registry, &ctx, "clear_all", json!({"confirm": true}))
        .await
        .unwrap();
    assert_eq!(cleared["deleted"], json!(1));

    let stats = call(&registry, &ctx, "get_stats", json!({})).await.unwrap();
    assert_eq!(
        stats["collections"][&ctx.config.docs_collection]["total"],
        json!(0)
    );
}

#[tokio::test]
async fn get_metadata_stats_groups_by_fields() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    for (doc_id, category) in [("a", "user_rule"), ("b", "user_rule"), ("c", "design_doc")] {
        call(
            &registry,
            &ctx,
            "add_document",
            json!({
                "content": format!("content for {doc_id}"),
                "metadata": {"doc_id": doc_id, "category": category}
            }),
        )
        .await
        .unwrap();
    }

    let stats = call(
        &registry,
        &ctx,
        "get_metadata_stats",
        json!({"group_by_fields": ["category", "status"]}),
    )
    .await
    .unwrap();
    assert_eq!(stats["total_documents"], json!(3));
    assert_eq!(stats["stats"]["category"]["user_rule"], json!(2));
    assert_eq!(stats["stats"]["category"]["design_doc"], json!(1));
    assert_eq!(stats["stats"]["status"]["active"], json!(3));
}

#[tokio::test]
async fn verify_document_flags_missing_record() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    let err = call(
        &registry,
        &ctx,
        "verify_document",
        json!({"document_id": "no-such-ref"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[tokio::test]
async fn verify_category_reports_pass_rate() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();

    call(
        &registry,
        &ctx,
        "add_document",
        json!({
            "content": "a long and complete document body that easily clears the length bar",
            "metadata": {"doc_id": "good", "category": "other"}
        }),
    )
    .await
    .unwrap();

    let report = call(
        &registry,
        &ctx,
        "verify_category",
        json!({"category": "other"}),
    )
    .await
    .unwrap();
    assert_eq!(report["total"], json!(1));
    assert_eq!(report["passed"], json!(1));
    assert_eq!(report["failed"], json!(0));
}

#[tokio::test]
async fn audit_reports_missing_and_passed_files() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();
    let tmp = tempfile::TempDir::new().unwrap();

    let tracked = tmp.path().join("tracked.md");
    std::fs::write(&tracked, "tracked file content that is stored in the vault").unwrap();
    let untracked = tmp.path().join("untracked.md");
    std::fs::write(&untracked, "this file was never added").unwrap();

    call(
        &registry,
        &ctx,
        "add_file",
        json!({"file_path": tracked.to_str().unwrap()}),
    )
    .await
    .unwrap();

    let audit = call(
        &registry,
        &ctx,
        "audit_storage_integrity",
        json!({"source_directory": tmp.path().to_str().unwrap()}),
    )
    .await
    .unwrap();
    assert_eq!(audit["passed"], json!(1));
    let missing = audit["missing"].as_array().unwrap();
    assert_eq!(missing.len(), 1);
    assert!(missing[0].as_str().unwrap().contains("untracked.md"));

    // One tracked + passed, one missing: half the surface is intact.
    assert_eq!(audit["integrity_score"], json!(0.5));
}

#[tokio::test]
async fn add_code_detects_language_and_targets_code_collection() {
    let registry = ToolRegistry::with_builtins();
    let ctx = ctx();
    let tmp = tempfile::TempDir::new().unwrap();

    let source = tmp.path().join("widget.rs");
    std::fs::write(&source, "pub fn widget() -> u32 { 42 }\n").unwrap();

    let added = call(
        &registry,
        &ctx,
        "add_code",
        json!({"file_path": source.to_str().unwrap()}),
    )
    .await
    .unwrap();
    assert_eq!(added["status"], "success");

    let stats = call(&registry, &ctx, "get_stats", json!({})).await.unwrap();
    assert_eq!(
        stats["collections"][&ctx.config.code_collection]["total"],
        json!(1)
    );

    let found = call(
        &registry,
        &ctx,
        "get_document_by_path",
        json!({"file_path": source.to_str().unwrap()}),
    )
    .await
    .unwrap();
    assert_eq!(found["count"], json!(1));
    assert_eq!(found["documents"][0]["meta"]["language"], "rust");
}
