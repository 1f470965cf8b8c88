//! Tool surface.
//!
//! Every capability of the service is a [`Tool`]: a named operation with
//! a JSON Schema for its parameters and a JSON-in/JSON-out execute
//! method. The [`ToolRegistry`] holds the full set; the MCP server
//! bridges it onto the wire.
//!
//! Tools return a single JSON object. Successful responses carry
//! `"status": "success"`; failures are rendered by the dispatch layer
//! from the error taxonomy as
//! `{"status": "error", "kind", "message", "retryable"}`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backup;
use crate::bulk;
use crate::context::{ContentTarget, ServiceContext};
use crate::error::{Result, VaultError};
use crate::ingest;
use crate::metadata::EnvelopeFragment;
use crate::models::Status;
use crate::query;
use crate::verify;

/// A callable tool exposed over the MCP transport.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name: lowercase with underscores, stable across versions.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Execute with parsed parameters.
    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value>;
}

/// Registry of all tools the service advertises.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The complete tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AddDocumentTool));
        registry.register(Box::new(AddFileTool));
        registry.register(Box::new(AddCodeTool));
        registry.register(Box::new(AddCodeDirectoryTool));
        registry.register(Box::new(SearchDocumentsTool));
        registry.register(Box::new(GetDocumentByPathTool));
        registry.register(Box::new(GetMetadataStatsTool));
        registry.register(Box::new(GetStatsTool));
        registry.register(Box::new(UpdateDocumentTool));
        registry.register(Box::new(UpdateMetadataTool));
        registry.register(Box::new(DeleteDocumentTool));
        registry.register(Box::new(DeleteByFilterTool));
        registry.register(Box::new(BulkUpdateMetadataTool));
        registry.register(Box::new(ClearAllTool));
        registry.register(Box::new(GetVersionHistoryTool));
        registry.register(Box::new(VerifyDocumentTool));
        registry.register(Box::new(VerifyCategoryTool));
        registry.register(Box::new(AuditStorageIntegrityTool));
        registry.register(Box::new(ExportDocumentsTool));
        registry.register(Box::new(ImportDocumentsTool));
        registry.register(Box::new(CreateBackupTool));
        registry.register(Box::new(RestoreBackupTool));
        registry.register(Box::new(ListBackupsTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ── argument helpers ────────────────────────────────────────────────────

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| VaultError::InvalidInput(format!("'{key}' is required")))
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn optional_bool(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn optional_string_list(params: &Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    })
}

fn metadata_object(params: &Value) -> Value {
    params.get("metadata").cloned().unwrap_or(Value::Null)
}

/// Parse the `{enable_chunking, chunk_size, chunk_overlap}` options.
fn chunking_options(params: &Value) -> Result<Option<ingest::ChunkingOptions>> {
    if !optional_bool(params, "enable_chunking", false) {
        return Ok(None);
    }
    let size = params
        .get("chunk_size")
        .and_then(Value::as_u64)
        .unwrap_or(512) as usize;
    let overlap = params
        .get("chunk_overlap")
        .and_then(Value::as_u64)
        .unwrap_or(50) as usize;
    ingest::ChunkingOptions::new(size, overlap).map(Some)
}

/// The standard chunking properties shared by `add_document` and
/// `add_code`.
fn chunking_schema_properties() -> Value {
    json!({
        "enable_chunking": {
            "type": "boolean",
            "description": "Split the document into chunks so later updates re-embed only changed chunks",
            "default": false
        },
        "chunk_size": {
            "type": "integer",
            "description": "Chunk size in tokens",
            "default": 512,
            "minimum": 128,
            "maximum": 2048
        },
        "chunk_overlap": {
            "type": "integer",
            "description": "Overlap between adjacent chunks in tokens",
            "default": 50,
            "minimum": 0,
            "maximum": 256
        }
    })
}

// ── ingestion tools ─────────────────────────────────────────────────────

struct AddDocumentTool;

#[async_trait]
impl Tool for AddDocumentTool {
    fn name(&self) -> &str {
        "add_document"
    }

    fn description(&self) -> &str {
        "Add a text document; duplicates are classified and prior versions deprecated"
    }

    fn parameters_schema(&self) -> Value {
        let mut props = json!({
            "content": {"type": "string", "description": "Document content"},
            "metadata": {
                "type": "object",
                "description": "Partial metadata envelope (doc_id, category, version, file_path, tags, ...)",
                "additionalProperties": true
            }
        });
        if let (Value::Object(props_map), Value::Object(chunking)) =
            (&mut props, chunking_schema_properties())
        {
            props_map.extend(chunking);
        }
        json!({
            "type": "object",
            "properties": props,
            "required": ["content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let content = required_str(&params, "content")?.to_string();
        let metadata = metadata_object(&params);
        let mut fragment = EnvelopeFragment::from_json(&metadata, None)?;
        if fragment.doc_id.is_empty() {
            // A caller-less id falls back to the content fingerprint,
            // keeping re-adds of the same text idempotent.
            fragment.doc_id = format!("doc_{}", &crate::hash::hash_content(&content)[..16]);
        }
        let chunking = chunking_options(&params)?;
        let outcome = ingest::ingest_document(
            ctx,
            ctx.collection_for(ContentTarget::Docs),
            ingest::IngestRequest {
                content,
                fragment,
                chunking,
            },
        )
        .await?;
        Ok(outcome.to_response())
    }
}

struct AddFileTool;

#[async_trait]
impl Tool for AddFileTool {
    fn name(&self) -> &str {
        "add_file"
    }

    fn description(&self) -> &str {
        "Read a file from disk and add it as a document"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file to index"},
                "metadata": {"type": "object", "additionalProperties": true}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let file_path = required_str(&params, "file_path")?;
        let outcome = ingest::ingest_file(ctx, file_path, &metadata_object(&params)).await?;
        Ok(outcome.to_response())
    }
}

struct AddCodeTool;

#[async_trait]
impl Tool for AddCodeTool {
    fn name(&self) -> &str {
        "add_code"
    }

    fn description(&self) -> &str {
        "Add a code file to the code collection with language detection"
    }

    fn parameters_schema(&self) -> Value {
        let mut props = json!({
            "file_path": {"type": "string", "description": "Path to the code file"},
            "language": {
                "type": "string",
                "description": "Programming language; auto-detected from the extension when omitted"
            },
            "metadata": {"type": "object", "additionalProperties": true}
        });
        if let (Value::Object(props_map), Value::Object(chunking)) =
            (&mut props, chunking_schema_properties())
        {
            props_map.extend(chunking);
        }
        json!({
            "type": "object",
            "properties": props,
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let file_path = required_str(&params, "file_path")?;
        let language = optional_str(&params, "language");
        let chunking = chunking_options(&params)?;
        let outcome =
            ingest::ingest_code_file(ctx, file_path, language, &metadata_object(&params), chunking)
                .await?;
        Ok(outcome.to_response())
    }
}

struct AddCodeDirectoryTool;

#[async_trait]
impl Tool for AddCodeDirectoryTool {
    fn name(&self) -> &str {
        "add_code_directory"
    }

    fn description(&self) -> &str {
        "Recursively add all code files under a directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory_path": {"type": "string", "description": "Directory to scan"},
                "extensions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "File extensions to include (defaults to common code extensions)"
                },
                "exclude_patterns": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Glob patterns or directory names to skip"
                },
                "metadata": {"type": "object", "additionalProperties": true}
            },
            "required": ["directory_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let directory = required_str(&params, "directory_path")?;
        let outcome = ingest::ingest_code_directory(
            ctx,
            directory,
            optional_string_list(&params, "extensions"),
            optional_string_list(&params, "exclude_patterns"),
            &metadata_object(&params),
        )
        .await?;
        Ok(outcome.to_response())
    }
}

// ── query tools ─────────────────────────────────────────────────────────

struct SearchDocumentsTool;

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Semantic search over documents and code with metadata filtering"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "top_k": {"type": "integer", "default": 5, "minimum": 1, "maximum": 50},
                "content_type": {
                    "type": "string",
                    "enum": ["all", "docs", "code"],
                    "default": "all"
                },
                "metadata_filters": {
                    "type": "object",
                    "description": "Filter predicate, e.g. {\"field\": \"meta.category\", \"operator\": \"==\", \"value\": \"user_rule\"}",
                    "additionalProperties": true
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let query_text = required_str(&params, "query")?;
        let top_k = params.get("top_k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let content_type =
            query::ContentType::parse(optional_str(&params, "content_type").unwrap_or("all"))?;
        query::search_documents(
            ctx,
            query_text,
            top_k,
            content_type,
            params.get("metadata_filters").filter(|v| !v.is_null()),
        )
        .await
    }
}

struct GetDocumentByPathTool;

#[async_trait]
impl Tool for GetDocumentByPathTool {
    fn name(&self) -> &str {
        "get_document_by_path"
    }

    fn description(&self) -> &str {
        "Retrieve documents by file path"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "status": {
                    "type": "string",
                    "enum": ["active", "deprecated", "draft"],
                    "default": "active"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let file_path = required_str(&params, "file_path")?;
        let status = match optional_str(&params, "status") {
            Some(s) => Some(Status::parse(s)?),
            None => Some(Status::Active),
        };
        query::get_document_by_path(ctx, file_path, status).await
    }
}

struct GetMetadataStatsTool;

#[async_trait]
impl Tool for GetMetadataStatsTool {
    fn name(&self) -> &str {
        "get_metadata_stats"
    }

    fn description(&self) -> &str {
        "Aggregate record counts by metadata field values"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {"type": "object", "additionalProperties": true},
                "group_by_fields": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Envelope fields to group by (default: category, status, source)"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let group_by = optional_string_list(&params, "group_by_fields").unwrap_or_default();
        query::get_metadata_stats(
            ctx,
            params.get("filters").filter(|v| !v.is_null()),
            &group_by,
        )
        .await
    }
}

struct GetStatsTool;

#[async_trait]
impl Tool for GetStatsTool {
    fn name(&self) -> &str {
        "get_stats"
    }

    fn description(&self) -> &str {
        "Record counts per collection"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, ctx: &ServiceContext) -> Result<Value> {
        query::get_stats(ctx).await
    }
}

// ── mutation tools ──────────────────────────────────────────────────────

struct UpdateDocumentTool;

#[async_trait]
impl Tool for UpdateDocumentTool {
    fn name(&self) -> &str {
        "update_document"
    }

    fn description(&self) -> &str {
        "Replace a record's content; the prior version is deprecated, never overwritten"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "point_reference": {"type": "string", "description": "Record reference from a prior response"},
                "content": {"type": "string", "description": "New content"},
                "metadata_updates": {"type": "object", "additionalProperties": true}
            },
            "required": ["point_reference", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let point_ref = required_str(&params, "point_reference")?;
        let content = required_str(&params, "content")?;
        bulk::update_document(
            ctx,
            point_ref,
            content,
            params.get("metadata_updates").filter(|v| !v.is_null()),
        )
        .await
    }
}

struct UpdateMetadataTool;

#[async_trait]
impl Tool for UpdateMetadataTool {
    fn name(&self) -> &str {
        "update_metadata"
    }

    fn description(&self) -> &str {
        "Patch metadata fields of a record without changing its content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "point_reference": {"type": "string"},
                "metadata_updates": {"type": "object", "additionalProperties": true}
            },
            "required": ["point_reference", "metadata_updates"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let point_ref = required_str(&params, "point_reference")?;
        let updates = params
            .get("metadata_updates")
            .ok_or_else(|| VaultError::InvalidInput("'metadata_updates' is required".into()))?;
        bulk::update_metadata(ctx, point_ref, updates).await
    }
}

struct DeleteDocumentTool;

#[async_trait]
impl Tool for DeleteDocumentTool {
    fn name(&self) -> &str {
        "delete_document"
    }

    fn description(&self) -> &str {
        "Delete one record by its point reference"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": {"type": "string", "description": "Record reference from a prior response"}
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let point_ref = required_str(&params, "document_id")?;
        bulk::delete_document(ctx, point_ref).await
    }
}

struct DeleteByFilterTool;

#[async_trait]
impl Tool for DeleteByFilterTool {
    fn name(&self) -> &str {
        "delete_by_filter"
    }

    fn description(&self) -> &str {
        "Delete all records matching a filter predicate"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {"type": "object", "additionalProperties": true}
            },
            "required": ["filters"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let filters = params
            .get("filters")
            .ok_or_else(|| VaultError::InvalidInput("'filters' is required".into()))?;
        bulk::delete_by_filter(ctx, filters).await
    }
}

struct BulkUpdateMetadataTool;

#[async_trait]
impl Tool for BulkUpdateMetadataTool {
    fn name(&self) -> &str {
        "bulk_update_metadata"
    }

    fn description(&self) -> &str {
        "Apply a metadata patch to every record matching a filter"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {"type": "object", "additionalProperties": true},
                "metadata_updates": {"type": "object", "additionalProperties": true}
            },
            "required": ["filters", "metadata_updates"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let filters = params
            .get("filters")
            .ok_or_else(|| VaultError::InvalidInput("'filters' is required".into()))?;
        let updates = params
            .get("metadata_updates")
            .ok_or_else(|| VaultError::InvalidInput("'metadata_updates' is required".into()))?;
        bulk::bulk_update_metadata(ctx, filters, updates).await
    }
}

struct ClearAllTool;

#[async_trait]
impl Tool for ClearAllTool {
    fn name(&self) -> &str {
        "clear_all"
    }

    fn description(&self) -> &str {
        "Delete every record in both collections (requires confirm: true)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirm": {
                    "type": "boolean",
                    "description": "Must be true; this operation is irreversible",
                    "default": false
                }
            },
            "required": ["confirm"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        bulk::clear_all(ctx, optional_bool(&params, "confirm", false)).await
    }
}

// ── versioning tools ────────────────────────────────────────────────────

struct GetVersionHistoryTool;

#[async_trait]
impl Tool for GetVersionHistoryTool {
    fn name(&self) -> &str {
        "get_version_history"
    }

    fn description(&self) -> &str {
        "All stored versions of a logical document, oldest first"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string", "description": "Logical document id"},
                "category": {"type": "string"},
                "include_deprecated": {"type": "boolean", "default": true}
            },
            "required": ["doc_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let doc_id = required_str(&params, "doc_id")?;
        query::get_version_history(
            ctx,
            doc_id,
            optional_str(&params, "category"),
            optional_bool(&params, "include_deprecated", true),
        )
        .await
    }
}

// ── verification tools ──────────────────────────────────────────────────

struct VerifyDocumentTool;

#[async_trait]
impl Tool for VerifyDocumentTool {
    fn name(&self) -> &str {
        "verify_document"
    }

    fn description(&self) -> &str {
        "Run the quality checks over a single record"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": {"type": "string", "description": "Record reference from a prior response"}
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let point_ref = required_str(&params, "document_id")?;
        verify::verify_document(ctx, point_ref).await
    }
}

struct VerifyCategoryTool;

#[async_trait]
impl Tool for VerifyCategoryTool {
    fn name(&self) -> &str {
        "verify_category"
    }

    fn description(&self) -> &str {
        "Run the quality checks over every record in a category"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {"type": "string"},
                "max_documents": {"type": "integer", "minimum": 1}
            },
            "required": ["category"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let category = required_str(&params, "category")?;
        let max = params
            .get("max_documents")
            .and_then(Value::as_u64)
            .map(|n| n as usize);
        verify::verify_category(ctx, category, max).await
    }
}

struct AuditStorageIntegrityTool;

#[async_trait]
impl Tool for AuditStorageIntegrityTool {
    fn name(&self) -> &str {
        "audit_storage_integrity"
    }

    fn description(&self) -> &str {
        "Compare stored fingerprints against source files on disk"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_directory": {"type": "string"},
                "recursive": {"type": "boolean", "default": true},
                "file_extensions": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["source_directory"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let source_directory = required_str(&params, "source_directory")?;
        verify::audit_storage_integrity(
            ctx,
            source_directory,
            optional_bool(&params, "recursive", true),
            optional_string_list(&params, "file_extensions"),
        )
        .await
    }
}

// ── import/export/backup tools ──────────────────────────────────────────

struct ExportDocumentsTool;

#[async_trait]
impl Tool for ExportDocumentsTool {
    fn name(&self) -> &str {
        "export_documents"
    }

    fn description(&self) -> &str {
        "Materialize records as (content, envelope, optional embedding)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {"type": "object", "additionalProperties": true},
                "include_embeddings": {"type": "boolean", "default": false}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        bulk::export_documents(
            ctx,
            params.get("filters").filter(|v| !v.is_null()),
            optional_bool(&params, "include_embeddings", false),
        )
        .await
    }
}

struct ImportDocumentsTool;

#[async_trait]
impl Tool for ImportDocumentsTool {
    fn name(&self) -> &str {
        "import_documents"
    }

    fn description(&self) -> &str {
        "Bulk import records with a duplicate policy (skip, update, error)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "documents_data": {
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Entries of shape {content, meta, embedding?}"
                },
                "duplicate_strategy": {
                    "type": "string",
                    "enum": ["skip", "update", "error"],
                    "default": "skip"
                }
            },
            "required": ["documents_data"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let documents = params
            .get("documents_data")
            .and_then(Value::as_array)
            .ok_or_else(|| VaultError::InvalidInput("'documents_data' must be an array".into()))?;
        let policy =
            bulk::ImportPolicy::parse(optional_str(&params, "duplicate_strategy").unwrap_or("skip"))?;
        bulk::import_documents(ctx, documents, policy, ContentTarget::Docs).await
    }
}

struct CreateBackupTool;

#[async_trait]
impl Tool for CreateBackupTool {
    fn name(&self) -> &str {
        "create_backup"
    }

    fn description(&self) -> &str {
        "Write a checksummed backup of a collection to disk"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection": {
                    "type": "string",
                    "enum": ["docs", "code"],
                    "default": "docs"
                },
                "backup_directory": {"type": "string"},
                "include_embeddings": {"type": "boolean", "default": false},
                "filters": {"type": "object", "additionalProperties": true}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let target = match optional_str(&params, "collection").unwrap_or("docs") {
            "code" => ContentTarget::Code,
            _ => ContentTarget::Docs,
        };
        backup::create_backup(
            ctx,
            target,
            optional_str(&params, "backup_directory").map(std::path::Path::new),
            optional_bool(&params, "include_embeddings", false),
            params.get("filters").filter(|v| !v.is_null()),
        )
        .await
    }
}

struct RestoreBackupTool;

#[async_trait]
impl Tool for RestoreBackupTool {
    fn name(&self) -> &str {
        "restore_backup"
    }

    fn description(&self) -> &str {
        "Verify a backup's checksums and restore it through the import path"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "backup_path": {"type": "string"},
                "duplicate_strategy": {
                    "type": "string",
                    "enum": ["skip", "update", "error"],
                    "default": "skip"
                }
            },
            "required": ["backup_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        let backup_path = required_str(&params, "backup_path")?;
        let policy =
            bulk::ImportPolicy::parse(optional_str(&params, "duplicate_strategy").unwrap_or("skip"))?;
        backup::restore_backup(ctx, backup_path, policy).await
    }
}

struct ListBackupsTool;

#[async_trait]
impl Tool for ListBackupsTool {
    fn name(&self) -> &str {
        "list_backups"
    }

    fn description(&self) -> &str {
        "List available backups with their metadata"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "backup_directory": {"type": "string"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ServiceContext) -> Result<Value> {
        backup::list_backups(
            ctx,
            optional_str(&params, "backup_directory").map(std::path::Path::new),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_required_tool_set() {
        let registry = ToolRegistry::with_builtins();
        for name in [
            "add_document",
            "add_file",
            "add_code",
            "add_code_directory",
            "search_documents",
            "get_document_by_path",
            "get_metadata_stats",
            "get_stats",
            "update_document",
            "update_metadata",
            "delete_document",
            "delete_by_filter",
            "bulk_update_metadata",
            "clear_all",
            "get_version_history",
            "verify_document",
            "verify_category",
            "audit_storage_integrity",
            "export_documents",
            "import_documents",
            "create_backup",
            "restore_backup",
            "list_backups",
        ] {
            assert!(registry.find(name).is_some(), "missing tool {name}");
        }
        assert_eq!(registry.len(), 23);
    }

    #[test]
    fn schemas_are_objects() {
        for tool in ToolRegistry::with_builtins().tools() {
            let schema = tool.parameters_schema();
            assert_eq!(schema["type"], "object", "tool {}", tool.name());
        }
    }

    #[test]
    fn chunking_options_default_disabled() {
        assert!(chunking_options(&json!({})).unwrap().is_none());
        let opts = chunking_options(&json!({"enable_chunking": true}))
            .unwrap()
            .unwrap();
        assert_eq!(opts.chunk_size, 512);
        assert_eq!(opts.chunk_overlap, 50);
    }

    #[test]
    fn chunking_options_out_of_range_rejected() {
        let err = chunking_options(&json!({"enable_chunking": true, "chunk_size": 9000}))
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
