//! Backup and restore.
//!
//! A backup is a directory `backup_{collection}_{timestamp}` holding
//! three files: `documents.json` (content + envelope + optional
//! embedding per record), `metadata.json` (backup identity, timestamp,
//! filter descriptor, counts), and `manifest.json` (per-file SHA-256
//! checksum and size). Restore verifies the manifest before handing
//! records to the import path, so a corrupted backup fails with
//! `IntegrityMismatch` instead of half-applying.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};

use crate::bulk::{import_documents, ImportPolicy};
use crate::context::{ContentTarget, ServiceContext};
use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::hash;
use crate::metadata::now_iso;

const BACKUP_SCAN_LIMIT: usize = 1_000_000;
const BACKUP_FORMAT_VERSION: &str = "1.0";

fn file_checksum(path: &Path) -> Result<(String, u64)> {
    let bytes = fs::read(path)
        .map_err(|e| VaultError::Internal(format!("cannot read '{}': {e}", path.display())))?;
    Ok((hash::hash_bytes(&bytes), bytes.len() as u64))
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| VaultError::Internal(format!("serialize {}: {e}", path.display())))?;
    fs::write(path, rendered)
        .map_err(|e| VaultError::Internal(format!("write '{}': {e}", path.display())))
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).map_err(|e| {
        VaultError::InvalidInput(format!("cannot read '{}': {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VaultError::IntegrityMismatch(format!("'{}' is not valid JSON: {e}", path.display())))
}

/// Create a backup of one collection under the backup directory.
pub async fn create_backup(
    ctx: &ServiceContext,
    target: ContentTarget,
    backup_directory: Option<&Path>,
    include_embeddings: bool,
    filters: Option<&Value>,
) -> Result<Value> {
    let collection = ctx.collection_for(target).to_string();
    let filter = filters.map(Filter::parse).transpose()?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup_id = format!("backup_{collection}_{timestamp}");
    let root = backup_directory
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.config.backup_dir.clone());
    let backup_path = root.join(&backup_id);
    fs::create_dir_all(&backup_path)
        .map_err(|e| VaultError::Internal(format!("cannot create backup directory: {e}")))?;

    let records = ctx
        .store
        .scroll(
            &collection,
            filter.as_ref(),
            BACKUP_SCAN_LIMIT,
            include_embeddings,
        )
        .await?;

    let documents: Vec<Value> = records
        .iter()
        .map(|record| {
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
            entry
        })
        .collect();
    let document_count = documents.len();

    let documents_file = backup_path.join("documents.json");
    write_json(&documents_file, &Value::Array(documents))?;

    let backup_metadata = json!({
        "backup_id": backup_id,
        "collection": collection,
        "timestamp": now_iso(),
        "document_count": document_count,
        "include_embeddings": include_embeddings,
        "filters": filter.as_ref().map(Filter::to_json),
        "format_version": BACKUP_FORMAT_VERSION,
    });
    let metadata_file = backup_path.join("metadata.json");
    write_json(&metadata_file, &backup_metadata)?;

    let (documents_checksum, documents_size) = file_checksum(&documents_file)?;
    let (metadata_checksum, metadata_size) = file_checksum(&metadata_file)?;
    let manifest = json!({
        "backup_id": backup_metadata["backup_id"],
        "created_at": now_iso(),
        "files": [
            {"filename": "documents.json", "checksum": documents_checksum, "size": documents_size},
            {"filename": "metadata.json", "checksum": metadata_checksum, "size": metadata_size},
        ],
    });
    write_json(&backup_path.join("manifest.json"), &manifest)?;

    Ok(json!({
        "status": "success",
        "backup_id": backup_metadata["backup_id"],
        "backup_path": backup_path.to_string_lossy(),
        "document_count": document_count,
        "metadata": backup_metadata,
    }))
}

/// Check every manifest entry against the file on disk.
fn verify_manifest(backup_path: &Path, manifest: &Value) -> Result<()> {
    let files = manifest
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            VaultError::IntegrityMismatch("manifest.json has no 'files' array".into())
        })?;
    for entry in files {
        let filename = entry
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| VaultError::IntegrityMismatch("manifest entry without filename".into()))?;
        let expected = entry.get("checksum").and_then(Value::as_str).unwrap_or("");
        let (actual, _) = file_checksum(&backup_path.join(filename))
            .map_err(|e| VaultError::IntegrityMismatch(format!("{filename}: {e}")))?;
        if actual != expected {
            return Err(VaultError::IntegrityMismatch(format!(
                "checksum mismatch for {filename}: expected {expected}, got {actual}"
            )));
        }
    }
    Ok(())
}

/// Restore a backup through the import path.
pub async fn restore_backup(
    ctx: &ServiceContext,
    backup_path: &str,
    policy: ImportPolicy,
) -> Result<Value> {
    let path = PathBuf::from(backup_path);
    if !path.is_dir() {
        return Err(VaultError::InvalidInput(format!(
            "'{backup_path}' is not a backup directory"
        )));
    }

    let manifest = read_json(&path.join("manifest.json"))?;
    verify_manifest(&path, &manifest)?;

    let metadata = read_json(&path.join("metadata.json"))?;
    let documents = read_json(&path.join("documents.json"))?;
    let documents = documents.as_array().ok_or_else(|| {
        VaultError::IntegrityMismatch("documents.json is not a JSON array".into())
    })?;

    let target = match metadata.get("collection").and_then(Value::as_str) {
        Some(name) if name == ctx.config.code_collection => ContentTarget::Code,
        _ => ContentTarget::Docs,
    };

    let mut result = import_documents(ctx, documents, policy, target).await?;
    result["backup_id"] = metadata.get("backup_id").cloned().unwrap_or(Value::Null);
    result["restored_from"] = json!(backup_path);
    Ok(result)
}

/// List the backups under the backup directory, newest first.
pub fn list_backups(ctx: &ServiceContext, backup_directory: Option<&Path>) -> Result<Value> {
    let root = backup_directory
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.config.backup_dir.clone());
    if !root.is_dir() {
        return Ok(json!({"status": "success", "backups": [], "count": 0}));
    }

    let mut backups: Vec<Value> = Vec::new();
    let entries = fs::read_dir(&root)
        .map_err(|e| VaultError::Internal(format!("cannot read '{}': {e}", root.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("backup_") {
            continue;
        }
        match read_json(&path.join("metadata.json")) {
            Ok(metadata) => backups.push(json!({
                "backup_id": name,
                "path": path.to_string_lossy(),
                "metadata": metadata,
            })),
            Err(e) => backups.push(json!({
                "backup_id": name,
                "path": path.to_string_lossy(),
                "error": e.to_string(),
            })),
        }
    }
    backups.sort_by(|a, b| {
        b["backup_id"]
            .as_str()
            .unwrap_or("")
            .cmp(a["backup_id"].as_str().unwrap_or(""))
    });

    Ok(json!({
        "status": "success",
        "count": backups.len(),
        "backups": backups,
    }))
}
