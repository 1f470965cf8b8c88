//! Verification and audit surface.
//!
//! Quality checks compute a per-record quality vector (content
//! presence, minimum length, placeholder detection, required fields,
//! hash integrity, status presence) and reduce it to a weighted score.
//! The audit walks a source directory and reconciles file content
//! against stored fingerprints per `file_path`.
//!
//! Verification errors never interrupt bulk flows; per-record failures
//! are collected and reported.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::context::ServiceContext;
use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::hash;
use crate::models::{Category, Status, StoredRecord};

/// Minimum content length for the `min_length` check.
const MIN_CONTENT_LENGTH: usize = 50;

/// Placeholder markers that indicate truncated or unfinished content.
/// `[TODO:` and `[TBD:` match any bracketed tail.
const PLACEHOLDER_MARKERS: &[&str] = &["[full content from file...]", "[...]", "[todo:", "[tbd:"];

const AUDIT_SCAN_LIMIT: usize = 100_000;

/// Outcome of the placeholder scan.
#[derive(Debug, Clone)]
pub struct PlaceholderReport {
    pub found: bool,
    pub count: usize,
    pub markers: Vec<String>,
}

/// Case-insensitively scan content for placeholder markers.
pub fn detect_placeholders(content: &str) -> PlaceholderReport {
    let lowered = content.to_lowercase();
    let mut count = 0;
    let mut markers = Vec::new();
    for marker in PLACEHOLDER_MARKERS {
        let occurrences = lowered.matches(marker).count();
        if occurrences > 0 {
            count += occurrences;
            markers.push(marker.to_string());
        }
    }
    PlaceholderReport {
        found: count > 0,
        count,
        markers,
    }
}

/// Per-record quality report.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub point_ref: String,
    pub doc_id: String,
    pub score: f64,
    pub passed: bool,
    pub checks: BTreeMap<&'static str, bool>,
    pub issues: Vec<String>,
}

impl QualityReport {
    pub fn to_json(&self) -> Value {
        json!({
            "point_reference": self.point_ref,
            "doc_id": self.doc_id,
            "quality_score": (self.score * 1000.0).round() / 1000.0,
            "status": if self.passed { "pass" } else { "fail" },
            "checks": self.checks,
            "issues": self.issues,
        })
    }
}

/// Critical checks weigh 70% of the score, the rest 30%.
const CRITICAL_CHECKS: &[&str] = &["has_content", "hash_valid", "has_required_fields"];

/// Run the quality vector over one stored record.
pub fn verify_record(record: &StoredRecord, threshold: f64) -> QualityReport {
    let env = record.envelope();
    let content = record.content();
    let mut checks: BTreeMap<&'static str, bool> = BTreeMap::new();
    let mut issues = Vec::new();

    checks.insert("has_content", !content.is_empty());
    if content.is_empty() {
        issues.push("record has no content".to_string());
    }

    checks.insert("min_length", content.len() >= MIN_CONTENT_LENGTH);
    if content.len() < MIN_CONTENT_LENGTH {
        issues.push(format!(
            "content too short: {} characters (minimum {MIN_CONTENT_LENGTH})",
            content.len()
        ));
    }

    let placeholders = detect_placeholders(content);
    checks.insert("no_placeholder", !placeholders.found);
    if placeholders.found {
        issues.push(format!(
            "found {} placeholder marker(s): {}",
            placeholders.count,
            placeholders.markers.join(", ")
        ));
    }

    let has_metadata = record
        .record
        .to_meta()
        .as_object()
        .map(|m| !m.is_empty())
        .unwrap_or(false);
    checks.insert("has_metadata", has_metadata);
    if !has_metadata {
        issues.push("record has no metadata".to_string());
    }

    let has_required = !env.doc_id.is_empty()
        && !env.version.is_empty()
        && !env.hash_content.is_empty()
        && !env.metadata_hash.is_empty();
    checks.insert("has_required_fields", has_required);
    if !has_required {
        issues.push("envelope is missing required fields".to_string());
    }

    let recomputed = hash::hash_content(content);
    let hash_valid = recomputed == env.hash_content;
    checks.insert("hash_valid", hash_valid);
    if !hash_valid {
        issues.push("content hash mismatch, possible corruption".to_string());
    }

    // The typed envelope always carries a status; the check mirrors the
    // quality vector shape for reporting.
    checks.insert("has_status", true);

    let critical: Vec<bool> = CRITICAL_CHECKS
        .iter()
        .filter_map(|name| checks.get(name).copied())
        .collect();
    let normal: Vec<bool> = checks
        .iter()
        .filter(|(name, _)| !CRITICAL_CHECKS.contains(name))
        .map(|(_, v)| *v)
        .collect();

    let ratio = |xs: &[bool]| {
        if xs.is_empty() {
            1.0
        } else {
            xs.iter().filter(|x| **x).count() as f64 / xs.len() as f64
        }
    };
    let score = ratio(&critical) * 0.7 + ratio(&normal) * 0.3;

    QualityReport {
        point_ref: record.point_ref.clone(),
        doc_id: env.doc_id.clone(),
        score,
        passed: score >= threshold,
        checks,
        issues,
    }
}

async fn find_by_ref(
    ctx: &ServiceContext,
    point_ref: &str,
) -> Result<Option<(String, StoredRecord)>> {
    for collection in ctx.collections() {
        if let Some(record) = ctx.store.fetch(collection, point_ref).await? {
            return Ok(Some((collection.to_string(), record)));
        }
    }
    Ok(None)
}

/// Verify a single record by its point reference.
pub async fn verify_document(ctx: &ServiceContext, point_ref: &str) -> Result<Value> {
    let (collection, record) = find_by_ref(ctx, point_ref)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("no record with reference '{point_ref}'")))?;
    let report = verify_record(&record, ctx.config.verify_threshold);
    let mut out = report.to_json();
    out["status"] = json!("success");
    out["collection"] = json!(collection);
    Ok(out)
}

/// Verify every record in a category across both collections.
pub async fn verify_category(
    ctx: &ServiceContext,
    category: &str,
    max_documents: Option<usize>,
) -> Result<Value> {
    Category::parse(category)?;
    let filter = Filter::eq("meta.category", category);

    let mut reports: Vec<QualityReport> = Vec::new();
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, Some(&filter), AUDIT_SCAN_LIMIT, false)
            .await?;
        for record in &records {
            reports.push(verify_record(record, ctx.config.verify_threshold));
        }
    }
    if let Some(max) = max_documents {
        reports.truncate(max);
    }

    let total = reports.len();
    let passed = reports.iter().filter(|r| r.passed).count();
    let failed = total - passed;
    let average = if total > 0 {
        reports.iter().map(|r| r.score).sum::<f64>() / total as f64
    } else {
        0.0
    };

    let mut issue_counts: BTreeMap<String, usize> = BTreeMap::new();
    for report in reports.iter().filter(|r| !r.passed) {
        for issue in &report.issues {
            let key = issue.split(':').next().unwrap_or(issue).to_string();
            *issue_counts.entry(key).or_default() += 1;
        }
    }

    Ok(json!({
        "status": "success",
        "category": category,
        "total": total,
        "passed": passed,
        "failed": failed,
        "pass_rate": if total > 0 { (passed as f64 / total as f64 * 10000.0).round() / 100.0 } else { 0.0 },
        "average_quality_score": (average * 1000.0).round() / 1000.0,
        "issue_counts": issue_counts,
        "failures": reports
            .iter()
            .filter(|r| !r.passed)
            .map(QualityReport::to_json)
            .collect::<Vec<_>>(),
    }))
}

/// Walk a source directory and reconcile file content against stored
/// fingerprints, reporting `{missing, mismatch, extra, passed}` and an
/// aggregate integrity score.
pub async fn audit_storage_integrity(
    ctx: &ServiceContext,
    source_directory: &str,
    recursive: bool,
    file_extensions: Option<Vec<String>>,
) -> Result<Value> {
    let root = Path::new(source_directory);
    if !root.is_dir() {
        return Err(VaultError::InvalidInput(format!(
            "'{source_directory}' is not a directory"
        )));
    }

    let wanted: Option<Vec<String>> = file_extensions.map(|exts| {
        exts.into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    });

    // Stored side: every active record that carries a file_path.
    let active_filter = Filter::eq("meta.status", Status::Active.as_str());
    let mut stored_by_path: BTreeMap<String, String> = BTreeMap::new();
    for collection in ctx.collections() {
        let records = ctx
            .store
            .scroll(collection, Some(&active_filter), AUDIT_SCAN_LIMIT, false)
            .await?;
        for record in records {
            if let Some(path) = &record.envelope().file_path {
                stored_by_path.insert(path.clone(), record.envelope().hash_content.clone());
            }
        }
    }

    let mut missing: Vec<String> = Vec::new();
    let mut mismatch: Vec<Value> = Vec::new();
    let mut passed = 0usize;
    let mut seen_paths: Vec<String> = Vec::new();

    let max_depth = if recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(root).max_depth(max_depth).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                mismatch.push(json!({"error": e.to_string()}));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(wanted) = &wanted {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();
            if !wanted.contains(&ext) {
                continue;
            }
        }

        let path_str = path.to_string_lossy().into_owned();
        seen_paths.push(path_str.clone());

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                mismatch.push(json!({"file": path_str, "error": e.to_string()}));
                continue;
            }
        };
        match stored_by_path.get(&path_str) {
            None => missing.push(path_str),
            Some(stored_hash) => {
                let file_hash = hash::hash_content(&content);
                if &file_hash == stored_hash {
                    passed += 1;
                } else {
                    mismatch.push(json!({
                        "file": path_str,
                        "stored_hash": stored_hash,
                        "file_hash": file_hash,
                    }));
                }
            }
        }
    }

    // Stored records pointing under the audited directory with no file
    // on disk.
    let prefix = root.to_string_lossy().into_owned();
    let extra: Vec<String> = stored_by_path
        .keys()
        .filter(|p| p.starts_with(&prefix) && !seen_paths.contains(p))
        .cloned()
        .collect();

    let considered = passed + missing.len() + mismatch.len() + extra.len();
    let integrity_score = if considered > 0 {
        passed as f64 / considered as f64
    } else {
        1.0
    };

    Ok(json!({
        "status": "success",
        "source_directory": source_directory,
        "total_files": seen_paths.len(),
        "passed": passed,
        "missing": missing,
        "mismatch": mismatch,
        "extra": extra,
        "integrity_score": (integrity_score * 1000.0).round() / 1000.0,
    }))
}
