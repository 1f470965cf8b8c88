//! Content normalization and fingerprinting.
//!
//! Two fingerprints exist per record: `hash_content` over the normalized
//! content, and `metadata_hash` over the canonical serialization of the
//! envelope minus its volatile fields. Both are SHA-256 rendered as
//! lowercase hex, and both must be stable across processes: duplicate
//! detection and the deprecation engine depend on it.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Envelope fields excluded from the metadata fingerprint. Two envelopes
/// that differ only in these compare equal under `metadata_hash`.
pub const VOLATILE_FIELDS: &[&str] = &["created_at", "updated_at", "status", "version"];

/// Normalize content for hashing.
///
/// Steps, in order: NFC Unicode form, CRLF/CR → LF, strip trailing
/// whitespace per line, collapse the trailing newline run. Deterministic
/// and idempotent.
pub fn normalize(content: &str) -> String {
    let nfc: String = content.nfc().collect();
    let unified = nfc.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    for (i, line) in unified.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out.trim_end_matches('\n').to_string()
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content fingerprint: `hash(normalize(content))`.
pub fn hash_content(content: &str) -> String {
    hash_bytes(normalize(content).as_bytes())
}

/// Metadata fingerprint over an envelope rendered as a JSON object.
///
/// The volatile fields and `metadata_hash` itself are removed, then the
/// object is serialized with lexicographically sorted keys (serde_json's
/// default map ordering) and hashed.
pub fn hash_metadata(envelope: &serde_json::Value) -> String {
    let mut map = match envelope {
        serde_json::Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    for field in VOLATILE_FIELDS {
        map.remove(*field);
    }
    map.remove("metadata_hash");
    let canonical = serde_json::Value::Object(map);
    hash_bytes(canonical.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_strips_trailing_whitespace() {
        assert_eq!(normalize("hello  \nworld\t\n"), "hello\nworld");
    }

    #[test]
    fn normalize_unifies_newlines() {
        assert_eq!(normalize("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn normalize_collapses_final_newlines() {
        assert_eq!(normalize("a\n\n\n"), "a");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_idempotent() {
        let once = normalize("x \r\ny\n\n");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn normalize_preserves_case() {
        assert_ne!(hash_content("Hello"), hash_content("hello"));
    }

    #[test]
    fn hash_content_deterministic() {
        let a = hash_content("some body\nof text\n");
        let b = hash_content("some body\nof text\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_content_ignores_line_endings() {
        assert_eq!(hash_content("a\r\nb"), hash_content("a\nb"));
    }

    #[test]
    fn metadata_hash_ignores_volatile_fields() {
        let a = json!({
            "doc_id": "d1",
            "category": "other",
            "status": "active",
            "version": "v1",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
        });
        let b = json!({
            "doc_id": "d1",
            "category": "other",
            "status": "deprecated",
            "version": "v2",
            "created_at": "2026-02-02T00:00:00Z",
            "updated_at": "2026-02-03T00:00:00Z",
        });
        assert_eq!(hash_metadata(&a), hash_metadata(&b));
    }

    #[test]
    fn metadata_hash_sensitive_to_identity_fields() {
        let a = json!({"doc_id": "d1", "category": "other"});
        let b = json!({"doc_id": "d2", "category": "other"});
        assert_ne!(hash_metadata(&a), hash_metadata(&b));
    }

    #[test]
    fn metadata_hash_excludes_itself() {
        let bare = json!({"doc_id": "d1"});
        let with_hash = json!({"doc_id": "d1", "metadata_hash": "feedbeef"});
        assert_eq!(hash_metadata(&bare), hash_metadata(&with_hash));
    }
}
