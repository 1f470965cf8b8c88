//! Metadata envelope builders.
//!
//! Turns caller-supplied fragments plus defaults into a validated
//! [`Envelope`]. Two builders exist: one for whole documents and one for
//! chunks, which additionally stamps the chunk identity fields. The
//! builders never compute `hash_content` (that belongs to the hasher),
//! but they do compute `metadata_hash`, since only the finished envelope
//! can be fingerprinted.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, VaultError};
use crate::hash;
use crate::models::{Category, ChunkIdentity, Envelope, Record, SourceKind, Status};

/// Current UTC time as an ISO-8601 string with a trailing `Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Caller-supplied envelope fragment. Everything is optional except
/// `doc_id`; the builders fill in defaults and stamp the fingerprints.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFragment {
    pub doc_id: String,
    pub category: Option<Category>,
    pub version: Option<String>,
    pub status: Option<Status>,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
    pub source: Option<SourceKind>,
    pub repo: Option<String>,
    pub tags: Vec<String>,
    pub extra: Map<String, Value>,
}

impl EnvelopeFragment {
    /// Parse a fragment from a caller-supplied JSON metadata object.
    ///
    /// `doc_id` may be supplied directly or derived from `file_path`
    /// when absent. Unknown keys are preserved as extra metadata.
    pub fn from_json(metadata: &Value, fallback_file_path: Option<&str>) -> Result<Self> {
        let obj = match metadata {
            Value::Null => Map::new(),
            Value::Object(m) => m.clone(),
            _ => {
                return Err(VaultError::InvalidInput(
                    "metadata must be a JSON object".into(),
                ))
            }
        };

        let str_field = |key: &str| -> Option<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        };

        let file_path = str_field("file_path").or_else(|| fallback_file_path.map(String::from));
        let doc_id = str_field("doc_id")
            .or_else(|| file_path.clone())
            .unwrap_or_default();

        let category = match str_field("category") {
            Some(c) => Some(Category::parse(&c)?),
            None => None,
        };
        let status = match str_field("status") {
            Some(s) => Some(Status::parse(&s)?),
            None => None,
        };
        let source = match str_field("source") {
            Some(s) => Some(SourceKind::parse(&s)?),
            None => None,
        };

        let tags = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let known = [
            "doc_id",
            "category",
            "version",
            "status",
            "file_path",
            "file_hash",
            "source",
            "repo",
            "tags",
            "hash_content",
            "metadata_hash",
            "created_at",
            "updated_at",
        ];
        let mut extra = obj.clone();
        for key in known {
            extra.remove(key);
        }

        Ok(EnvelopeFragment {
            doc_id,
            category,
            version: str_field("version"),
            status,
            file_path,
            file_hash: str_field("file_hash"),
            source,
            repo: str_field("repo"),
            tags,
            extra,
        })
    }
}

/// Build the envelope for a whole document.
///
/// Fails with `InvalidMetadata` when `doc_id` is empty or `hash_content`
/// was not supplied. Category defaults to `other`, status to `active`,
/// version to the current timestamp.
pub fn build_document_envelope(fragment: &EnvelopeFragment, hash_content: &str) -> Result<Envelope> {
    if fragment.doc_id.trim().is_empty() {
        return Err(VaultError::InvalidMetadata(
            "doc_id is required and cannot be empty".into(),
        ));
    }
    if hash_content.is_empty() {
        return Err(VaultError::InvalidMetadata(
            "hash_content is required and cannot be empty".into(),
        ));
    }

    let now = now_iso();
    let mut envelope = Envelope {
        doc_id: fragment.doc_id.clone(),
        version: fragment.version.clone().unwrap_or_else(|| now.clone()),
        category: fragment.category.unwrap_or(Category::Other),
        status: fragment.status.unwrap_or(Status::Active),
        hash_content: hash_content.to_string(),
        metadata_hash: String::new(),
        created_at: now.clone(),
        updated_at: now,
        file_path: fragment.file_path.clone(),
        file_hash: fragment.file_hash.clone(),
        source: fragment.source.unwrap_or(SourceKind::Manual),
        repo: fragment.repo.clone(),
        tags: fragment.tags.clone(),
        extra: fragment.extra.clone(),
    };
    envelope.metadata_hash = fingerprint_document(&envelope);
    Ok(envelope)
}

/// Build the envelope and identity for one chunk of a chunked document.
///
/// The chunk inherits the parent's fragment (category, file_path, tags,
/// extra metadata); its `doc_id` is the chunk id, so that the
/// active-uniqueness invariant applies per `(chunk_id, category)`.
pub fn build_chunk_envelope(
    fragment: &EnvelopeFragment,
    parent_doc_id: &str,
    chunk_index: usize,
    total_chunks: usize,
    chunk_hash: &str,
) -> Result<(Envelope, ChunkIdentity)> {
    if parent_doc_id.trim().is_empty() {
        return Err(VaultError::InvalidMetadata(
            "parent doc_id is required and cannot be empty".into(),
        ));
    }

    let chunk_id = ChunkIdentity::chunk_id_for(parent_doc_id, chunk_index);
    let identity = ChunkIdentity {
        chunk_id: chunk_id.clone(),
        chunk_index,
        parent_doc_id: parent_doc_id.to_string(),
        total_chunks,
    };

    let chunk_fragment = EnvelopeFragment {
        doc_id: chunk_id,
        ..fragment.clone()
    };
    let mut envelope = build_document_envelope(&chunk_fragment, chunk_hash)?;
    envelope.metadata_hash = fingerprint_chunk(&envelope, &identity);
    Ok((envelope, identity))
}

/// Recompute the metadata fingerprint of a whole-document envelope.
pub fn fingerprint_document(envelope: &Envelope) -> String {
    let record = Record::Whole {
        envelope: envelope.clone(),
        content: String::new(),
        vector: None,
    };
    hash::hash_metadata(&record.to_meta())
}

/// Recompute the metadata fingerprint of a chunk envelope.
pub fn fingerprint_chunk(envelope: &Envelope, identity: &ChunkIdentity) -> String {
    let record = Record::Chunk {
        envelope: envelope.clone(),
        identity: identity.clone(),
        content: String::new(),
        vector: None,
    };
    hash::hash_metadata(&record.to_meta())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(doc_id: &str) -> EnvelopeFragment {
        EnvelopeFragment {
            doc_id: doc_id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_applied() {
        let env = build_document_envelope(&fragment("d1"), "abc123").unwrap();
        assert_eq!(env.category, Category::Other);
        assert_eq!(env.status, Status::Active);
        assert_eq!(env.source, SourceKind::Manual);
        assert_eq!(env.version, env.created_at);
        assert!(!env.metadata_hash.is_empty());
    }

    #[test]
    fn empty_doc_id_rejected() {
        let err = build_document_envelope(&fragment("  "), "abc").unwrap_err();
        assert_eq!(err.kind(), "InvalidMetadata");
    }

    #[test]
    fn missing_hash_rejected() {
        let err = build_document_envelope(&fragment("d1"), "").unwrap_err();
        assert_eq!(err.kind(), "InvalidMetadata");
    }

    #[test]
    fn metadata_hash_stable_across_volatile_fields() {
        let mut frag = fragment("d1");
        frag.category = Some(Category::DesignDoc);
        let a = build_document_envelope(&frag, "abc").unwrap();
        frag.version = Some("v99".into());
        let b = build_document_envelope(&frag, "abc").unwrap();
        // version/timestamps differ but the fingerprint must not.
        assert_eq!(a.metadata_hash, b.metadata_hash);
    }

    #[test]
    fn fragment_from_json_derives_doc_id_from_file_path() {
        let frag = EnvelopeFragment::from_json(
            &json!({"category": "design_doc"}),
            Some("docs/arch.md"),
        )
        .unwrap();
        assert_eq!(frag.doc_id, "docs/arch.md");
        assert_eq!(frag.category, Some(Category::DesignDoc));
        assert_eq!(frag.file_path.as_deref(), Some("docs/arch.md"));
    }

    #[test]
    fn fragment_from_json_rejects_bad_category() {
        let err = EnvelopeFragment::from_json(&json!({"category": "bogus"}), None).unwrap_err();
        assert_eq!(err.kind(), "InvalidMetadata");
    }

    #[test]
    fn fragment_preserves_extra_keys() {
        let frag = EnvelopeFragment::from_json(
            &json!({"doc_id": "d1", "language": "rust", "tags": ["a", "b"]}),
            None,
        )
        .unwrap();
        assert_eq!(frag.extra["language"], json!("rust"));
        assert_eq!(frag.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn chunk_envelope_carries_identity() {
        let (env, identity) =
            build_chunk_envelope(&fragment("parent"), "parent", 2, 5, "ff00").unwrap();
        assert_eq!(identity.chunk_id, "parent_chunk_2");
        assert_eq!(env.doc_id, "parent_chunk_2");
        assert_eq!(identity.total_chunks, 5);
    }

    #[test]
    fn chunk_fingerprint_differs_by_index() {
        let (a, _) = build_chunk_envelope(&fragment("p"), "p", 0, 2, "h").unwrap();
        let (b, _) = build_chunk_envelope(&fragment("p"), "p", 1, 2, "h").unwrap();
        assert_ne!(a.metadata_hash, b.metadata_hash);
    }
}
