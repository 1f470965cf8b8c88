//! Core data types for the vault.
//!
//! Every stored record carries a canonical metadata [`Envelope`] next to
//! its content and (optionally) its embedding vector. The record itself
//! is a tagged sum: a whole document, or one chunk of a chunked
//! document. The data lifecycle is:
//!
//! ```text
//! caller fragments → Envelope (metadata builder) → Record
//!                                   ↓
//!                        classifier / diff engine
//!                                   ↓
//!                  embed → VectorStore payload {content, meta}
//! ```
//!
//! # Payload shape
//!
//! In the backend, a record is stored as a payload with exactly two top
//! level keys: `content` (the raw text) and `meta` (the flat envelope).
//! Filter predicates therefore always address envelope fields through
//! the dotted path `meta.<field>`.
//!
//! # Identity
//!
//! The caller-facing identity is the logical `doc_id`; the backend
//! assigns an opaque point reference that the core passes back to the
//! backend only inside filter predicates, never compares by value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::VaultError;

/// Closed set of document categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    UserRule,
    ProjectRule,
    ProjectCommand,
    DesignDoc,
    DebugSummary,
    TestPattern,
    Other,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::UserRule,
        Category::ProjectRule,
        Category::ProjectCommand,
        Category::DesignDoc,
        Category::DebugSummary,
        Category::TestPattern,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::UserRule => "user_rule",
            Category::ProjectRule => "project_rule",
            Category::ProjectCommand => "project_command",
            Category::DesignDoc => "design_doc",
            Category::DebugSummary => "debug_summary",
            Category::TestPattern => "test_pattern",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Category, VaultError> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                VaultError::InvalidMetadata(format!(
                    "category must be one of {:?}, got: {s}",
                    Category::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>()
                ))
            })
    }
}

/// Record lifecycle status.
///
/// ```text
/// draft ──write──▶ active ──supersede──▶ deprecated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Deprecated,
    Draft,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Deprecated => "deprecated",
            Status::Draft => "draft",
        }
    }

    pub fn parse(s: &str) -> Result<Status, VaultError> {
        match s {
            "active" => Ok(Status::Active),
            "deprecated" => Ok(Status::Deprecated),
            "draft" => Ok(Status::Draft),
            other => Err(VaultError::InvalidMetadata(format!(
                "status must be one of [active, deprecated, draft], got: {other}"
            ))),
        }
    }
}

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Manual,
    Generated,
    Imported,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Manual => "manual",
            SourceKind::Generated => "generated",
            SourceKind::Imported => "imported",
        }
    }

    pub fn parse(s: &str) -> Result<SourceKind, VaultError> {
        match s {
            "manual" => Ok(SourceKind::Manual),
            "generated" => Ok(SourceKind::Generated),
            "imported" => Ok(SourceKind::Imported),
            other => Err(VaultError::InvalidMetadata(format!(
                "source must be one of [manual, generated, imported], got: {other}"
            ))),
        }
    }
}

/// The canonical metadata envelope attached to every record.
///
/// Required fields are always present after the builder runs; optional
/// fields serialize only when set. Caller-supplied metadata that is not
/// part of the schema is preserved in `extra` and round-trips through
/// the payload unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable logical identifier; not unique across versions.
    pub doc_id: String,
    /// Monotone version marker (timestamp string or caller value).
    pub version: String,
    pub category: Category,
    pub status: Status,
    /// Hex fingerprint of normalized content.
    pub hash_content: String,
    /// Hex fingerprint of the envelope minus volatile fields.
    pub metadata_hash: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Additional caller metadata outside the schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chunk identity fields, present only on chunk records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkIdentity {
    /// `"{parent_doc_id}_chunk_{chunk_index}"`.
    pub chunk_id: String,
    /// 0-based, contiguous within a single version.
    pub chunk_index: usize,
    pub parent_doc_id: String,
    /// Chunk count within the version.
    pub total_chunks: usize,
}

impl ChunkIdentity {
    /// Derive the stable chunk id from `(parent_doc_id, index)`.
    pub fn chunk_id_for(parent_doc_id: &str, index: usize) -> String {
        format!("{parent_doc_id}_chunk_{index}")
    }
}

/// A record as the core sees it: a whole document or a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Whole {
        envelope: Envelope,
        content: String,
        vector: Option<Vec<f32>>,
    },
    Chunk {
        envelope: Envelope,
        identity: ChunkIdentity,
        content: String,
        vector: Option<Vec<f32>>,
    },
}

impl Record {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Record::Whole { envelope, .. } | Record::Chunk { envelope, .. } => envelope,
        }
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            Record::Whole { envelope, .. } | Record::Chunk { envelope, .. } => envelope,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Record::Whole { content, .. } | Record::Chunk { content, .. } => content,
        }
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            Record::Whole { vector, .. } | Record::Chunk { vector, .. } => vector.as_deref(),
        }
    }

    pub fn set_vector(&mut self, v: Vec<f32>) {
        match self {
            Record::Whole { vector, .. } | Record::Chunk { vector, .. } => *vector = Some(v),
        }
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, Record::Chunk { .. })
    }

    pub fn chunk_identity(&self) -> Option<&ChunkIdentity> {
        match self {
            Record::Chunk { identity, .. } => Some(identity),
            Record::Whole { .. } => None,
        }
    }

    /// Render the envelope (plus chunk identity, when present) as the
    /// flat `meta` payload object.
    pub fn to_meta(&self) -> Value {
        let mut meta = match serde_json::to_value(self.envelope()) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        if let Record::Chunk { identity, .. } = self {
            meta.insert("is_chunk".into(), Value::Bool(true));
            meta.insert("chunk_id".into(), Value::String(identity.chunk_id.clone()));
            meta.insert("chunk_index".into(), Value::from(identity.chunk_index));
            meta.insert(
                "parent_doc_id".into(),
                Value::String(identity.parent_doc_id.clone()),
            );
            meta.insert("total_chunks".into(), Value::from(identity.total_chunks));
        }
        Value::Object(meta)
    }

    /// Rebuild a record from a stored `meta` payload object.
    pub fn from_meta(
        meta: &Value,
        content: String,
        vector: Option<Vec<f32>>,
    ) -> Result<Record, VaultError> {
        let obj = meta.as_object().ok_or_else(|| {
            VaultError::Internal("stored meta payload is not a JSON object".into())
        })?;

        let is_chunk = obj
            .get("is_chunk")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut env_obj = obj.clone();
        for key in [
            "is_chunk",
            "chunk_id",
            "chunk_index",
            "parent_doc_id",
            "total_chunks",
        ] {
            env_obj.remove(key);
        }
        let envelope: Envelope = serde_json::from_value(Value::Object(env_obj)).map_err(|e| {
            VaultError::Internal(format!("stored envelope failed to deserialize: {e}"))
        })?;

        if !is_chunk {
            return Ok(Record::Whole {
                envelope,
                content,
                vector,
            });
        }

        let identity = ChunkIdentity {
            chunk_id: obj
                .get("chunk_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            chunk_index: obj.get("chunk_index").and_then(Value::as_u64).unwrap_or(0) as usize,
            parent_doc_id: obj
                .get("parent_doc_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            total_chunks: obj.get("total_chunks").and_then(Value::as_u64).unwrap_or(0) as usize,
        };
        Ok(Record::Chunk {
            envelope,
            identity,
            content,
            vector,
        })
    }
}

/// A record as returned from the backend, paired with its opaque point
/// reference. The reference is surfaced to callers in responses but is
/// handed back to the backend only for id-native lookups, never for
/// mutation.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub point_ref: String,
    pub record: Record,
}

impl StoredRecord {
    pub fn envelope(&self) -> &Envelope {
        self.record.envelope()
    }

    pub fn content(&self) -> &str {
        self.record.content()
    }
}

/// A search hit: a stored record plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub stored: StoredRecord,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_envelope() -> Envelope {
        Envelope {
            doc_id: "d1".into(),
            version: "v1".into(),
            category: Category::Other,
            status: Status::Active,
            hash_content: "aa".into(),
            metadata_hash: "bb".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            file_path: None,
            file_hash: None,
            source: SourceKind::Manual,
            repo: None,
            tags: vec![],
            extra: Map::new(),
        }
    }

    #[test]
    fn category_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()).unwrap(), *c);
        }
        assert!(Category::parse("nonsense").is_err());
    }

    #[test]
    fn whole_record_meta_round_trip() {
        let record = Record::Whole {
            envelope: sample_envelope(),
            content: "hello".into(),
            vector: None,
        };
        let meta = record.to_meta();
        assert_eq!(meta["doc_id"], "d1");
        assert!(meta.get("is_chunk").is_none());

        let back = Record::from_meta(&meta, "hello".into(), None).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn chunk_record_meta_round_trip() {
        let record = Record::Chunk {
            envelope: sample_envelope(),
            identity: ChunkIdentity {
                chunk_id: "d1_chunk_2".into(),
                chunk_index: 2,
                parent_doc_id: "d1".into(),
                total_chunks: 3,
            },
            content: "part".into(),
            vector: Some(vec![0.1, 0.2]),
        };
        let meta = record.to_meta();
        assert_eq!(meta["is_chunk"], true);
        assert_eq!(meta["chunk_id"], "d1_chunk_2");
        assert_eq!(meta["chunk_index"], 2);

        let back = Record::from_meta(&meta, "part".into(), Some(vec![0.1, 0.2])).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn extra_metadata_round_trips() {
        let mut env = sample_envelope();
        env.extra.insert("language".into(), json!("rust"));
        let record = Record::Whole {
            envelope: env,
            content: "x".into(),
            vector: None,
        };
        let meta = record.to_meta();
        assert_eq!(meta["language"], "rust");
        let back = Record::from_meta(&meta, "x".into(), None).unwrap();
        assert_eq!(back.envelope().extra["language"], json!("rust"));
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(ChunkIdentity::chunk_id_for("doc-9", 4), "doc-9_chunk_4");
    }
}
