//! Four-level duplicate classifier.
//!
//! Classifies an incoming write against the existing records that share
//! its `doc_id` (pre-queried by the controller). The classifier is pure:
//! it reads its inputs, never the store.
//!
//! | Level | Match | Action |
//! |-------|-------|--------|
//! | 1 | same `hash_content` and same `metadata_hash` | `Skip` |
//! | 2 | same active `doc_id` with different `hash_content`, or same `metadata_hash` with different `hash_content` | `Update` |
//! | 3 | embedding similarity above threshold, no hash match | `Warn` |
//! | 4 | none of the above | `Store` |
//!
//! Level 1 wins over 2 wins over 3 wins over 4; within level 2 the
//! same-`doc_id` case wins over the same-`metadata_hash` case. When
//! several records match a rule, the newest `updated_at` wins, then the
//! active one, then the lexicographically smallest point reference.

use crate::models::{Status, StoredRecord};

/// Similarity threshold for Level 3 detection.
pub const SIMILARITY_THRESHOLD: f32 = 0.85;

/// Strength of a duplicate match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateLevel {
    Exact,
    ContentUpdate,
    Similar,
    New,
}

impl DuplicateLevel {
    /// Numeric level as surfaced in tool responses (1..=4).
    pub fn as_number(&self) -> u8 {
        match self {
            DuplicateLevel::Exact => 1,
            DuplicateLevel::ContentUpdate => 2,
            DuplicateLevel::Similar => 3,
            DuplicateLevel::New => 4,
        }
    }
}

/// Action implied by the duplicate level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAction {
    Skip,
    Update,
    Warn,
    Store,
}

impl StorageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageAction::Skip => "skip",
            StorageAction::Update => "update",
            StorageAction::Warn => "warn",
            StorageAction::Store => "store",
        }
    }
}

/// The incoming write, reduced to what classification needs.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub doc_id: &'a str,
    pub hash_content: &'a str,
    pub metadata_hash: &'a str,
    pub content: &'a str,
}

/// Identity of the record a classification matched against. Carries the
/// fields the caller needs to act: the content hash for filter-based
/// deprecation, and the old version for the report.
#[derive(Debug, Clone)]
pub struct MatchedRecord {
    pub point_ref: String,
    pub hash_content: String,
    pub version: String,
}

impl MatchedRecord {
    fn from_stored(stored: &StoredRecord) -> Self {
        MatchedRecord {
            point_ref: stored.point_ref.clone(),
            hash_content: stored.envelope().hash_content.clone(),
            version: stored.envelope().version.clone(),
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone)]
pub struct Classification {
    pub level: DuplicateLevel,
    pub action: StorageAction,
    pub matched: Option<MatchedRecord>,
    pub reason: String,
    /// Set only for Level 3.
    pub similarity: Option<f32>,
}

/// Hook for Level 3 semantic-similarity detection.
///
/// The default probe reports nothing, which makes Level 3 inert until a
/// real similarity backend is wired in. Implementations return the index
/// of the most similar existing record and its score; the classifier
/// applies the threshold.
pub trait SimilarityProbe: Send + Sync {
    fn best_match(&self, content: &str, existing: &[StoredRecord]) -> Option<(usize, f32)>;
}

/// Probe that never reports similarity.
pub struct NoSimilarity;

impl SimilarityProbe for NoSimilarity {
    fn best_match(&self, _content: &str, _existing: &[StoredRecord]) -> Option<(usize, f32)> {
        None
    }
}

/// Classify a candidate write against the pre-queried records that share
/// its `doc_id`.
pub fn classify(
    candidate: &Candidate<'_>,
    existing: &[StoredRecord],
    probe: &dyn SimilarityProbe,
) -> Classification {
    if existing.is_empty() {
        return Classification {
            level: DuplicateLevel::New,
            action: StorageAction::Store,
            matched: None,
            reason: "no existing records found".into(),
            similarity: None,
        };
    }

    // Level 1: exact duplicate.
    let exact: Vec<&StoredRecord> = existing
        .iter()
        .filter(|r| {
            r.envelope().hash_content == candidate.hash_content
                && r.envelope().metadata_hash == candidate.metadata_hash
        })
        .collect();
    if let Some(best) = select_best(&exact) {
        return Classification {
            level: DuplicateLevel::Exact,
            action: StorageAction::Skip,
            matched: Some(MatchedRecord::from_stored(best)),
            reason: format!(
                "exact duplicate: same hash_content ({}…) and metadata_hash",
                &candidate.hash_content[..candidate.hash_content.len().min(8)]
            ),
            similarity: None,
        };
    }

    // Level 2, case 1: same doc_id, active, different content.
    let same_doc: Vec<&StoredRecord> = existing
        .iter()
        .filter(|r| {
            r.envelope().doc_id == candidate.doc_id
                && r.envelope().status == Status::Active
                && r.envelope().hash_content != candidate.hash_content
        })
        .collect();
    if let Some(best) = select_best(&same_doc) {
        return Classification {
            level: DuplicateLevel::ContentUpdate,
            action: StorageAction::Update,
            matched: Some(MatchedRecord::from_stored(best)),
            reason: format!(
                "content update: same doc_id ({}) but different hash_content",
                candidate.doc_id
            ),
            similarity: None,
        };
    }

    // Level 2, case 2: same metadata fingerprint, different content.
    let same_meta: Vec<&StoredRecord> = existing
        .iter()
        .filter(|r| {
            r.envelope().metadata_hash == candidate.metadata_hash
                && r.envelope().hash_content != candidate.hash_content
        })
        .collect();
    if let Some(best) = select_best(&same_meta) {
        return Classification {
            level: DuplicateLevel::ContentUpdate,
            action: StorageAction::Update,
            matched: Some(MatchedRecord::from_stored(best)),
            reason: format!(
                "content update: same metadata_hash ({}…) but different hash_content",
                &candidate.metadata_hash[..candidate.metadata_hash.len().min(8)]
            ),
            similarity: None,
        };
    }

    // Level 3: semantic similarity above threshold.
    if let Some((idx, score)) = probe.best_match(candidate.content, existing) {
        if score >= SIMILARITY_THRESHOLD {
            if let Some(stored) = existing.get(idx) {
                return Classification {
                    level: DuplicateLevel::Similar,
                    action: StorageAction::Warn,
                    matched: Some(MatchedRecord::from_stored(stored)),
                    reason: format!(
                        "semantic similarity {score:.3} above threshold {SIMILARITY_THRESHOLD}"
                    ),
                    similarity: Some(score),
                };
            }
        }
    }

    Classification {
        level: DuplicateLevel::New,
        action: StorageAction::Store,
        matched: None,
        reason: "new content: no hash or similarity match".into(),
        similarity: None,
    }
}

/// Tie-break among records matching the same rule: newest `updated_at`,
/// then the active one, then the lexicographically smallest point
/// reference.
fn select_best<'a>(matches: &[&'a StoredRecord]) -> Option<&'a StoredRecord> {
    matches.iter().copied().min_by(|a, b| {
        b.envelope()
            .updated_at
            .cmp(&a.envelope().updated_at)
            .then_with(|| {
                let a_active = a.envelope().status == Status::Active;
                let b_active = b.envelope().status == Status::Active;
                b_active.cmp(&a_active)
            })
            .then_with(|| a.point_ref.cmp(&b.point_ref))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Envelope, Record, SourceKind};
    use serde_json::Map;

    fn stored(
        point_ref: &str,
        doc_id: &str,
        hash_content: &str,
        metadata_hash: &str,
        status: Status,
        updated_at: &str,
    ) -> StoredRecord {
        StoredRecord {
            point_ref: point_ref.to_string(),
            record: Record::Whole {
                envelope: Envelope {
                    doc_id: doc_id.into(),
                    version: "v1".into(),
                    category: Category::Other,
                    status,
                    hash_content: hash_content.into(),
                    metadata_hash: metadata_hash.into(),
                    created_at: updated_at.into(),
                    updated_at: updated_at.into(),
                    file_path: None,
                    file_hash: None,
                    source: SourceKind::Manual,
                    repo: None,
                    tags: vec![],
                    extra: Map::new(),
                },
                content: "body".into(),
                vector: None,
            },
        }
    }

    fn candidate<'a>(doc_id: &'a str, hash: &'a str, meta: &'a str) -> Candidate<'a> {
        Candidate {
            doc_id,
            hash_content: hash,
            metadata_hash: meta,
            content: "body",
        }
    }

    #[test]
    fn empty_store_is_new() {
        let c = classify(&candidate("d1", "h1", "m1"), &[], &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::New);
        assert_eq!(c.action, StorageAction::Store);
        assert!(c.matched.is_none());
    }

    #[test]
    fn exact_duplicate_skips() {
        let existing = vec![stored("p1", "d1", "h1", "m1", Status::Active, "t1")];
        let c = classify(&candidate("d1", "h1", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::Exact);
        assert_eq!(c.action, StorageAction::Skip);
        assert_eq!(c.matched.unwrap().point_ref, "p1");
    }

    #[test]
    fn exact_wins_over_update() {
        // One record matches exactly, another shares the doc_id with
        // different content; level 1 must win.
        let existing = vec![
            stored("p1", "d1", "old", "m1", Status::Active, "t2"),
            stored("p2", "d1", "h1", "m1", Status::Deprecated, "t1"),
        ];
        let c = classify(&candidate("d1", "h1", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::Exact);
    }

    #[test]
    fn same_doc_id_different_hash_is_update() {
        let existing = vec![stored("p1", "d1", "old", "mX", Status::Active, "t1")];
        let c = classify(&candidate("d1", "new", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::ContentUpdate);
        assert_eq!(c.action, StorageAction::Update);
        assert_eq!(c.matched.unwrap().hash_content, "old");
    }

    #[test]
    fn deprecated_same_doc_id_does_not_trigger_case_one() {
        let existing = vec![stored("p1", "d1", "old", "mX", Status::Deprecated, "t1")];
        let c = classify(&candidate("d1", "new", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::New);
    }

    #[test]
    fn same_metadata_hash_is_update_case_two() {
        let existing = vec![stored("p1", "other-doc", "old", "m1", Status::Deprecated, "t1")];
        let c = classify(&candidate("d1", "new", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.level, DuplicateLevel::ContentUpdate);
        assert!(c.reason.contains("metadata_hash"));
    }

    #[test]
    fn same_doc_id_wins_over_same_metadata_hash() {
        let existing = vec![
            stored("p1", "other", "oldA", "m1", Status::Active, "t9"),
            stored("p2", "d1", "oldB", "mX", Status::Active, "t1"),
        ];
        let c = classify(&candidate("d1", "new", "m1"), &existing, &NoSimilarity);
        assert_eq!(c.matched.unwrap().point_ref, "p2");
        assert!(c.reason.contains("doc_id"));
    }

    #[test]
    fn tie_break_prefers_newest_then_active_then_smallest_ref() {
        let existing = vec![
            stored("pB", "d1", "oldA", "mX", Status::Active, "2026-01-01T00:00:00Z"),
            stored("pA", "d1", "oldB", "mX", Status::Active, "2026-01-01T00:00:00Z"),
            stored("pC", "d1", "oldC", "mX", Status::Active, "2025-01-01T00:00:00Z"),
        ];
        let c = classify(&candidate("d1", "new", "m1"), &existing, &NoSimilarity);
        // Newest pair wins over pC; within the pair, smallest ref.
        assert_eq!(c.matched.unwrap().point_ref, "pA");
    }

    struct FixedProbe(f32);
    impl SimilarityProbe for FixedProbe {
        fn best_match(&self, _c: &str, existing: &[StoredRecord]) -> Option<(usize, f32)> {
            (!existing.is_empty()).then_some((0, self.0))
        }
    }

    #[test]
    fn similarity_above_threshold_warns() {
        let existing = vec![stored("p1", "dX", "hX", "mX", Status::Active, "t1")];
        let c = classify(&candidate("d1", "h1", "m1"), &existing, &FixedProbe(0.9));
        assert_eq!(c.level, DuplicateLevel::Similar);
        assert_eq!(c.action, StorageAction::Warn);
        assert_eq!(c.similarity, Some(0.9));
    }

    #[test]
    fn similarity_below_threshold_is_new() {
        let existing = vec![stored("p1", "dX", "hX", "mX", Status::Active, "t1")];
        let c = classify(&candidate("d1", "h1", "m1"), &existing, &FixedProbe(0.5));
        assert_eq!(c.level, DuplicateLevel::New);
    }
}
