//! Versioning and deprecation engine.
//!
//! Transitions a prior record from `active` to `deprecated`. The backend
//! only accepts point ids of its native shape, while the identifiers the
//! core holds are strings, so deprecation is expressed as a filter-based
//! payload mutation: set `status = deprecated` and bump `updated_at` on
//! every record whose `hash_content` matches. The content hash is the
//! one identifier under the engine's control that is safe to hand to the
//! backend.
//!
//! Deprecation never deletes; the record stays queryable under an
//! explicit `status` filter. The transition is idempotent: when the
//! matching record is already deprecated the filter matches nothing and
//! the call reports zero matches as success.

use serde_json::{json, Map};

use crate::error::{Result, VaultError};
use crate::filter::Filter;
use crate::metadata::now_iso;
use crate::models::Status;
use crate::store::VectorStore;

/// Deprecate the active record(s) carrying the given content hash.
///
/// Returns the number of records transitioned. Refuses to operate
/// without a hash: a point reference alone cannot be passed to the
/// backend safely.
pub async fn deprecate_by_hash(
    store: &dyn VectorStore,
    collection: &str,
    hash_content: &str,
) -> Result<u64> {
    if hash_content.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "deprecation requires the target record's hash_content".into(),
        ));
    }

    let filter = Filter::and(vec![
        Filter::eq("meta.hash_content", hash_content),
        Filter::eq("meta.status", Status::Active.as_str()),
    ]);

    let mut patch = Map::new();
    patch.insert("status".into(), json!(Status::Deprecated.as_str()));
    patch.insert("updated_at".into(), json!(now_iso()));

    store.set_meta_by_filter(collection, &filter, patch).await
}
