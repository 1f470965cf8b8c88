//! Qdrant-backed [`VectorStore`] implementation.
//!
//! Records are stored one per point with payload `{content, meta}` and a
//! single dense vector. All mutation is expressed through payload
//! filters; the only id-addressed operation is point retrieval for
//! caller-supplied references (which are UUIDs this store generated, so
//! they are always of the backend's native id shape).
//!
//! Filter predicates are validated against the collection's payload
//! index schema before they are pushed down, so an unindexed path
//! surfaces as `IndexRequired` instead of a backend scan error.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
    r#match::MatchValue, vectors_output::VectorsOptions, Condition, CountPointsBuilder,
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldCondition, FieldType, Filter as QdrantFilter, GetPointsBuilder, ListValue, Match, PointId,
    PointStruct, Range, RepeatedIntegers, RepeatedStrings, ScrollPointsBuilder,
    SearchPointsBuilder, SetPayloadPointsBuilder, Struct, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::{Map, Value};

use crate::error::{Result, VaultError};
use crate::filter::{Combinator, Filter, Op};
use crate::models::{Record, ScoredRecord, StoredRecord};

use super::{PointPayload, VectorStore};

/// Page size used when scrolling large result sets.
const SCROLL_PAGE: u32 = 256;

/// Vector store backed by a Qdrant instance.
pub struct QdrantStore {
    client: Qdrant,
    timeout: Duration,
    indexed: RwLock<HashMap<String, HashSet<String>>>,
}

impl QdrantStore {
    /// Connect to the backend. The client itself is lazy; connectivity
    /// problems surface on the first call.
    pub fn connect(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| VaultError::BackendUnavailable(format!("qdrant client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            indexed: RwLock::new(HashMap::new()),
        })
    }

    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, QdrantError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(map_backend_error(e)),
            Err(_) => Err(VaultError::BackendUnavailable(format!(
                "backend call timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Indexed payload paths for a collection, cached after the first
    /// lookup and refreshed by `ensure_payload_indexes`.
    async fn indexed_fields(&self, collection: &str) -> Result<HashSet<String>> {
        if let Some(fields) = self.indexed.read().unwrap().get(collection) {
            return Ok(fields.clone());
        }
        let info = self.call(self.client.collection_info(collection)).await?;
        let schema = info
            .result
            .map(|r| r.payload_schema)
            .unwrap_or_default();
        let fields: HashSet<String> = schema.keys().cloned().collect();
        self.indexed
            .write()
            .unwrap()
            .insert(collection.to_string(), fields.clone());
        Ok(fields)
    }

    async fn validate_filter(&self, collection: &str, filter: Option<&Filter>) -> Result<()> {
        if let Some(f) = filter {
            let indexed = self.indexed_fields(collection).await?;
            f.validate_indexed(&indexed)?;
        }
        Ok(())
    }
}

fn map_backend_error(e: QdrantError) -> VaultError {
    let msg = e.to_string();
    if msg.contains("Index required") {
        VaultError::IndexRequired(msg)
    } else if msg.contains("doesn't exist") || msg.contains("Not found") {
        VaultError::NotFound(msg)
    } else {
        VaultError::BackendUnavailable(msg)
    }
}

// ── payload value conversion ────────────────────────────────────────────

fn json_to_qdrant(value: &Value) -> QdrantValue {
    use qdrant_client::qdrant::value::Kind;
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json(value: &QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null)
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(st)) => {
            let mut map = Map::new();
            for (k, v) in &st.fields {
                map.insert(k.clone(), qdrant_to_json(v));
            }
            Value::Object(map)
        }
    }
}

fn json_map_to_payload(map: &Map<String, Value>) -> Payload {
    let fields: HashMap<String, QdrantValue> = map
        .iter()
        .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
        .collect();
    Payload::from(fields)
}

// ── filter conversion ───────────────────────────────────────────────────

fn field_condition(key: &str, m: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(m),
            }),
            ..Default::default()
        })),
    }
}

fn range_condition(key: &str, range: Range) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            range: Some(range),
            ..Default::default()
        })),
    }
}

fn nested(filter: QdrantFilter) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Filter(filter)),
    }
}

fn match_value_for(value: &Value) -> Result<MatchValue> {
    match value {
        Value::String(s) => Ok(MatchValue::Keyword(s.clone())),
        Value::Bool(b) => Ok(MatchValue::Boolean(*b)),
        Value::Number(n) => n.as_i64().map(MatchValue::Integer).ok_or_else(|| {
            VaultError::InvalidInput(
                "float equality is not supported; use range operators".into(),
            )
        }),
        other => Err(VaultError::InvalidInput(format!(
            "unsupported match value: {other}"
        ))),
    }
}

fn match_any_for(values: &[Value]) -> Result<MatchValue> {
    if values.iter().all(Value::is_string) {
        Ok(MatchValue::Keywords(RepeatedStrings {
            strings: values
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        }))
    } else if values.iter().all(|v| v.as_i64().is_some()) {
        Ok(MatchValue::Integers(RepeatedIntegers {
            integers: values.iter().filter_map(Value::as_i64).collect(),
        }))
    } else {
        Err(VaultError::InvalidInput(
            "'in' / 'not in' values must be all strings or all integers".into(),
        ))
    }
}

/// Lower the filter AST to the backend's filter representation.
pub fn to_qdrant_filter(filter: &Filter) -> Result<QdrantFilter> {
    match filter {
        Filter::Leaf {
            field,
            operator,
            value,
        } => {
            let mut out = QdrantFilter::default();
            match operator {
                Op::Eq => out.must.push(field_condition(field, match_value_for(value)?)),
                Op::Ne => out
                    .must_not
                    .push(field_condition(field, match_value_for(value)?)),
                Op::In => {
                    let values = value.as_array().cloned().unwrap_or_default();
                    out.must.push(field_condition(field, match_any_for(&values)?));
                }
                Op::NotIn => {
                    let values = value.as_array().cloned().unwrap_or_default();
                    out.must_not
                        .push(field_condition(field, match_any_for(&values)?));
                }
                Op::Gt | Op::Lt | Op::Gte | Op::Lte => {
                    let n = value.as_f64().ok_or_else(|| {
                        VaultError::InvalidInput(
                            "range operators require a numeric value".into(),
                        )
                    })?;
                    let range = match operator {
                        Op::Gt => Range {
                            gt: Some(n),
                            ..Default::default()
                        },
                        Op::Lt => Range {
                            lt: Some(n),
                            ..Default::default()
                        },
                        Op::Gte => Range {
                            gte: Some(n),
                            ..Default::default()
                        },
                        _ => Range {
                            lte: Some(n),
                            ..Default::default()
                        },
                    };
                    out.must.push(range_condition(field, range));
                }
            }
            Ok(out)
        }
        Filter::Node {
            operator,
            conditions,
        } => {
            let children = conditions
                .iter()
                .map(to_qdrant_filter)
                .collect::<Result<Vec<_>>>()?;
            let mut out = QdrantFilter::default();
            match operator {
                Combinator::And => {
                    for child in children {
                        out.must.push(nested(child));
                    }
                }
                Combinator::Or => {
                    for child in children {
                        out.should.push(nested(child));
                    }
                }
                Combinator::Not => {
                    for child in children {
                        out.must_not.push(nested(child));
                    }
                }
            }
            Ok(out)
        }
    }
}

fn filter_selector(filter: QdrantFilter) -> PointsSelectorOneOf {
    PointsSelectorOneOf::Filter(filter)
}

// ── record conversion ───────────────────────────────────────────────────

fn point_id_string(id: &Option<PointId>) -> String {
    match id.as_ref().and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(s)) => s.clone(),
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn payload_to_stored(
    id: &Option<PointId>,
    payload: &HashMap<String, QdrantValue>,
    vector: Option<Vec<f32>>,
) -> Result<StoredRecord> {
    let content = payload
        .get("content")
        .map(qdrant_to_json)
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let meta = payload
        .get("meta")
        .map(qdrant_to_json)
        .unwrap_or(Value::Object(Map::new()));
    let record = Record::from_meta(&meta, content, vector)?;
    Ok(StoredRecord {
        point_ref: point_id_string(id),
        record,
    })
}

fn output_vector(vectors: Option<qdrant_client::qdrant::VectorsOutput>) -> Option<Vec<f32>> {
    match vectors.and_then(|v| v.vectors_options) {
        Some(VectorsOptions::Vector(v)) => Some(v.data),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let exists = self.call(self.client.collection_exists(collection)).await?;
        if !exists {
            self.call(
                self.client.create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(dims as u64, Distance::Cosine),
                    ),
                ),
            )
            .await?;
        }
        Ok(())
    }

    async fn ensure_payload_indexes(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<Vec<String>> {
        self.indexed.write().unwrap().remove(collection);
        let existing = self.indexed_fields(collection).await?;
        let mut created = Vec::new();
        for field in fields {
            if existing.contains(*field) {
                continue;
            }
            self.call(
                self.client.create_field_index(
                    CreateFieldIndexCollectionBuilder::new(collection, *field, FieldType::Keyword)
                        .wait(true),
                ),
            )
            .await?;
            created.push(field.to_string());
        }
        if !created.is_empty() {
            self.indexed.write().unwrap().remove(collection);
        }
        Ok(created)
    }

    async fn upsert(&self, collection: &str, points: Vec<PointPayload>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let qpoints: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let mut payload = Map::new();
                payload.insert("content".into(), Value::String(p.content));
                payload.insert("meta".into(), p.meta);
                PointStruct::new(p.point_ref, p.vector, json_map_to_payload(&payload))
            })
            .collect();
        self.call(
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, qpoints).wait(true)),
        )
        .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoredRecord>> {
        self.validate_filter(collection, filter).await?;
        let qfilter = filter.map(to_qdrant_filter).transpose()?;

        let mut out = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let page = (limit - out.len()).min(SCROLL_PAGE as usize) as u32;
            let mut builder = ScrollPointsBuilder::new(collection)
                .limit(page)
                .with_payload(true)
                .with_vectors(with_vectors);
            if let Some(f) = &qfilter {
                builder = builder.filter(f.clone());
            }
            if let Some(off) = offset.take() {
                builder = builder.offset(off);
            }
            let resp = self.call(self.client.scroll(builder)).await?;
            for point in resp.result {
                let vector = output_vector(point.vectors);
                out.push(payload_to_stored(&point.id, &point.payload, vector)?);
            }
            if out.len() >= limit {
                break;
            }
            match resp.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        self.validate_filter(collection, filter).await?;
        let mut builder =
            SearchPointsBuilder::new(collection, vector.to_vec(), top_k as u64).with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f)?);
        }
        let resp = self.call(self.client.search_points(builder)).await?;
        resp.result
            .into_iter()
            .map(|hit| {
                let stored = payload_to_stored(&hit.id, &hit.payload, None)?;
                Ok(ScoredRecord {
                    stored,
                    score: hit.score,
                })
            })
            .collect()
    }

    async fn fetch(&self, collection: &str, point_ref: &str) -> Result<Option<StoredRecord>> {
        let ids: Vec<PointId> = vec![point_ref.to_string().into()];
        let resp = self
            .call(
                self.client.get_points(
                    GetPointsBuilder::new(collection, ids)
                        .with_payload(true)
                        .with_vectors(true),
                ),
            )
            .await?;
        match resp.result.into_iter().next() {
            Some(point) => {
                let vector = output_vector(point.vectors);
                Ok(Some(payload_to_stored(&point.id, &point.payload, vector)?))
            }
            None => Ok(None),
        }
    }

    async fn set_meta_by_filter(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Map<String, Value>,
    ) -> Result<u64> {
        self.validate_filter(collection, Some(filter)).await?;
        let qfilter = to_qdrant_filter(filter)?;
        let matched = self.count(collection, Some(filter)).await?;
        if matched == 0 {
            return Ok(0);
        }
        self.call(
            self.client.set_payload(
                SetPayloadPointsBuilder::new(collection, json_map_to_payload(&patch))
                    .points_selector(filter_selector(qfilter))
                    .key("meta")
                    .wait(true),
            ),
        )
        .await?;
        Ok(matched)
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.validate_filter(collection, Some(filter)).await?;
        let matched = self.count(collection, Some(filter)).await?;
        if matched == 0 {
            return Ok(0);
        }
        let qfilter = to_qdrant_filter(filter)?;
        self.call(
            self.client.delete_points(
                DeletePointsBuilder::new(collection)
                    .points(filter_selector(qfilter))
                    .wait(true),
            ),
        )
        .await?;
        Ok(matched)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64> {
        self.validate_filter(collection, filter).await?;
        let mut builder = CountPointsBuilder::new(collection).exact(true);
        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f)?);
        }
        let resp = self.call(self.client.count(builder)).await?;
        Ok(resp.result.map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_value_round_trip() {
        let original = json!({
            "doc_id": "d1",
            "chunk_index": 3,
            "score": 0.5,
            "is_chunk": true,
            "tags": ["a", "b"],
            "nested": {"k": "v"},
        });
        let q = json_to_qdrant(&original);
        assert_eq!(qdrant_to_json(&q), original);
    }

    #[test]
    fn eq_filter_lowers_to_must_match() {
        let q = to_qdrant_filter(&Filter::eq("meta.status", "active")).unwrap();
        assert_eq!(q.must.len(), 1);
        assert!(q.must_not.is_empty());
    }

    #[test]
    fn not_in_lowers_to_must_not() {
        let f = Filter::Leaf {
            field: "meta.status".into(),
            operator: Op::NotIn,
            value: json!(["deprecated", "draft"]),
        };
        let q = to_qdrant_filter(&f).unwrap();
        assert!(q.must.is_empty());
        assert_eq!(q.must_not.len(), 1);
    }

    #[test]
    fn and_node_nests_children() {
        let f = Filter::and(vec![
            Filter::eq("meta.doc_id", "d1"),
            Filter::eq("meta.status", "active"),
        ]);
        let q = to_qdrant_filter(&f).unwrap();
        assert_eq!(q.must.len(), 2);
    }

    #[test]
    fn float_equality_rejected() {
        let f = Filter::Leaf {
            field: "meta.score".into(),
            operator: Op::Eq,
            value: json!(0.5),
        };
        assert_eq!(to_qdrant_filter(&f).unwrap_err().kind(), "InvalidInput");
    }

    #[test]
    fn mixed_in_values_rejected() {
        let f = Filter::Leaf {
            field: "meta.tags".into(),
            operator: Op::In,
            value: json!(["a", 1]),
        };
        assert_eq!(to_qdrant_filter(&f).unwrap_err().kind(), "InvalidInput");
    }
}
