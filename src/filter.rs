//! Filter predicate grammar.
//!
//! A filter is either a leaf comparison
//! `{"field": "meta.category", "operator": "==", "value": "user_rule"}`
//! or a boolean combinator
//! `{"operator": "AND", "conditions": [...]}`. Fields always use the
//! full dotted payload path (`meta.doc_id`, never `doc_id`): the backend
//! matches indexed payload paths verbatim, so a stripped variant would
//! silently select nothing.
//!
//! Parsing failures are `InvalidInput`; referencing a field outside the
//! payload index set is `IndexRequired` (checked by the store layer via
//! [`Filter::validate_indexed`]).

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::error::{Result, VaultError};

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Gte => ">=",
            Op::Lte => "<=",
            Op::In => "in",
            Op::NotIn => "not in",
        }
    }

    fn parse(s: &str) -> Result<Op> {
        match s {
            "==" => Ok(Op::Eq),
            "!=" => Ok(Op::Ne),
            ">" => Ok(Op::Gt),
            "<" => Ok(Op::Lt),
            ">=" => Ok(Op::Gte),
            "<=" => Ok(Op::Lte),
            "in" => Ok(Op::In),
            "not in" => Ok(Op::NotIn),
            other => Err(VaultError::InvalidInput(format!(
                "unknown filter operator: {other}"
            ))),
        }
    }
}

/// Boolean combinators for internal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    Not,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
            Combinator::Not => "NOT",
        }
    }
}

/// A filter predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Leaf {
        field: String,
        operator: Op,
        value: Value,
    },
    Node {
        operator: Combinator,
        conditions: Vec<Filter>,
    },
}

impl Filter {
    /// Exact-match leaf on a dotted payload path.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::Leaf {
            field: field.into(),
            operator: Op::Eq,
            value: value.into(),
        }
    }

    /// AND of the given conditions; a single condition passes through.
    pub fn and(mut conditions: Vec<Filter>) -> Filter {
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Filter::Node {
                operator: Combinator::And,
                conditions,
            }
        }
    }

    /// Parse the JSON filter grammar.
    pub fn parse(value: &Value) -> Result<Filter> {
        let obj = value.as_object().ok_or_else(|| {
            VaultError::InvalidInput("filter must be a JSON object".into())
        })?;

        if let Some(field) = obj.get("field") {
            let field = field
                .as_str()
                .ok_or_else(|| VaultError::InvalidInput("filter field must be a string".into()))?;
            if field.is_empty() {
                return Err(VaultError::InvalidInput("filter field is empty".into()));
            }
            let op_str = obj
                .get("operator")
                .and_then(Value::as_str)
                .ok_or_else(|| VaultError::InvalidInput("filter operator is required".into()))?;
            let operator = Op::parse(op_str)?;
            let value = obj
                .get("value")
                .cloned()
                .ok_or_else(|| VaultError::InvalidInput("filter value is required".into()))?;
            if matches!(operator, Op::In | Op::NotIn) && !value.is_array() {
                return Err(VaultError::InvalidInput(format!(
                    "operator '{}' requires an array value",
                    operator.as_str()
                )));
            }
            return Ok(Filter::Leaf {
                field: field.to_string(),
                operator,
                value,
            });
        }

        let op_str = obj.get("operator").and_then(Value::as_str).ok_or_else(|| {
            VaultError::InvalidInput("filter must have 'field' or a combinator 'operator'".into())
        })?;
        let combinator = match op_str {
            "AND" => Combinator::And,
            "OR" => Combinator::Or,
            "NOT" => Combinator::Not,
            other => {
                return Err(VaultError::InvalidInput(format!(
                    "unknown filter combinator: {other}"
                )))
            }
        };
        let conditions = obj
            .get("conditions")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                VaultError::InvalidInput("combinator filter requires 'conditions' array".into())
            })?;
        if conditions.is_empty() {
            return Err(VaultError::InvalidInput(
                "combinator filter requires at least one condition".into(),
            ));
        }
        let parsed = conditions
            .iter()
            .map(Filter::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Filter::Node {
            operator: combinator,
            conditions: parsed,
        })
    }

    /// Render back into the JSON grammar.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::Leaf {
                field,
                operator,
                value,
            } => json!({
                "field": field,
                "operator": operator.as_str(),
                "value": value,
            }),
            Filter::Node {
                operator,
                conditions,
            } => json!({
                "operator": operator.as_str(),
                "conditions": conditions.iter().map(Filter::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// All payload paths referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Leaf { field, .. } => out.push(field),
            Filter::Node { conditions, .. } => {
                for c in conditions {
                    c.collect_fields(out);
                }
            }
        }
    }

    /// Whether any leaf references the given payload path.
    pub fn references_field(&self, name: &str) -> bool {
        self.fields().iter().any(|f| *f == name)
    }

    /// Reject filters over payload paths with no index.
    pub fn validate_indexed(&self, indexed: &HashSet<String>) -> Result<()> {
        for field in self.fields() {
            if !indexed.contains(field) {
                return Err(VaultError::IndexRequired(format!(
                    "filter references '{field}' which has no payload index"
                )));
            }
        }
        Ok(())
    }

    /// Evaluate the predicate against a payload object, resolving dotted
    /// paths. Used by the in-memory backend; the Qdrant backend pushes
    /// the predicate down instead.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Filter::Leaf {
                field,
                operator,
                value,
            } => {
                let actual = lookup_path(payload, field);
                compare(actual, *operator, value)
            }
            Filter::Node {
                operator,
                conditions,
            } => match operator {
                Combinator::And => conditions.iter().all(|c| c.matches(payload)),
                Combinator::Or => conditions.iter().any(|c| c.matches(payload)),
                Combinator::Not => !conditions.iter().any(|c| c.matches(payload)),
            },
        }
    }
}

/// Resolve a dotted path like `meta.doc_id` inside a payload object.
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn compare(actual: Option<&Value>, op: Op, expected: &Value) -> bool {
    match op {
        Op::Eq => actual == Some(expected),
        Op::Ne => actual != Some(expected),
        Op::In => match (actual, expected.as_array()) {
            (Some(a), Some(arr)) => arr.contains(a),
            _ => false,
        },
        Op::NotIn => match (actual, expected.as_array()) {
            (Some(a), Some(arr)) => !arr.contains(a),
            (None, _) => false,
            _ => false,
        },
        Op::Gt | Op::Lt | Op::Gte | Op::Lte => {
            let Some(a) = actual else { return false };
            ordering(a, expected)
                .map(|ord| match op {
                    Op::Gt => ord == std::cmp::Ordering::Greater,
                    Op::Lt => ord == std::cmp::Ordering::Less,
                    Op::Gte => ord != std::cmp::Ordering::Less,
                    Op::Lte => ord != std::cmp::Ordering::Greater,
                    _ => unreachable!(),
                })
                .unwrap_or(false)
        }
    }
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}
