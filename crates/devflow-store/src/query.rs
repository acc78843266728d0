//! Collection queries
//!
//! Results are always totally ordered: after the requested `order_by` keys,
//! ties are broken by document id ascending.

use crate::document::Document;
use crate::path::CollectionPath;
use serde_json::Value;
use std::cmp::Ordering;

/// Field filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq(String, Value),
    /// Field differs from value (missing fields match)
    Ne(String, Value),
    /// Array field contains value
    ArrayContains(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, value) => doc.get(field) == Some(value),
            Self::Ne(field, value) => doc.get(field) != Some(value),
            Self::ArrayContains(field, value) => matches!(
                doc.get(field),
                Some(Value::Array(items)) if items.contains(value)
            ),
            Self::In(field, values) => doc.get(field).is_some_and(|v| values.contains(v)),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name (missing fields sort as null)
    pub field: String,
    /// Direction
    pub direction: Direction,
}

/// Query over a single collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection scanned
    pub collection: CollectionPath,
    /// Conjunction of filters
    pub filters: Vec<Filter>,
    /// Sort keys in priority order
    pub order_by: Vec<OrderBy>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl Query {
    /// Query every document of a collection
    #[must_use]
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Add a filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Field equals value
    #[must_use]
    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.to_string(), value.into()))
    }

    /// Array field contains value
    #[must_use]
    pub fn array_contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::ArrayContains(field.to_string(), value.into()))
    }

    /// Add a sort key
    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    /// Cap the result size
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document belongs to the result set (ignores limit)
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        doc.path.parent() == self.collection && self.filters.iter().all(|f| f.matches(doc))
    }

    /// Compare two documents under this query's ordering
    #[must_use]
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.order_by {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = match key.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id().cmp(b.id())
    }

    /// Filter, sort and limit a set of candidate documents
    #[must_use]
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        out.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values
///
/// Values of different types order by type (null, bool, number, string,
/// array, object); arrays compare element-wise; objects compare by length.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Fields, Timestamp};
    use serde_json::json;

    fn doc(id: &str, fields: serde_json::Value) -> Document {
        let fields: Fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        Document {
            path: format!("projects/{id}").parse().unwrap(),
            fields,
            version: 1,
            create_time: Timestamp::from_micros(0),
            update_time: Timestamp::from_micros(0),
        }
    }

    fn projects() -> CollectionPath {
        CollectionPath::root("projects").unwrap()
    }

    #[test]
    fn descending_with_id_tiebreak() {
        let q = Query::new(projects()).order_by("createdAt", Direction::Descending);
        let out = q.apply(vec![
            doc("b", json!({"createdAt": 5})),
            doc("a", json!({"createdAt": 5})),
            doc("c", json!({"createdAt": 9})),
        ]);
        let ids: Vec<&str> = out.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn filters_are_conjunctive() {
        let q = Query::new(projects())
            .where_eq("isPublic", true)
            .array_contains("collaborators", "u2");
        let out = q.apply(vec![
            doc("a", json!({"isPublic": true, "collaborators": ["u2"]})),
            doc("b", json!({"isPublic": false, "collaborators": ["u2"]})),
            doc("c", json!({"isPublic": true, "collaborators": []})),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "a");
    }

    #[test]
    fn other_collections_do_not_match() {
        let q = Query::new(projects());
        let mut chat = doc("x", json!({}));
        chat.path = "projects/p1/chat/x".parse().unwrap();
        assert!(!q.matches(&chat));
    }

    #[test]
    fn limit_truncates_after_sort() {
        let q = Query::new(projects())
            .order_by("n", Direction::Ascending)
            .limit(2);
        let out = q.apply(vec![
            doc("a", json!({"n": 3})),
            doc("b", json!({"n": 1})),
            doc("c", json!({"n": 2})),
        ]);
        let ids: Vec<&str> = out.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn mixed_types_order_by_rank() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!("a"), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Ordering::Less);
    }
}
