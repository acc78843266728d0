//! Write operations and preconditions
//!
//! A [`Write`] is applied as part of an atomic commit: either every write in
//! the batch lands or none does. Preconditions are evaluated against the
//! state the batch sees, which is how optimistic concurrency is expressed.

use crate::document::{Document, Fields, Timestamp};
use crate::path::DocPath;
use serde_json::Value;

/// Guard evaluated atomically before a write is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// No guard
    #[default]
    None,
    /// Document must exist
    Exists,
    /// Document must not exist
    NotExists,
    /// Document must exist with exactly this version
    Version(u64),
}

/// Single field transformation used by [`Write::Update`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Replace a field
    Set(String, Value),
    /// Remove a field
    Delete(String),
    /// Append values not already present (set semantics)
    ArrayUnion(String, Vec<Value>),
    /// Remove every occurrence of the values
    ArrayRemove(String, Vec<Value>),
    /// Set the field to the commit's server time
    ServerTimestamp(String),
}

impl FieldOp {
    /// Field this op touches
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Set(field, _)
            | Self::Delete(field)
            | Self::ArrayUnion(field, _)
            | Self::ArrayRemove(field, _)
            | Self::ServerTimestamp(field) => field,
        }
    }
}

/// One write in a commit
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace (or merge into) a document
    Set {
        /// Target document
        path: DocPath,
        /// New fields
        fields: Fields,
        /// Keep fields not mentioned in `fields`
        merge: bool,
        /// Guard
        precondition: Precondition,
    },
    /// Apply field ops to an existing document
    Update {
        /// Target document
        path: DocPath,
        /// Ops in order
        ops: Vec<FieldOp>,
        /// Guard (existence is always required)
        precondition: Precondition,
    },
    /// Remove a document
    Delete {
        /// Target document
        path: DocPath,
        /// Also remove every document below it
        recursive: bool,
        /// Guard
        precondition: Precondition,
    },
    /// Assert a guard without touching the document
    Check {
        /// Guarded document
        path: DocPath,
        /// Guard
        precondition: Precondition,
    },
}

impl Write {
    /// Create a document that must not exist yet
    #[must_use]
    pub fn create(path: DocPath, fields: Fields) -> Self {
        Self::Set {
            path,
            fields,
            merge: false,
            precondition: Precondition::NotExists,
        }
    }

    /// Overwrite a document
    #[must_use]
    pub fn set(path: DocPath, fields: Fields) -> Self {
        Self::Set {
            path,
            fields,
            merge: false,
            precondition: Precondition::None,
        }
    }

    /// Merge fields into a document, creating it if missing
    #[must_use]
    pub fn merge(path: DocPath, fields: Fields) -> Self {
        Self::Set {
            path,
            fields,
            merge: true,
            precondition: Precondition::None,
        }
    }

    /// Apply ops to an existing document
    #[must_use]
    pub fn update(path: DocPath, ops: Vec<FieldOp>) -> Self {
        Self::Update {
            path,
            ops,
            precondition: Precondition::Exists,
        }
    }

    /// Delete a single document
    #[must_use]
    pub fn delete(path: DocPath) -> Self {
        Self::Delete {
            path,
            recursive: false,
            precondition: Precondition::None,
        }
    }

    /// Delete a document and everything below it
    #[must_use]
    pub fn delete_recursive(path: DocPath) -> Self {
        Self::Delete {
            path,
            recursive: true,
            precondition: Precondition::None,
        }
    }

    /// Fail the commit unless `path` satisfies `precondition`
    #[must_use]
    pub fn check(path: DocPath, precondition: Precondition) -> Self {
        Self::Check { path, precondition }
    }

    /// Replace the guard
    #[must_use]
    pub fn with_precondition(mut self, guard: Precondition) -> Self {
        match &mut self {
            Self::Set { precondition, .. }
            | Self::Update { precondition, .. }
            | Self::Delete { precondition, .. }
            | Self::Check { precondition, .. } => *precondition = guard,
        }
        self
    }

    /// Guard on the version the caller read
    #[inline]
    #[must_use]
    pub fn if_version(self, version: u64) -> Self {
        self.with_precondition(Precondition::Version(version))
    }

    /// Target path
    #[must_use]
    pub fn path(&self) -> &DocPath {
        match self {
            Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path, .. }
            | Self::Check { path, .. } => path,
        }
    }

    /// Guard
    #[must_use]
    pub fn precondition(&self) -> Precondition {
        match self {
            Self::Set { precondition, .. }
            | Self::Update { precondition, .. }
            | Self::Delete { precondition, .. }
            | Self::Check { precondition, .. } => *precondition,
        }
    }
}

/// Outcome of a successful commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    /// Version assigned to every document the commit touched
    pub version: u64,
    /// Server time of the commit
    pub commit_time: Timestamp,
    /// State of each write's target after the commit, in write order
    pub documents: Vec<Option<Document>>,
}

impl CommitResult {
    /// State of the first write's target
    #[must_use]
    pub fn first(&self) -> Option<&Document> {
        self.documents.first().and_then(Option::as_ref)
    }
}

/// Apply a single field op to a field map
pub(crate) fn apply_field_op(fields: &mut Fields, op: &FieldOp, now: Timestamp) {
    match op {
        FieldOp::Set(field, value) => {
            fields.insert(field.clone(), value.clone());
        }
        FieldOp::Delete(field) => {
            fields.remove(field);
        }
        FieldOp::ArrayUnion(field, values) => {
            let mut items = match fields.remove(field) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            fields.insert(field.clone(), Value::Array(items));
        }
        FieldOp::ArrayRemove(field, values) => {
            let mut items = match fields.remove(field) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            items.retain(|item| !values.contains(item));
            fields.insert(field.clone(), Value::Array(items));
        }
        FieldOp::ServerTimestamp(field) => {
            fields.insert(field.clone(), now.into());
        }
    }
}
