//! The document store contract
//!
//! Every call is an asynchronous round trip and therefore a point where the
//! operation may be delayed, fail with [`StoreError::Unavailable`], or race
//! with another client's write.

use crate::document::{Document, Fields};
use crate::error::StoreError;
use crate::path::{CollectionPath, DocPath};
use crate::query::Query;
use crate::subscription::Subscription;
use crate::write::{CommitResult, FieldOp, Precondition, Write};
use async_trait::async_trait;
use std::fmt::Debug;

/// Networked multi-reader/multi-writer document database
///
/// Implementations must guarantee:
/// - `commit` is atomic: all writes land or none do
/// - preconditions are checked against the state the commit is applied to
/// - every commit assigns a strictly greater version than any before it
/// - server timestamps are strictly increasing across commits
/// - subscriptions deliver the full current state on subscribe and after
///   every commit touching their target, in commit order
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Read a single document
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// Run a collection query
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Atomically apply a batch of writes
    async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult, StoreError>;

    /// Watch a single document (`None` while it does not exist)
    async fn subscribe_doc(
        &self,
        path: &DocPath,
    ) -> Result<Subscription<Option<Document>>, StoreError>;

    /// Watch the result set of a query
    async fn subscribe_query(&self, query: &Query) -> Result<Subscription<Vec<Document>>, StoreError>;

    /// Overwrite, or merge into, a document
    async fn set(&self, path: &DocPath, fields: Fields, merge: bool) -> Result<Document, StoreError> {
        let write = if merge {
            Write::merge(path.clone(), fields)
        } else {
            Write::set(path.clone(), fields)
        };
        let result = self.commit(vec![write]).await?;
        result
            .first()
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    /// Apply field ops to an existing document
    async fn update(
        &self,
        path: &DocPath,
        ops: Vec<FieldOp>,
        precondition: Precondition,
    ) -> Result<Document, StoreError> {
        let guard = match precondition {
            Precondition::None => Precondition::Exists,
            other => other,
        };
        let result = self
            .commit(vec![Write::update(path.clone(), ops).with_precondition(guard)])
            .await?;
        result
            .first()
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    /// Delete a document, optionally with everything below it
    async fn delete(&self, path: &DocPath, recursive: bool) -> Result<(), StoreError> {
        let write = if recursive {
            Write::delete_recursive(path.clone())
        } else {
            Write::delete(path.clone())
        };
        self.commit(vec![write]).await.map(|_| ())
    }

    /// Create a document with a generated id, then apply `ops` in the same commit
    async fn add(
        &self,
        collection: &CollectionPath,
        fields: Fields,
        ops: Vec<FieldOp>,
    ) -> Result<Document, StoreError> {
        self.add_guarded(collection, fields, ops, Vec::new()).await
    }

    /// Like [`add`](Self::add), committed only if every guard in `checks` holds
    ///
    /// A failed guard fails the whole commit with the precondition's error
    /// (`NotFound` for a missing document under [`Precondition::Exists`]).
    async fn add_guarded(
        &self,
        collection: &CollectionPath,
        fields: Fields,
        ops: Vec<FieldOp>,
        checks: Vec<(DocPath, Precondition)>,
    ) -> Result<Document, StoreError> {
        let path = collection.new_doc();
        let mut writes: Vec<Write> = checks
            .into_iter()
            .map(|(guarded, precondition)| Write::check(guarded, precondition))
            .collect();
        writes.push(Write::create(path.clone(), fields));
        if !ops.is_empty() {
            writes.push(Write::update(path.clone(), ops));
        }
        let result = self.commit(writes).await?;
        result
            .documents
            .last()
            .cloned()
            .flatten()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
