//! DevFlow Store - document database contract
//!
//! A hierarchical, multi-writer document store with:
//! - Atomic multi-document commits guarded by preconditions
//! - Per-commit versions for optimistic concurrency
//! - Strictly increasing server timestamps
//! - Live document and query subscriptions
//!
//! [`MemoryStore`] is the in-process reference engine used by tests and the
//! simulator. It can be taken offline or made to fail on demand.
//!
//! # Example
//!
//! ```rust,ignore
//! use devflow_store::{DocumentStore, MemoryStore, Write};
//!
//! # async fn example() -> Result<(), devflow_store::StoreError> {
//! let store = MemoryStore::new();
//! let path = "projects/p1".parse()?;
//! let doc = store.set(&path, serde_json::Map::new(), false).await?;
//!
//! // Only succeeds if nobody wrote in between
//! store
//!     .commit(vec![Write::set(path, serde_json::Map::new()).if_version(doc.version)])
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod document;
pub mod error;
pub mod memory;
pub mod path;
pub mod query;
pub mod store;
pub mod subscription;
pub mod write;

pub use document::{encode_fields, Document, Fields, Timestamp};
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use path::{CollectionPath, DocPath};
pub use query::{compare_values, Direction, Filter, OrderBy, Query};
pub use store::DocumentStore;
pub use subscription::{Subscription, WatchId};
pub use write::{CommitResult, FieldOp, Precondition, Write};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
