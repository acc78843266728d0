//! In-memory reference implementation of [`DocumentStore`]
//!
//! Single process, shared by any number of simulated clients. Each call
//! suspends once before touching state (a yield, or a configurable sleep) so
//! that concurrent clients interleave the way networked ones would.

use crate::document::{Document, Fields, Timestamp};
use crate::error::StoreError;
use crate::path::DocPath;
use crate::query::Query;
use crate::store::DocumentStore;
use crate::subscription::{Subscription, WatchId};
use crate::write::{apply_field_op, CommitResult, Precondition, Write};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Memory store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Simulated round-trip latency; `None` yields to the scheduler instead
    pub latency: Option<Duration>,
}

impl MemoryStoreConfig {
    /// Default configuration (yield only)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With simulated latency
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredDoc {
    fields: Fields,
    version: u64,
    create_time: Timestamp,
    update_time: Timestamp,
}

impl StoredDoc {
    fn to_document(&self, path: &DocPath) -> Document {
        Document {
            path: path.clone(),
            fields: self.fields.clone(),
            version: self.version,
            create_time: self.create_time,
            update_time: self.update_time,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    docs: BTreeMap<DocPath, StoredDoc>,
    version: u64,
    last_micros: i64,
}

impl StoreState {
    /// Strictly increasing server clock
    fn tick(&mut self) -> Timestamp {
        let wall = Timestamp::now().as_micros();
        self.last_micros = wall.max(self.last_micros + 1);
        Timestamp::from_micros(self.last_micros)
    }

    fn snapshot_doc(&self, path: &DocPath) -> Option<Document> {
        self.docs.get(path).map(|doc| doc.to_document(path))
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        query.apply(
            self.docs
                .iter()
                .filter(|(path, _)| path.parent() == query.collection)
                .map(|(path, doc)| doc.to_document(path)),
        )
    }
}

#[derive(Debug)]
enum Watcher {
    Doc {
        path: DocPath,
        tx: mpsc::UnboundedSender<Option<Document>>,
    },
    Query {
        query: Query,
        tx: mpsc::UnboundedSender<Vec<Document>>,
    },
}

#[derive(Debug, Default)]
struct WatchRegistry {
    next_id: AtomicU64,
    watchers: DashMap<WatchId, Watcher>,
}

impl WatchRegistry {
    fn register(&self, watcher: Watcher) -> WatchId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.watchers.insert(id, watcher);
        id
    }

    fn remove(&self, id: WatchId) {
        self.watchers.remove(&id);
    }

    fn notify(&self, state: &StoreState, touched: &[DocPath]) {
        let mut dead = Vec::new();
        for entry in &self.watchers {
            let delivered = match entry.value() {
                Watcher::Doc { path, tx } => {
                    !touched.contains(path) || tx.send(state.snapshot_doc(path)).is_ok()
                }
                Watcher::Query { query, tx } => {
                    !touched.iter().any(|p| p.parent() == query.collection)
                        || tx.send(state.run_query(query)).is_ok()
                }
            };
            if !delivered {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            tracing::debug!(watch_id = id, "dropping watcher with closed receiver");
            self.watchers.remove(&id);
        }
    }
}

/// Availability switches for exercising failure paths
#[derive(Debug, Default)]
struct FaultInjector {
    offline: AtomicBool,
    fail_next: AtomicU32,
}

impl FaultInjector {
    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected transport failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    state: RwLock<StoreState>,
    watchers: Arc<WatchRegistry>,
    faults: FaultInjector,
    ops: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with configuration
    #[must_use]
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Number of live watchers
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.watchers.len()
    }

    /// Number of documents stored
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.state.read().docs.len()
    }

    /// Number of calls served (including failed ones)
    #[must_use]
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    /// Fail the next `n` calls with [`StoreError::Unavailable`]
    pub fn fail_next(&self, n: u32) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Simulate losing the connection: every call fails and all watchers
    /// are dropped, ending their subscriptions
    pub fn go_offline(&self) {
        self.faults.offline.store(true, Ordering::SeqCst);
        self.disconnect_watchers();
        tracing::info!("memory store offline");
    }

    /// Restore service after [`go_offline`](Self::go_offline)
    pub fn go_online(&self) {
        self.faults.offline.store(false, Ordering::SeqCst);
        tracing::info!("memory store online");
    }

    /// Drop every watcher without going offline
    pub fn disconnect_watchers(&self) {
        self.watchers.watchers.clear();
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        match self.config.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.faults.check()
    }
}

/// Current state of `path`, looking through writes staged earlier in the batch
fn staged_doc(
    docs: &BTreeMap<DocPath, StoredDoc>,
    staged: &BTreeMap<DocPath, Option<StoredDoc>>,
    path: &DocPath,
) -> Option<StoredDoc> {
    match staged.get(path) {
        Some(doc) => doc.clone(),
        None => docs.get(path).cloned(),
    }
}

fn check_precondition(
    path: &DocPath,
    current: Option<&StoredDoc>,
    precondition: Precondition,
) -> Result<(), StoreError> {
    match (precondition, current) {
        (Precondition::None, _)
        | (Precondition::Exists, Some(_))
        | (Precondition::NotExists, None) => Ok(()),
        (Precondition::Exists, None) => Err(StoreError::NotFound(path.to_string())),
        (Precondition::NotExists, Some(_)) => Err(StoreError::AlreadyExists(path.to_string())),
        (Precondition::Version(expected), doc) => {
            let actual = doc.map(|d| d.version);
            if actual == Some(expected) {
                Ok(())
            } else {
                Err(StoreError::Conflict {
                    path: path.to_string(),
                    expected,
                    actual,
                })
            }
        }
    }
}

fn stage_write(
    docs: &BTreeMap<DocPath, StoredDoc>,
    staged: &mut BTreeMap<DocPath, Option<StoredDoc>>,
    write: &Write,
    version: u64,
    now: Timestamp,
) -> Result<(), StoreError> {
    let path = write.path();
    let current = staged_doc(docs, staged, path);
    check_precondition(path, current.as_ref(), write.precondition())?;

    match write {
        Write::Set { fields, merge, .. } => {
            let (mut merged, create_time) = match current {
                Some(doc) if *merge => (doc.fields, doc.create_time),
                Some(doc) => (Fields::new(), doc.create_time),
                None => (Fields::new(), now),
            };
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
            staged.insert(
                path.clone(),
                Some(StoredDoc {
                    fields: merged,
                    version,
                    create_time,
                    update_time: now,
                }),
            );
        }
        Write::Update { ops, .. } => {
            let Some(mut doc) = current else {
                return Err(StoreError::NotFound(path.to_string()));
            };
            for op in ops {
                apply_field_op(&mut doc.fields, op, now);
            }
            doc.version = version;
            doc.update_time = now;
            staged.insert(path.clone(), Some(doc));
        }
        Write::Delete { recursive, .. } => {
            if *recursive {
                let below: Vec<DocPath> = docs
                    .keys()
                    .chain(staged.keys())
                    .filter(|p| p.is_descendant_of(path))
                    .cloned()
                    .collect();
                for child in below {
                    staged.insert(child, None);
                }
            }
            staged.insert(path.clone(), None);
        }
        Write::Check { .. } => {}
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        self.round_trip().await?;
        Ok(self.state.read().snapshot_doc(path))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.round_trip().await?;
        Ok(self.state.read().run_query(query))
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult, StoreError> {
        self.round_trip().await?;

        let mut state = self.state.write();
        let version = state.version + 1;
        let now = state.tick();

        let mut staged: BTreeMap<DocPath, Option<StoredDoc>> = BTreeMap::new();
        for write in &writes {
            stage_write(&state.docs, &mut staged, write, version, now)?;
        }

        if staged.is_empty() {
            return Ok(CommitResult {
                version: state.version,
                commit_time: now,
                documents: Vec::new(),
            });
        }

        state.version = version;
        let touched: Vec<DocPath> = staged.keys().cloned().collect();
        for (path, doc) in staged {
            match doc {
                Some(doc) => {
                    state.docs.insert(path, doc);
                }
                None => {
                    state.docs.remove(&path);
                }
            }
        }

        let documents = writes
            .iter()
            .map(|w| state.snapshot_doc(w.path()))
            .collect();

        self.watchers.notify(&state, &touched);

        tracing::trace!(version, writes = writes.len(), "commit applied");
        Ok(CommitResult {
            version,
            commit_time: now,
            documents,
        })
    }

    async fn subscribe_doc(
        &self,
        path: &DocPath,
    ) -> Result<Subscription<Option<Document>>, StoreError> {
        self.round_trip().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        // Registration happens under the read lock so no commit can slip
        // between the initial snapshot and the first notification.
        let id = {
            let state = self.state.read();
            // Receiver is alive, send cannot fail.
            let _ = tx.send(state.snapshot_doc(path));
            self.watchers.register(Watcher::Doc {
                path: path.clone(),
                tx,
            })
        };

        let registry = Arc::clone(&self.watchers);
        Ok(Subscription::new(id, rx, move || registry.remove(id)))
    }

    async fn subscribe_query(&self, query: &Query) -> Result<Subscription<Vec<Document>>, StoreError> {
        self.round_trip().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let state = self.state.read();
            let _ = tx.send(state.run_query(query));
            self.watchers.register(Watcher::Query {
                query: query.clone(),
                tx,
            })
        };

        let registry = Arc::clone(&self.watchers);
        Ok(Subscription::new(id, rx, move || registry.remove(id)))
    }
}
