//! Live sync controller
//!
//! Mirrors a project document (and optionally its chat) into a local
//! [`ViewState`] that is replaced wholesale on every server snapshot.
//!
//! Key properties:
//! - One active view per (project, viewer); mounting again replaces it
//! - Optimistic local edits last until the next snapshot or a rollback
//! - Chat is subscribed while the viewer's role allows it, and dropped when
//!   the role no longer does
//! - After [`ProjectView::unmount`] returns the state never changes again

use crate::auth::{permits, role_of, Action, Role};
use crate::chat::{ChatService, ChatSubscription};
use crate::error::Result;
use crate::gate::CallbackGate;
use crate::repository::ProjectRepository;
use crate::types::{ChatMessage, Project, ProjectId, Uid};
use dashmap::DashMap;
use devflow_store::{Document, Subscription};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connection status of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    /// Waiting for the first snapshot
    #[default]
    Loading,
    /// Showing server state
    Live,
    /// Private project, viewer is a visitor
    Forbidden,
    /// Project does not exist (or was deleted)
    NotFound,
    /// Store connection lost; subscriptions released
    Disconnected,
    /// Unmounted
    Closed,
}

/// Local view of one project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    /// Project as displayed, optimistic edits included
    pub project: Option<Project>,
    /// Project as last confirmed by the store
    pub confirmed: Option<Project>,
    /// Viewer's role on the confirmed project
    pub role: Option<Role>,
    /// Status
    pub status: ViewStatus,
    /// Ordered chat, when subscribed
    pub messages: Vec<ChatMessage>,
    /// Chat subscription is live
    pub chat_active: bool,
    /// `project` differs from `confirmed` by a local edit
    pub pending_optimistic: bool,
}

type ViewKey = (ProjectId, Option<Uid>);

#[derive(Debug)]
struct ViewInner {
    project_id: ProjectId,
    viewer: Option<Uid>,
    with_chat: bool,
    gate: CallbackGate,
    state: watch::Sender<ViewState>,
    chat: Mutex<Option<ChatSubscription>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ViewInner {
    /// Modify the state unless the view is closed
    fn update(&self, f: impl FnOnce(&mut ViewState)) -> bool {
        self.gate.run(|| self.state.send_modify(f))
    }

    fn drop_chat(&self) {
        let chat = self.chat.lock().take();
        if chat.is_some() {
            drop(chat);
            self.update(|state| {
                state.messages.clear();
                state.chat_active = false;
            });
        }
    }

    /// Replace the state with a server snapshot; returns the viewer's role
    /// when the project is visible
    fn apply_snapshot(&self, snapshot: Option<Document>) -> Option<Role> {
        let Some(doc) = snapshot else {
            self.update(|state| {
                state.project = None;
                state.confirmed = None;
                state.role = None;
                state.status = ViewStatus::NotFound;
                state.pending_optimistic = false;
            });
            return None;
        };

        let project = match ProjectRepository::decode(&doc) {
            Ok(project) => project,
            Err(err) => {
                tracing::warn!(path = %doc.path, error = %err, "skipping undecodable project snapshot");
                let state = self.state.borrow();
                return state.role.filter(|_| state.status == ViewStatus::Live);
            }
        };

        let role = role_of(self.viewer.as_ref(), &project);
        if permits(role, Action::View, project.is_public) {
            self.update(|state| {
                state.project = Some(project.clone());
                state.confirmed = Some(project);
                state.role = Some(role);
                state.status = ViewStatus::Live;
                state.pending_optimistic = false;
            });
            Some(role)
        } else {
            self.update(|state| {
                state.project = None;
                state.confirmed = None;
                state.role = Some(role);
                state.status = ViewStatus::Forbidden;
                state.pending_optimistic = false;
            });
            None
        }
    }

    /// Subscribe or drop the chat to match the viewer's current role
    async fn sync_chat(self: &Arc<Self>, chat: &ChatService, role: Option<Role>) {
        let wanted = self.with_chat && role.is_some_and(|r| permits(r, Action::ReadChat, false));
        let present = self.chat.lock().as_ref().is_some_and(ChatSubscription::is_active);

        match (wanted, present, self.viewer.as_ref()) {
            (true, false, Some(viewer)) => {
                let weak = Arc::downgrade(self);
                let subscribed = chat
                    .subscribe(&self.project_id, viewer, move |messages| {
                        if let Some(inner) = weak.upgrade() {
                            inner.update(|state| {
                                state.messages = messages;
                                state.chat_active = true;
                            });
                        }
                    })
                    .await;
                match subscribed {
                    Ok(subscription) => {
                        let rejected = {
                            let mut slot = self.chat.lock();
                            if self.gate.is_open() {
                                slot.replace(subscription)
                            } else {
                                Some(subscription)
                            }
                        };
                        drop(rejected);
                    }
                    Err(err) => {
                        tracing::debug!(project = %self.project_id, error = %err, "chat not available to view");
                    }
                }
            }
            // The feed may already have ended on its own; drop it either way.
            (false, _, _) => self.drop_chat(),
            _ => {}
        }
    }

    fn disconnect(&self) {
        self.update(|state| state.status = ViewStatus::Disconnected);
        self.drop_chat();
        tracing::warn!(project = %self.project_id, "project view disconnected");
    }

    /// Close the view; returns `false` if already closed
    fn close(&self) -> bool {
        self.update(|state| {
            state.status = ViewStatus::Closed;
            state.chat_active = false;
        });
        let closed = self.gate.close();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let chat = self.chat.lock().take();
        drop(chat);
        closed
    }
}

async fn drive(weak: Weak<ViewInner>, mut feed: Subscription<Option<Document>>, chat: ChatService) {
    while let Some(snapshot) = feed.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.gate.is_open() {
            return;
        }
        let role = inner.apply_snapshot(snapshot);
        inner.sync_chat(&chat, role).await;
    }
    feed.unsubscribe();
    if let Some(inner) = weak.upgrade() {
        if inner.gate.is_open() {
            inner.disconnect();
        }
    }
}

/// Handle to a mounted project view
///
/// Dropping it unmounts.
#[derive(Debug)]
pub struct ProjectView {
    inner: Arc<ViewInner>,
    views: Arc<DashMap<ViewKey, Arc<ViewInner>>>,
}

impl ProjectView {
    /// Project being viewed
    #[inline]
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.inner.project_id
    }

    /// Viewer, `None` for anonymous
    #[inline]
    #[must_use]
    pub fn viewer(&self) -> Option<&Uid> {
        self.inner.viewer.as_ref()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ViewState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ViewState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&ViewState) -> bool) -> ViewState {
        let mut rx = self.watch();
        // The sender lives as long as `self`, so waiting cannot fail.
        let reached = rx.wait_for(predicate).await.map(|state| state.clone());
        reached.unwrap_or_else(|_| self.state())
    }

    /// Still mounted
    #[inline]
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.gate.is_open()
    }

    /// Edit the displayed project ahead of the server
    ///
    /// Returns `false` when there is no project on display. The next
    /// snapshot overwrites the edit.
    pub fn apply_optimistic(&self, edit: impl FnOnce(&mut Project)) -> bool {
        let mut applied = false;
        self.inner.update(|state| {
            if state.status != ViewStatus::Live {
                return;
            }
            if let Some(project) = state.project.as_mut() {
                edit(project);
                state.pending_optimistic = true;
                applied = true;
            }
        });
        applied
    }

    /// Discard optimistic edits, back to the last confirmed project
    pub fn rollback(&self) {
        self.inner.update(|state| {
            if state.pending_optimistic {
                state.project.clone_from(&state.confirmed);
                state.pending_optimistic = false;
            }
        });
    }

    /// Stop syncing. Idempotent.
    pub fn unmount(&mut self) {
        if self.inner.close() {
            let key = (self.inner.project_id.clone(), self.inner.viewer.clone());
            self.views.remove_if(&key, |_, current| Arc::ptr_eq(current, &self.inner));
            tracing::debug!(project = %self.inner.project_id, "project view unmounted");
        }
    }
}

impl Drop for ProjectView {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Registry of mounted project views
#[derive(Debug, Clone)]
pub struct LiveSyncController {
    repo: ProjectRepository,
    chat: ChatService,
    views: Arc<DashMap<ViewKey, Arc<ViewInner>>>,
}

impl LiveSyncController {
    /// Create over the project and chat services
    #[must_use]
    pub fn new(repo: ProjectRepository, chat: ChatService) -> Self {
        Self {
            repo,
            chat,
            views: Arc::new(DashMap::new()),
        }
    }

    /// Mounted views
    #[must_use]
    pub fn active_views(&self) -> usize {
        self.views.len()
    }

    /// Start mirroring a project for `viewer`
    ///
    /// Replaces a view of the same project already mounted for the same
    /// viewer. Fails if the store cannot be reached.
    pub async fn mount(&self, id: &ProjectId, viewer: Option<&Uid>, with_chat: bool) -> Result<ProjectView> {
        let path = ProjectRepository::project_path(id)?;
        let feed = self.repo.store().subscribe_doc(&path).await?;

        let inner = Arc::new(ViewInner {
            project_id: id.clone(),
            viewer: viewer.cloned(),
            with_chat,
            gate: CallbackGate::new(),
            state: watch::Sender::new(ViewState::default()),
            chat: Mutex::new(None),
            task: Mutex::new(None),
        });

        let key = (id.clone(), viewer.cloned());
        if let Some(previous) = self.views.insert(key, Arc::clone(&inner)) {
            previous.close();
            tracing::debug!(project = %id, "replaced mounted view");
        }

        let task = tokio::spawn(drive(Arc::downgrade(&inner), feed, self.chat.clone()));
        *inner.task.lock() = Some(task);

        tracing::debug!(project = %id, viewer = ?viewer, with_chat, "project view mounted");
        Ok(ProjectView {
            inner,
            views: Arc::clone(&self.views),
        })
    }
}
