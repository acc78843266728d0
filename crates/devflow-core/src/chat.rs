//! Chat stream
//!
//! Append-only messages under `projects/{id}/chat`, ordered by server
//! timestamp. Subscribers receive the whole ordered list on every change.

use crate::auth::{authorize, permits, role_of, Action};
use crate::error::{DevflowError, Result};
use crate::gate::CallbackGate;
use crate::identity::UserDirectory;
use crate::repository::{object, ProjectRepository};
use crate::retry::retry_read;
use crate::types::{ChatMessage, ProjectId, Uid};
use devflow_store::{Direction, Document, FieldOp, Precondition, Query};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Decode a chat snapshot, skipping documents that do not decode
pub(crate) fn decode_messages(docs: &[Document]) -> Vec<ChatMessage> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<ChatMessage>() {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!(path = %doc.path, error = %err, "skipping undecodable chat message");
                None
            }
        })
        .collect()
}

/// Whether `viewer` may still read the chat of this project snapshot
///
/// An undecodable snapshot keeps the current access.
fn can_read(snapshot: Option<&Document>, viewer: &Uid) -> bool {
    let Some(doc) = snapshot else {
        return false;
    };
    match ProjectRepository::decode(doc) {
        Ok(project) => permits(role_of(Some(viewer), &project), Action::ReadChat, project.is_public),
        Err(err) => {
            tracing::warn!(path = %doc.path, error = %err, "skipping undecodable project snapshot");
            true
        }
    }
}

/// Live chat feed of one project
///
/// Dropping it unsubscribes.
pub struct ChatSubscription {
    project_id: ProjectId,
    gate: Arc<CallbackGate>,
    ended: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ChatSubscription {
    /// Project being watched
    #[inline]
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Still delivering messages
    ///
    /// False after [`unsubscribe`](Self::unsubscribe), after the store
    /// connection was lost and after the viewer lost access.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gate.is_open() && !self.ended.load(Ordering::SeqCst)
    }

    /// Stop delivery. Idempotent.
    ///
    /// When this returns no callback is running and none will run again.
    pub fn unsubscribe(&mut self) {
        if self.gate.close() {
            tracing::debug!(project = %self.project_id, "chat unsubscribed");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChatSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for ChatSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSubscription")
            .field("project_id", &self.project_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Chat operations
#[derive(Debug, Clone)]
pub struct ChatService {
    repo: ProjectRepository,
    directory: UserDirectory,
}

impl ChatService {
    /// Create over a repository and a user directory
    #[must_use]
    pub fn new(repo: ProjectRepository, directory: UserDirectory) -> Self {
        Self { repo, directory }
    }

    fn ordered(id: &ProjectId) -> Result<Query> {
        Ok(Query::new(ProjectRepository::chat_collection(id)?).order_by("createdAt", Direction::Ascending))
    }

    /// Append a message (owner or collaborator)
    pub async fn post_message(&self, id: &ProjectId, sender: &Uid, text: &str) -> Result<ChatMessage> {
        let project = self.repo.get_project(id).await?;
        authorize(Some(sender), &project, Action::PostMessage)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(DevflowError::validation("message must not be empty"));
        }
        let max = self.repo.config().chat.max_message_len;
        let len = text.chars().count();
        if len > max {
            return Err(DevflowError::validation(format!(
                "message is {len} characters, limit is {max}"
            )));
        }

        let profile = self.directory.profile(sender).await?;
        let display_name = profile
            .as_ref()
            .map_or_else(|| sender.to_string(), |p| p.display_label());
        let photo = profile.and_then(|p| p.photo_url).map_or(Value::Null, Value::String);

        let fields = object(json!({
            "text": text,
            "senderUid": sender,
            "senderDisplayName": display_name,
            "senderPhotoURL": photo,
        }));
        // The project must still exist when the message lands, or a
        // concurrent delete would leave it orphaned.
        let doc = self
            .repo
            .store()
            .add_guarded(
                &ProjectRepository::chat_collection(id)?,
                fields,
                vec![FieldOp::ServerTimestamp("createdAt".to_string())],
                vec![(ProjectRepository::project_path(id)?, Precondition::Exists)],
            )
            .await?;
        let message: ChatMessage = doc.decode()?;
        tracing::debug!(project = %id, sender = %sender, message = %message.id, "chat message posted");
        Ok(message)
    }

    /// Read the whole ordered chat once (owner or collaborator)
    pub async fn history(&self, id: &ProjectId, viewer: &Uid) -> Result<Vec<ChatMessage>> {
        let project = self.repo.get_project(id).await?;
        authorize(Some(viewer), &project, Action::ReadChat)?;
        let query = Self::ordered(id)?;
        let docs = retry_read(&self.repo.config().retry, "chat history", || async {
            Ok(self.repo.store().query(&query).await?)
        })
        .await?;
        Ok(decode_messages(&docs))
    }

    /// Watch the chat (owner or collaborator)
    ///
    /// `on_messages` receives the full ordered list right away and again
    /// after every new message. It runs on a runtime worker and must not
    /// block for long.
    ///
    /// The viewer's access is re-checked on every change to the project: the
    /// feed ends once they are no longer a member or the project is deleted.
    pub async fn subscribe<F>(&self, id: &ProjectId, viewer: &Uid, on_messages: F) -> Result<ChatSubscription>
    where
        F: Fn(Vec<ChatMessage>) + Send + Sync + 'static,
    {
        let project = self.repo.get_project(id).await?;
        authorize(Some(viewer), &project, Action::ReadChat)?;

        let mut access = self
            .repo
            .store()
            .subscribe_doc(&ProjectRepository::project_path(id)?)
            .await?;
        let mut feed = self.repo.store().subscribe_query(&Self::ordered(id)?).await?;
        let gate = Arc::new(CallbackGate::new());
        let ended = Arc::new(AtomicBool::new(false));

        let task = {
            let gate = Arc::clone(&gate);
            let ended = Arc::clone(&ended);
            let project_id = id.clone();
            let viewer = viewer.clone();
            tokio::spawn(async move {
                let revoked = loop {
                    // Project changes go first so a revocation committed
                    // before a message is seen before that message.
                    tokio::select! {
                        biased;
                        snapshot = access.next() => match snapshot {
                            None => break false,
                            Some(snapshot) => {
                                if !can_read(snapshot.as_ref(), &viewer) {
                                    break true;
                                }
                            }
                        },
                        docs = feed.next() => {
                            let Some(docs) = docs else {
                                break false;
                            };
                            let messages = decode_messages(&docs);
                            if !gate.run(|| on_messages(messages)) {
                                break false;
                            }
                        }
                    }
                };
                if revoked {
                    tracing::debug!(project = %project_id, viewer = %viewer, "chat access revoked");
                } else if gate.is_open() {
                    tracing::warn!(project = %project_id, "chat feed lost");
                }
                ended.store(true, Ordering::SeqCst);
            })
        };

        tracing::debug!(project = %id, viewer = %viewer, "chat subscribed");
        Ok(ChatSubscription {
            project_id: id.clone(),
            gate,
            ended,
            task: Some(task),
        })
    }
}
