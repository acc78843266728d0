//! Core types for DevFlow
//!
//! Defines the documents the engine keeps in the store:
//! - Projects with their embedded, ordered task list
//! - Chat messages of a project's chat sub-collection
//! - User profiles kept in the user directory
//!
//! and the request shapes the services accept.

use devflow_store::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Stable user identifier issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Wrap a raw identifier
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Uid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Uid> for serde_json::Value {
    fn from(value: &Uid) -> Self {
        Self::String(value.0.clone())
    }
}

/// Project document id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Wrap a raw document id
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw document id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a caller addresses a task inside a project
///
/// `Index` is resolved against the server state the mutation reads, so it
/// may hit a different task than the caller saw if the list changed in
/// between. `Id` always hits the same task or fails with `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Position in the task list
    Index(usize),
    /// Stable task id
    Id(TaskId),
}

impl From<usize> for TaskKey {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl From<TaskId> for TaskKey {
    fn from(value: TaskId) -> Self {
        Self::Id(value)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    #[default]
    Pending,
    /// Being worked on
    InProgress,
    /// Finished (terminal)
    Done,
}

impl TaskStatus {
    /// All statuses
    pub const ALL: [TaskStatus; 3] = [Self::Pending, Self::InProgress, Self::Done];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Check if no further status change is allowed
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task embedded in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable id
    pub id: TaskId,
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Assignee (owner or collaborator)
    pub assigned_to: Uid,
    /// Status
    pub status: TaskStatus,
    /// Creation time
    pub created_at: Timestamp,
}

/// Project document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Document id
    pub id: ProjectId,
    /// Creator, immutable
    pub owner_id: Uid,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Repository URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// Visible to visitors
    #[serde(default)]
    pub is_public: bool,
    /// Members other than the owner
    #[serde(default)]
    pub collaborators: Vec<Uid>,
    /// Ordered task list
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Server time of creation
    pub created_at: Timestamp,
    /// Server time of the last mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Store version this value was read at
    #[serde(skip)]
    pub version: u64,
}

impl Project {
    /// Check if `uid` is the owner
    #[inline]
    #[must_use]
    pub fn is_owner(&self, uid: &Uid) -> bool {
        self.owner_id == *uid
    }

    /// Check if `uid` is a collaborator
    #[inline]
    #[must_use]
    pub fn is_collaborator(&self, uid: &Uid) -> bool {
        self.collaborators.contains(uid)
    }

    /// Owner or collaborator
    #[inline]
    #[must_use]
    pub fn is_member(&self, uid: &Uid) -> bool {
        self.is_owner(uid) || self.is_collaborator(uid)
    }

    /// Tasks assigned to `uid`, with their positions
    pub fn tasks_assigned_to<'a>(&'a self, uid: &'a Uid) -> impl Iterator<Item = (usize, &'a Task)> + 'a {
        self.tasks
            .iter()
            .enumerate()
            .filter(move |(_, task)| task.assigned_to == *uid)
    }

    /// Find a task position
    #[must_use]
    pub fn position(&self, key: TaskKey) -> Option<usize> {
        match key {
            TaskKey::Index(index) => (index < self.tasks.len()).then_some(index),
            TaskKey::Id(id) => self.tasks.iter().position(|task| task.id == id),
        }
    }

    /// Describe every broken data invariant (empty when consistent)
    #[must_use]
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.is_collaborator(&self.owner_id) {
            problems.push(format!("owner {} listed as collaborator", self.owner_id));
        }
        for (index, task) in self.tasks.iter().enumerate() {
            if !self.is_member(&task.assigned_to) {
                problems.push(format!(
                    "task #{index} assigned to non-member {}",
                    task.assigned_to
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for uid in &self.collaborators {
            if !seen.insert(uid) {
                problems.push(format!("collaborator {uid} listed twice"));
            }
        }
        problems
    }
}

/// Chat message in a project's chat sub-collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Document id
    pub id: String,
    /// Body
    pub text: String,
    /// Author
    pub sender_uid: Uid,
    /// Author display name at posting time
    pub sender_display_name: String,
    /// Author photo at posting time
    #[serde(rename = "senderPhotoURL", default)]
    pub sender_photo_url: Option<String>,
    /// Server time of posting
    pub created_at: Timestamp,
}

/// Profile kept in the user directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id
    pub uid: Uid,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar URL
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    /// Username at the identity provider
    #[serde(default)]
    pub external_username: Option<String>,
    /// Server time of the last sign-in
    #[serde(default)]
    pub last_login_at: Option<Timestamp>,
}

impl UserProfile {
    /// Name to show next to the user's content
    ///
    /// Falls back to the email, then the uid.
    #[must_use]
    pub fn display_label(&self) -> String {
        [&self.display_name, &self.email]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map_or_else(|| self.uid.to_string(), str::to_string)
    }
}

/// Fields for a new project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Repository URL
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Visible to visitors
    #[serde(default)]
    pub is_public: bool,
}

impl NewProject {
    /// Create with title and description
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// With repository URL
    #[inline]
    #[must_use]
    pub fn with_repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }

    /// Make public
    #[inline]
    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }
}

/// Owner edit of project fields
///
/// `repo_url: Some(None)` clears the URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New repository URL
    pub repo_url: Option<Option<String>>,
    /// New visibility
    pub is_public: Option<bool>,
}

impl ProjectPatch {
    /// Empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With repository URL (`None` clears it)
    #[inline]
    #[must_use]
    pub fn with_repo_url(mut self, url: Option<String>) -> Self {
        self.repo_url = Some(url);
        self
    }

    /// With visibility
    #[inline]
    #[must_use]
    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }
}

/// Fields for a new task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Assignee
    pub assigned_to: Uid,
}

impl NewTask {
    /// Create a task for `assignee`
    #[must_use]
    pub fn new(title: impl Into<String>, assignee: impl Into<Uid>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            assigned_to: assignee.into(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Owner edit of a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New assignee
    pub assigned_to: Option<Uid>,
    /// New status
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    /// Empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With assignee
    #[inline]
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<Uid>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Open task assigned to a user, with its project context
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedTask {
    /// Project id
    pub project_id: ProjectId,
    /// Project title
    pub project_title: String,
    /// Project owner
    pub owner_id: Uid,
    /// Current position in the task list
    pub index: usize,
    /// The task
    pub task: Task,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> Project {
        Project {
            id: "p1".into(),
            owner_id: "owner".into(),
            title: "X".into(),
            description: "Y".into(),
            repo_url: None,
            is_public: true,
            collaborators: vec!["u2".into()],
            tasks: vec![Task {
                id: TaskId::new(),
                title: "T1".into(),
                description: String::new(),
                assigned_to: "u2".into(),
                status: TaskStatus::Pending,
                created_at: Timestamp::from_micros(1),
            }],
            created_at: Timestamp::from_micros(1),
            updated_at: None,
            version: 3,
        }
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_value(TaskStatus::InProgress).unwrap(), json!("in_progress"));
        assert_eq!(
            serde_json::from_value::<TaskStatus>(json!("done")).unwrap(),
            TaskStatus::Done
        );
    }

    #[test]
    fn project_wire_shape() {
        let value = serde_json::to_value(project()).unwrap();
        assert_eq!(value["ownerId"], json!("owner"));
        assert_eq!(value["isPublic"], json!(true));
        assert_eq!(value["tasks"][0]["assignedTo"], json!("u2"));
        assert!(value.get("version").is_none());
        assert!(value.get("updatedAt").is_none());
    }

    #[test]
    fn position_by_index_and_id() {
        let p = project();
        let id = p.tasks[0].id;
        assert_eq!(p.position(TaskKey::Index(0)), Some(0));
        assert_eq!(p.position(TaskKey::Index(1)), None);
        assert_eq!(p.position(TaskKey::Id(id)), Some(0));
        assert_eq!(p.position(TaskKey::Id(TaskId::new())), None);
    }

    #[test]
    fn invariants_detect_owner_as_collaborator() {
        let mut p = project();
        assert!(p.invariant_violations().is_empty());
        p.collaborators.push("owner".into());
        p.tasks[0].assigned_to = "stranger".into();
        assert_eq!(p.invariant_violations().len(), 2);
    }

    #[test]
    fn display_label_fallbacks() {
        let mut profile = UserProfile {
            uid: "u1".into(),
            display_name: Some("  ".into()),
            email: Some("u1@example.com".into()),
            photo_url: None,
            external_username: None,
            last_login_at: None,
        };
        assert_eq!(profile.display_label(), "u1@example.com");
        profile.email = None;
        assert_eq!(profile.display_label(), "u1");
        profile.display_name = Some("Ada".into());
        assert_eq!(profile.display_label(), "Ada");
    }
}
