//! Session facade
//!
//! [`Devflow`] wires the services over one store. [`Devflow::sign_in`]
//! authenticates once and returns a [`Session`] bound to the signed-in uid;
//! every session method passes that uid explicitly to the service it calls.

use crate::auth::Role;
use crate::chat::{ChatService, ChatSubscription};
use crate::config::DevflowConfig;
use crate::error::Result;
use crate::identity::{IdentityProvider, UserDirectory};
use crate::membership::Membership;
use crate::repository::ProjectRepository;
use crate::sync::{LiveSyncController, ProjectView};
use crate::tasks::TaskService;
use crate::types::{
    AssignedTask, ChatMessage, NewProject, NewTask, Project, ProjectId, ProjectPatch, Task, TaskKey,
    TaskPatch, TaskStatus, Uid, UserProfile,
};
use devflow_store::DocumentStore;
use std::sync::Arc;

/// All services over one document store
#[derive(Debug, Clone)]
pub struct Devflow {
    repo: ProjectRepository,
    membership: Membership,
    tasks: TaskService,
    chat: ChatService,
    directory: UserDirectory,
    sync: LiveSyncController,
}

impl Devflow {
    /// Wire the services over `store`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: DevflowConfig) -> Self {
        let directory = UserDirectory::new(Arc::clone(&store), &config.directory, config.retry);
        let repo = ProjectRepository::new(store, Arc::new(config));
        let chat = ChatService::new(repo.clone(), directory.clone());
        Self {
            membership: Membership::new(repo.clone()),
            tasks: TaskService::new(repo.clone()),
            sync: LiveSyncController::new(repo.clone(), chat.clone()),
            chat,
            directory,
            repo,
        }
    }

    /// Authenticate and record the user's profile
    pub async fn sign_in(&self, provider: &dyn IdentityProvider) -> Result<Session> {
        let identity = provider.authenticate().await?;
        let profile = self.directory.upsert(&identity).await?;
        Ok(Session {
            uid: identity.uid,
            profile,
            devflow: self.clone(),
        })
    }

    /// Project repository
    #[inline]
    #[must_use]
    pub fn projects(&self) -> &ProjectRepository {
        &self.repo
    }

    /// Membership operations
    #[inline]
    #[must_use]
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Task operations
    #[inline]
    #[must_use]
    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    /// Chat operations
    #[inline]
    #[must_use]
    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    /// User profiles
    #[inline]
    #[must_use]
    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Live views
    #[inline]
    #[must_use]
    pub fn sync(&self) -> &LiveSyncController {
        &self.sync
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DevflowConfig {
        self.repo.config()
    }
}

/// A signed-in user
#[derive(Debug, Clone)]
pub struct Session {
    uid: Uid,
    profile: UserProfile,
    devflow: Devflow,
}

impl Session {
    /// Signed-in uid
    #[inline]
    #[must_use]
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Profile as recorded at sign-in
    #[inline]
    #[must_use]
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Services this session runs against
    #[inline]
    #[must_use]
    pub fn devflow(&self) -> &Devflow {
        &self.devflow
    }

    // Projects

    /// Create a project owned by this user
    pub async fn create_project(&self, new: NewProject) -> Result<Project> {
        self.devflow.repo.create_project(&self.uid, new).await
    }

    /// Read a project with this user's role
    pub async fn view_project(&self, id: &ProjectId) -> Result<(Project, Role)> {
        self.devflow.repo.view_project(id, Some(&self.uid)).await
    }

    /// Patch a project this user owns
    pub async fn update_project(&self, id: &ProjectId, patch: ProjectPatch) -> Result<Project> {
        self.devflow.repo.update_project(id, &self.uid, patch).await
    }

    /// Delete a project this user owns, chat included
    pub async fn delete_project(&self, id: &ProjectId) -> Result<()> {
        self.devflow.repo.delete_project(id, &self.uid).await
    }

    /// Projects this user owns
    pub async fn my_projects(&self) -> Result<Vec<Project>> {
        self.devflow.repo.list_owned_projects(&self.uid).await
    }

    /// Every public project, own ones included
    pub async fn public_projects(&self) -> Result<Vec<Project>> {
        self.devflow.repo.list_public_projects().await
    }

    /// Public projects this user could join
    pub async fn available_projects(&self) -> Result<Vec<Project>> {
        self.devflow.repo.list_available_projects(&self.uid).await
    }

    /// Projects this user collaborates on
    pub async fn collaborating_projects(&self) -> Result<Vec<Project>> {
        self.devflow.repo.list_collaborating_projects(&self.uid).await
    }

    // Membership

    /// Collaborate on a public project
    pub async fn join(&self, id: &ProjectId) -> Result<Project> {
        self.devflow.membership.join(id, &self.uid).await
    }

    /// Stop collaborating on a project
    pub async fn leave(&self, id: &ProjectId) -> Result<Project> {
        self.devflow.membership.leave(id, &self.uid).await
    }

    /// Remove a collaborator from a project this user owns
    pub async fn remove_collaborator(&self, id: &ProjectId, uid: &Uid) -> Result<Project> {
        self.devflow.membership.remove_collaborator(id, &self.uid, uid).await
    }

    // Tasks

    /// Assign a task in a project this user owns
    pub async fn assign_task(&self, id: &ProjectId, new: NewTask) -> Result<Task> {
        self.devflow.tasks.assign_task(id, &self.uid, new).await
    }

    /// Move a task assigned to this user
    pub async fn set_task_status(&self, id: &ProjectId, key: impl Into<TaskKey>, status: TaskStatus) -> Result<Task> {
        self.devflow.tasks.set_task_status(id, key, &self.uid, status).await
    }

    /// Edit a task in a project this user owns
    pub async fn edit_task(&self, id: &ProjectId, key: impl Into<TaskKey>, patch: TaskPatch) -> Result<Task> {
        self.devflow.tasks.edit_task(id, key, &self.uid, patch).await
    }

    /// Delete a task in a project this user owns
    pub async fn delete_task(&self, id: &ProjectId, key: impl Into<TaskKey>) -> Result<Task> {
        self.devflow.tasks.delete_task(id, key, &self.uid).await
    }

    /// Open tasks assigned to this user
    pub async fn my_tasks(&self) -> Result<Vec<AssignedTask>> {
        self.devflow.tasks.list_assigned_tasks(&self.uid).await
    }

    // Chat

    /// Post to a project chat
    pub async fn post_message(&self, id: &ProjectId, text: &str) -> Result<ChatMessage> {
        self.devflow.chat.post_message(id, &self.uid, text).await
    }

    /// Read a project chat once
    pub async fn chat_history(&self, id: &ProjectId) -> Result<Vec<ChatMessage>> {
        self.devflow.chat.history(id, &self.uid).await
    }

    /// Watch a project chat
    pub async fn subscribe_chat<F>(&self, id: &ProjectId, on_messages: F) -> Result<ChatSubscription>
    where
        F: Fn(Vec<ChatMessage>) + Send + Sync + 'static,
    {
        self.devflow.chat.subscribe(id, &self.uid, on_messages).await
    }

    // Live views

    /// Mount a live view of a project as this user
    pub async fn mount(&self, id: &ProjectId, with_chat: bool) -> Result<ProjectView> {
        self.devflow.sync.mount(id, Some(&self.uid), with_chat).await
    }
}
