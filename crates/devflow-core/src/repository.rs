//! Project repository
//!
//! CRUD and listings over `projects/{id}`. Every mutation of an existing
//! project goes through [`ProjectRepository::transact`]: read the document
//! and its version, let the caller re-derive the actor's role and change a
//! copy, then write it back guarded by the version that was read. A version
//! conflict means another client wrote in between; the whole step is then
//! repeated on the new state, up to the configured budget.

use crate::auth::{authorize, Action, Role};
use crate::config::{DevflowConfig, ValidationConfig};
use crate::error::{DevflowError, Result};
use crate::retry::{backoff_delay, retry_read};
use crate::types::{NewProject, Project, ProjectId, ProjectPatch, Uid};
use devflow_store::{
    encode_fields, CollectionPath, Direction, DocPath, Document, DocumentStore, FieldOp, Fields,
    Query, StoreError, Write,
};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

const PROJECTS: &str = "projects";
const CHAT: &str = "chat";

/// Result of a transactional step
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    /// Nothing to write
    Unchanged(T),
    /// Write the modified project back
    Changed(T),
    /// Delete the project and everything below it
    Deleted(T),
}

/// Project CRUD and listings
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    store: Arc<dyn DocumentStore>,
    config: Arc<DevflowConfig>,
}

impl ProjectRepository {
    /// Create a repository over `store`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: Arc<DevflowConfig>) -> Self {
        Self { store, config }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DevflowConfig {
        &self.config
    }

    /// The `projects` collection
    pub fn projects() -> Result<CollectionPath> {
        Ok(CollectionPath::root(PROJECTS)?)
    }

    /// Path of a project document
    pub fn project_path(id: &ProjectId) -> Result<DocPath> {
        Ok(Self::projects()?.doc(id.as_str())?)
    }

    /// Chat sub-collection of a project
    pub fn chat_collection(id: &ProjectId) -> Result<CollectionPath> {
        Ok(Self::project_path(id)?.collection(CHAT)?)
    }

    /// Decode a stored project, keeping its version
    pub fn decode(doc: &Document) -> Result<Project> {
        let mut project: Project = doc.decode()?;
        project.version = doc.version;
        Ok(project)
    }

    /// Create a project owned by `owner`
    pub async fn create_project(&self, owner: &Uid, new: NewProject) -> Result<Project> {
        if owner.is_blank() {
            return Err(DevflowError::validation("owner id must not be empty"));
        }
        let repo_url = normalize_repo_url(new.repo_url);
        validate_project_fields(
            &self.config.validation,
            &new.title,
            &new.description,
            repo_url.as_deref(),
        )?;

        let mut fields = object(json!({
            "ownerId": owner,
            "title": new.title.trim(),
            "description": new.description.trim(),
            "isPublic": new.is_public,
            "collaborators": [],
            "tasks": [],
        }));
        if let Some(url) = repo_url {
            fields.insert("repoUrl".to_string(), Value::String(url));
        }

        let doc = self
            .store
            .add(
                &Self::projects()?,
                fields,
                vec![FieldOp::ServerTimestamp("createdAt".to_string())],
            )
            .await?;
        let project = Self::decode(&doc)?;
        tracing::info!(project = %project.id, owner = %owner, public = project.is_public, "project created");
        Ok(project)
    }

    /// Read a project, `None` if missing
    pub async fn find_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        let path = Self::project_path(id)?;
        let doc = retry_read(&self.config.retry, "project", || async {
            Ok(self.store.get(&path).await?)
        })
        .await?;
        doc.as_ref().map(Self::decode).transpose()
    }

    /// Read a project without any role check
    pub async fn get_project(&self, id: &ProjectId) -> Result<Project> {
        self.find_project(id)
            .await?
            .ok_or_else(|| DevflowError::not_found(format!("project {id}")))
    }

    /// Read a project as `viewer`
    ///
    /// Visitors, anonymous ones included, only see public projects.
    pub async fn view_project(&self, id: &ProjectId, viewer: Option<&Uid>) -> Result<(Project, Role)> {
        let project = self.get_project(id).await?;
        let role = authorize(viewer, &project, Action::View)?;
        Ok((project, role))
    }

    /// Patch project fields (owner only)
    pub async fn update_project(&self, id: &ProjectId, actor: &Uid, patch: ProjectPatch) -> Result<Project> {
        let limits = self.config.validation;
        let (project, ()) = self
            .transact(id, "update_project", |project| {
                authorize(Some(actor), project, Action::UpdateProject)?;

                let mut next = project.clone();
                if let Some(title) = &patch.title {
                    next.title = title.trim().to_string();
                }
                if let Some(description) = &patch.description {
                    next.description = description.trim().to_string();
                }
                if let Some(url) = &patch.repo_url {
                    next.repo_url = normalize_repo_url(url.clone());
                }
                if let Some(public) = patch.is_public {
                    next.is_public = public;
                }
                validate_project_fields(&limits, &next.title, &next.description, next.repo_url.as_deref())?;

                if next == *project {
                    return Ok(Outcome::Unchanged(()));
                }
                *project = next;
                Ok(Outcome::Changed(()))
            })
            .await?;
        Ok(project)
    }

    /// Delete a project and its chat (owner only)
    pub async fn delete_project(&self, id: &ProjectId, actor: &Uid) -> Result<()> {
        self.transact(id, "delete_project", |project| {
            authorize(Some(actor), project, Action::DeleteProject)?;
            Ok(Outcome::Deleted(()))
        })
        .await?;
        tracing::info!(project = %id, "project deleted");
        Ok(())
    }

    /// Projects owned by `uid`
    pub async fn list_owned_projects(&self, uid: &Uid) -> Result<Vec<Project>> {
        self.list(Self::listing()?.where_eq("ownerId", uid)).await
    }

    /// Every public project
    pub async fn list_public_projects(&self) -> Result<Vec<Project>> {
        self.list(Self::listing()?.where_eq("isPublic", true)).await
    }

    /// Public projects `uid` could join
    pub async fn list_available_projects(&self, uid: &Uid) -> Result<Vec<Project>> {
        let mut projects = self.list_public_projects().await?;
        projects.retain(|p| !p.is_member(uid));
        Ok(projects)
    }

    /// Projects where `uid` is a collaborator
    pub async fn list_collaborating_projects(&self, uid: &Uid) -> Result<Vec<Project>> {
        self.list(Self::listing()?.array_contains("collaborators", uid)).await
    }

    fn listing() -> Result<Query> {
        Ok(Query::new(Self::projects()?).order_by("createdAt", Direction::Descending))
    }

    async fn list(&self, query: Query) -> Result<Vec<Project>> {
        let docs = retry_read(&self.config.retry, "project listing", || async {
            Ok(self.store.query(&query).await?)
        })
        .await?;
        tracing::debug!(collection = %query.collection, count = docs.len(), "projects listed");
        docs.iter().map(Self::decode).collect()
    }

    /// Optimistic read-modify-write of one project
    ///
    /// `step` receives the freshly read project and must perform its own
    /// authorization on it. It may run several times; it must not have side
    /// effects outside the project it is given. Returns the project as
    /// written (or as read, for `Unchanged` and `Deleted`).
    pub(crate) async fn transact<T, F>(&self, id: &ProjectId, what: &'static str, mut step: F) -> Result<(Project, T)>
    where
        F: FnMut(&mut Project) -> Result<Outcome<T>> + Send,
        T: Send,
    {
        let path = Self::project_path(id)?;
        let attempts = self.config.retry.max_conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let current = self.get_project(id).await?;
            let version = current.version;
            let mut draft = current.clone();

            let (writes, value) = match step(&mut draft)? {
                Outcome::Unchanged(value) => return Ok((current, value)),
                Outcome::Deleted(value) => {
                    let writes = vec![Write::delete_recursive(path.clone()).if_version(version)];
                    match self.store.commit(writes).await {
                        Ok(_) => return Ok((current, value)),
                        Err(err) => {
                            self.on_commit_error(err, what, &path, attempt, attempts).await?;
                            continue;
                        }
                    }
                }
                Outcome::Changed(value) => {
                    debug_assert!(
                        draft.invariant_violations().is_empty(),
                        "{what} broke invariants: {:?}",
                        draft.invariant_violations()
                    );
                    let writes = vec![
                        Write::set(path.clone(), encode_fields(&draft)?).if_version(version),
                        Write::update(
                            path.clone(),
                            vec![FieldOp::ServerTimestamp("updatedAt".to_string())],
                        ),
                    ];
                    (writes, value)
                }
            };

            match self.store.commit(writes).await {
                Ok(result) => {
                    let doc = result.documents.last().cloned().flatten().ok_or_else(|| {
                        DevflowError::Corrupted(format!("{path} missing after {what}"))
                    })?;
                    return Ok((Self::decode(&doc)?, value));
                }
                Err(err) => self.on_commit_error(err, what, &path, attempt, attempts).await?,
            }
        }

        tracing::warn!(%path, what, attempts, "giving up after repeated version conflicts");
        Err(DevflowError::Conflict {
            path: path.to_string(),
            attempts,
        })
    }

    /// Back off after a version conflict; surface anything else
    async fn on_commit_error(
        &self,
        err: StoreError,
        what: &'static str,
        path: &DocPath,
        attempt: u32,
        attempts: u32,
    ) -> Result<()> {
        if !err.is_conflict() {
            return Err(err.into());
        }
        tracing::debug!(%path, what, attempt, "version conflict, retrying");
        if attempt < attempts {
            tokio::time::sleep(backoff_delay(&self.config.retry, attempt)).await;
        }
        Ok(())
    }
}

/// Field map of a JSON object literal
pub(crate) fn object(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

fn normalize_repo_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

fn repo_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^https?://[^\s/?#]+\.[^\s/?#]+(?:[/?#]\S*)?$").ok())
        .as_ref()
}

/// Check a repository URL
#[must_use]
pub fn is_valid_repo_url(url: &str) -> bool {
    match repo_url_pattern() {
        Some(pattern) => pattern.is_match(url),
        None => url.starts_with("https://") || url.starts_with("http://"),
    }
}

/// Check project fields against the configured limits
pub(crate) fn validate_project_fields(
    limits: &ValidationConfig,
    title: &str,
    description: &str,
    repo_url: Option<&str>,
) -> Result<()> {
    validate_text("title", title, limits.max_title_len)?;
    validate_text("description", description, limits.max_description_len)?;
    match repo_url {
        None if limits.require_repo_url => {
            Err(DevflowError::validation("repository URL is required"))
        }
        Some(url) if !is_valid_repo_url(url) => Err(DevflowError::validation(format!(
            "repository URL must be an http(s) URL: {url}"
        ))),
        _ => Ok(()),
    }
}

/// Non-empty after trimming and at most `max` characters
pub(crate) fn validate_text(field: &str, value: &str, max: usize) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DevflowError::validation(format!("{field} must not be empty")));
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(DevflowError::validation(format!(
            "{field} is {len} characters, limit is {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_store::MemoryStore;

    fn repo() -> (Arc<MemoryStore>, ProjectRepository) {
        let store = Arc::new(MemoryStore::new());
        let repo = ProjectRepository::new(store.clone(), Arc::new(DevflowConfig::default()));
        (store, repo)
    }

    #[test]
    fn repo_url_check() {
        assert!(is_valid_repo_url("https://github.com/acme/devflow"));
        assert!(is_valid_repo_url("http://git.example.org"));
        assert!(!is_valid_repo_url("ftp://example.org/repo"));
        assert!(!is_valid_repo_url("github.com/acme"));
        assert!(!is_valid_repo_url("https://"));
    }

    #[tokio::test]
    async fn create_initializes_empty_membership() {
        let (_, repo) = repo();
        let project = repo
            .create_project(&"owner".into(), NewProject::new("X", "Y").public())
            .await
            .unwrap();
        assert!(project.collaborators.is_empty());
        assert!(project.tasks.is_empty());
        assert!(project.updated_at.is_none());
        assert!(project.created_at.as_micros() > 0);
    }

    #[tokio::test]
    async fn create_validates_fields() {
        let (store, repo) = repo();
        let owner: Uid = "owner".into();
        for new in [
            NewProject::new("  ", "Y"),
            NewProject::new("X", ""),
            NewProject::new("X", "Y").with_repo_url("not a url"),
            NewProject::new("x".repeat(121), "Y"),
        ] {
            let err = repo.create_project(&owner, new).await.unwrap_err();
            assert!(matches!(err, DevflowError::Validation(_)), "{err}");
        }
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn blank_repo_url_is_absent() {
        let (_, repo) = repo();
        let project = repo
            .create_project(&"owner".into(), NewProject::new("X", "Y").with_repo_url("  "))
            .await
            .unwrap();
        assert_eq!(project.repo_url, None);
    }

    #[tokio::test]
    async fn update_is_owner_only_and_stamps_time() {
        let (_, repo) = repo();
        let owner: Uid = "owner".into();
        let project = repo.create_project(&owner, NewProject::new("X", "Y")).await.unwrap();

        let err = repo
            .update_project(&project.id, &"other".into(), ProjectPatch::new().with_title("Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, DevflowError::PermissionDenied(_)));

        let updated = repo
            .update_project(&project.id, &owner, ProjectPatch::new().with_title("Z").with_public(true))
            .await
            .unwrap();
        assert_eq!(updated.title, "Z");
        assert!(updated.is_public);
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.owner_id, owner);
        assert!(updated.version > project.version);
    }

    #[tokio::test]
    async fn noop_update_does_not_write() {
        let (_, repo) = repo();
        let owner: Uid = "owner".into();
        let project = repo.create_project(&owner, NewProject::new("X", "Y")).await.unwrap();
        let same = repo
            .update_project(&project.id, &owner, ProjectPatch::new().with_title("X"))
            .await
            .unwrap();
        assert_eq!(same.version, project.version);
    }

    #[tokio::test]
    async fn delete_cascades_to_chat() {
        let (store, repo) = repo();
        let owner: Uid = "owner".into();
        let project = repo.create_project(&owner, NewProject::new("X", "Y")).await.unwrap();
        let chat = ProjectRepository::chat_collection(&project.id).unwrap();
        store.add(&chat, Fields::new(), vec![]).await.unwrap();

        assert!(matches!(
            repo.delete_project(&project.id, &"other".into()).await,
            Err(DevflowError::PermissionDenied(_))
        ));
        repo.delete_project(&project.id, &owner).await.unwrap();
        assert_eq!(store.document_count(), 0);
        assert!(matches!(
            repo.get_project(&project.id).await,
            Err(DevflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listings_are_newest_first() {
        let (_, repo) = repo();
        let a: Uid = "a".into();
        let b: Uid = "b".into();
        let first = repo.create_project(&a, NewProject::new("1", "d").public()).await.unwrap();
        let second = repo.create_project(&a, NewProject::new("2", "d")).await.unwrap();
        let third = repo.create_project(&b, NewProject::new("3", "d").public()).await.unwrap();

        let owned: Vec<_> = repo.list_owned_projects(&a).await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(owned, vec![second.id.clone(), first.id.clone()]);

        let public: Vec<_> = repo.list_public_projects().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(public, vec![third.id.clone(), first.id.clone()]);

        let available: Vec<_> = repo.list_available_projects(&a).await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(available, vec![third.id]);
    }

    #[tokio::test]
    async fn private_projects_hidden_from_visitors() {
        let (_, repo) = repo();
        let project = repo.create_project(&"owner".into(), NewProject::new("X", "Y")).await.unwrap();
        assert!(matches!(
            repo.view_project(&project.id, None).await,
            Err(DevflowError::PermissionDenied(_))
        ));
        let (_, role) = repo.view_project(&project.id, Some(&"owner".into())).await.unwrap();
        assert_eq!(role, Role::Owner);
    }

    #[tokio::test]
    async fn unavailable_write_is_surfaced() {
        let (store, repo) = repo();
        let owner: Uid = "owner".into();
        let project = repo.create_project(&owner, NewProject::new("X", "Y")).await.unwrap();
        // The step runs between the read and the commit.
        let store_ref = Arc::clone(&store);
        let result = repo
            .transact(&project.id, "test", |p| {
                store_ref.fail_next(1);
                p.title = "Z".into();
                Ok(Outcome::Changed(()))
            })
            .await;
        assert!(matches!(result, Err(DevflowError::StoreUnavailable(_))));
        assert_eq!(repo.get_project(&project.id).await.unwrap().title, "X");
    }
}
