//! Collaboration membership
//!
//! Joining, leaving and removing collaborators are transactional steps on the
//! project document, so concurrent joiners never overwrite each other.

use crate::auth::{authorize, role_of, Action, Role};
use crate::error::{DevflowError, Result};
use crate::repository::{Outcome, ProjectRepository};
use crate::types::{Project, ProjectId, Uid};

/// Add `uid` to the collaborators unless already a member
///
/// Returns whether the project changed.
pub(crate) fn ensure_member(project: &mut Project, uid: &Uid) -> bool {
    if project.is_member(uid) {
        return false;
    }
    project.collaborators.push(uid.clone());
    true
}

fn ensure_no_open_assignments(project: &Project, uid: &Uid) -> Result<()> {
    let assigned = project.tasks_assigned_to(uid).count();
    if assigned > 0 {
        return Err(DevflowError::validation(format!(
            "{uid} still has {assigned} task(s) assigned in project {}",
            project.id
        )));
    }
    Ok(())
}

/// Membership operations
#[derive(Debug, Clone)]
pub struct Membership {
    repo: ProjectRepository,
}

impl Membership {
    /// Create over a repository
    #[inline]
    #[must_use]
    pub fn new(repo: ProjectRepository) -> Self {
        Self { repo }
    }

    /// Become a collaborator of a public project
    ///
    /// Idempotent; a no-op for the owner and for existing collaborators.
    pub async fn join(&self, id: &ProjectId, uid: &Uid) -> Result<Project> {
        if uid.is_blank() {
            return Err(DevflowError::validation("uid must not be empty"));
        }
        let (project, joined) = self
            .repo
            .transact(id, "join", |project| {
                let role = authorize(Some(uid), project, Action::Join)?;
                if role != Role::Visitor {
                    return Ok(Outcome::Unchanged(false));
                }
                ensure_member(project, uid);
                Ok(Outcome::Changed(true))
            })
            .await?;
        if joined {
            tracing::info!(project = %id, %uid, "joined project");
        }
        Ok(project)
    }

    /// Stop collaborating on a project
    ///
    /// A no-op for non-members. Fails while tasks are still assigned to `uid`.
    pub async fn leave(&self, id: &ProjectId, uid: &Uid) -> Result<Project> {
        let (project, left) = self
            .repo
            .transact(id, "leave", |project| {
                authorize(Some(uid), project, Action::Leave)?;
                if role_of(Some(uid), project) == Role::Visitor {
                    return Ok(Outcome::Unchanged(false));
                }
                ensure_no_open_assignments(project, uid)?;
                project.collaborators.retain(|c| c != uid);
                Ok(Outcome::Changed(true))
            })
            .await?;
        if left {
            tracing::info!(project = %id, %uid, "left project");
        }
        Ok(project)
    }

    /// Remove a collaborator (owner only)
    ///
    /// A no-op when `uid` is not a collaborator. Fails while tasks are still
    /// assigned to `uid`.
    pub async fn remove_collaborator(&self, id: &ProjectId, actor: &Uid, uid: &Uid) -> Result<Project> {
        let (project, removed) = self
            .repo
            .transact(id, "remove_collaborator", |project| {
                authorize(Some(actor), project, Action::RemoveCollaborator)?;
                if !project.is_collaborator(uid) {
                    return Ok(Outcome::Unchanged(false));
                }
                ensure_no_open_assignments(project, uid)?;
                project.collaborators.retain(|c| c != uid);
                Ok(Outcome::Changed(true))
            })
            .await?;
        if removed {
            tracing::info!(project = %id, %uid, by = %actor, "collaborator removed");
        }
        Ok(project)
    }
}
