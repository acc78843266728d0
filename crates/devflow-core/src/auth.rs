//! Authorization layer
//!
//! A viewer's [`Role`] is a pure function of the viewer and the project as
//! currently stored. Services call [`authorize`] on the document they just
//! read, inside their retry loop, so a decision is never based on a role the
//! client cached earlier.

use crate::error::{DevflowError, Result};
use crate::types::{Project, Uid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relation of a viewer to a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Created the project
    Owner,
    /// Listed in `collaborators`
    Collaborator,
    /// Anyone else, including anonymous viewers
    Visitor,
}

impl Role {
    /// Owner or collaborator
    #[inline]
    #[must_use]
    pub fn is_member(&self) -> bool {
        matches!(self, Self::Owner | Self::Collaborator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Owner => "owner",
            Self::Collaborator => "collaborator",
            Self::Visitor => "visitor",
        })
    }
}

/// Operations gated by the permission table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read the project document
    View,
    /// Patch title, description, repository URL or visibility
    UpdateProject,
    /// Delete the project and its chat
    DeleteProject,
    /// Append a task
    AssignTask,
    /// Edit any field of a task
    EditTask,
    /// Remove a task
    DeleteTask,
    /// Change the status of a task (assignee check comes on top)
    SetTaskStatus,
    /// Append a chat message
    PostMessage,
    /// Read or subscribe to the chat
    ReadChat,
    /// Become a collaborator
    Join,
    /// Stop being a collaborator
    Leave,
    /// Remove another collaborator
    RemoveCollaborator,
}

impl Action {
    /// Every action
    pub const ALL: [Action; 12] = [
        Self::View,
        Self::UpdateProject,
        Self::DeleteProject,
        Self::AssignTask,
        Self::EditTask,
        Self::DeleteTask,
        Self::SetTaskStatus,
        Self::PostMessage,
        Self::ReadChat,
        Self::Join,
        Self::Leave,
        Self::RemoveCollaborator,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Derive the viewer's role from the project's current state
#[must_use]
pub fn role_of(viewer: Option<&Uid>, project: &Project) -> Role {
    match viewer {
        Some(uid) if project.is_owner(uid) => Role::Owner,
        Some(uid) if project.is_collaborator(uid) => Role::Collaborator,
        _ => Role::Visitor,
    }
}

/// Permission table
///
/// `public` is the project's visibility; it only matters for visitors.
#[must_use]
pub fn permits(role: Role, action: Action, public: bool) -> bool {
    use Action::{Join, Leave, PostMessage, ReadChat, SetTaskStatus, View};
    match role {
        Role::Owner => action != Leave,
        Role::Collaborator => matches!(
            action,
            View | SetTaskStatus | PostMessage | ReadChat | Join | Leave
        ),
        // Leaving a project one is not part of is a no-op, not an error.
        Role::Visitor => match action {
            View | Join => public,
            Leave => true,
            _ => false,
        },
    }
}

/// Gate `action` on the freshly read `project`
///
/// Returns the actor's role when permitted.
pub fn authorize(actor: Option<&Uid>, project: &Project, action: Action) -> Result<Role> {
    let role = role_of(actor, project);
    if permits(role, action, project.is_public) {
        Ok(role)
    } else {
        let who = actor.map_or_else(|| "anonymous".to_string(), ToString::to_string);
        tracing::debug!(project = %project.id, %who, %role, %action, "permission denied");
        Err(DevflowError::denied(format!(
            "{who} ({role}) may not {action} on project {}",
            project.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_store::Timestamp;

    fn project(public: bool) -> Project {
        Project {
            id: "p1".into(),
            owner_id: "owner".into(),
            title: "X".into(),
            description: "Y".into(),
            repo_url: None,
            is_public: public,
            collaborators: vec!["collab".into()],
            tasks: Vec::new(),
            created_at: Timestamp::from_micros(1),
            updated_at: None,
            version: 1,
        }
    }

    #[test]
    fn roles() {
        let p = project(true);
        assert_eq!(role_of(Some(&"owner".into()), &p), Role::Owner);
        assert_eq!(role_of(Some(&"collab".into()), &p), Role::Collaborator);
        assert_eq!(role_of(Some(&"other".into()), &p), Role::Visitor);
        assert_eq!(role_of(None, &p), Role::Visitor);
    }

    #[test]
    fn owner_only_actions() {
        let p = project(true);
        for action in [
            Action::UpdateProject,
            Action::DeleteProject,
            Action::AssignTask,
            Action::EditTask,
            Action::DeleteTask,
            Action::RemoveCollaborator,
        ] {
            assert!(authorize(Some(&"owner".into()), &p, action).is_ok());
            assert!(authorize(Some(&"collab".into()), &p, action).is_err());
            assert!(authorize(Some(&"other".into()), &p, action).is_err());
        }
    }

    #[test]
    fn visitors_see_only_public_projects() {
        assert!(authorize(Some(&"other".into()), &project(true), Action::View).is_ok());
        assert!(authorize(None, &project(true), Action::View).is_ok());
        let err = authorize(Some(&"other".into()), &project(false), Action::View).unwrap_err();
        assert!(matches!(err, DevflowError::PermissionDenied(_)));
    }

    #[test]
    fn chat_is_members_only() {
        let p = project(true);
        assert!(authorize(Some(&"owner".into()), &p, Action::PostMessage).is_ok());
        assert!(authorize(Some(&"collab".into()), &p, Action::ReadChat).is_ok());
        assert!(authorize(Some(&"other".into()), &p, Action::PostMessage).is_err());
        assert!(authorize(Some(&"other".into()), &p, Action::ReadChat).is_err());
    }

    #[test]
    fn owner_cannot_leave() {
        assert!(!permits(Role::Owner, Action::Leave, true));
        assert!(permits(Role::Collaborator, Action::Leave, false));
    }

    #[test]
    fn visitors_never_mutate() {
        for action in Action::ALL {
            if !matches!(action, Action::View | Action::Join | Action::Leave) {
                assert!(!permits(Role::Visitor, action, true), "{action}");
            }
        }
    }
}
