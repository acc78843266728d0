//! Task subsystem
//!
//! Tasks live embedded in their project, so every task mutation is a
//! transactional step on the project document.

use crate::auth::{authorize, Action};
use crate::error::{DevflowError, Result};
use crate::membership::ensure_member;
use crate::repository::{validate_text, Outcome, ProjectRepository};
use crate::types::{
    AssignedTask, NewTask, Project, ProjectId, Task, TaskId, TaskKey, TaskPatch, TaskStatus, Uid,
};
use devflow_store::Timestamp;

/// Validates a status transition.
///
/// Any status may follow any other while the task is not done. `Done` is
/// terminal: not even `Done -> Done` is accepted.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(DevflowError::InvalidTransition { from, to })
    }
}

/// Statuses reachable from `from`
#[must_use]
pub fn allowed_transitions(from: TaskStatus) -> Vec<TaskStatus> {
    use TaskStatus::{Done, InProgress, Pending};
    match from {
        Pending | InProgress => vec![Pending, InProgress, Done],
        Done => vec![],
    }
}

fn locate(project: &Project, key: TaskKey) -> Result<usize> {
    project
        .position(key)
        .ok_or_else(|| DevflowError::not_found(format!("task {key} in project {}", project.id)))
}

/// Task operations
#[derive(Debug, Clone)]
pub struct TaskService {
    repo: ProjectRepository,
}

impl TaskService {
    /// Create over a repository
    #[inline]
    #[must_use]
    pub fn new(repo: ProjectRepository) -> Self {
        Self { repo }
    }

    /// Append a pending task (owner only)
    ///
    /// An assignee who is not yet a member becomes a collaborator in the
    /// same write.
    pub async fn assign_task(&self, id: &ProjectId, actor: &Uid, new: NewTask) -> Result<Task> {
        let limits = self.repo.config().validation;
        validate_text("task title", &new.title, limits.max_title_len)?;
        if new.assigned_to.is_blank() {
            return Err(DevflowError::validation("assignee must not be empty"));
        }
        if new.description.chars().count() > limits.max_description_len {
            return Err(DevflowError::validation("task description too long"));
        }

        let task = Task {
            id: TaskId::new(),
            title: new.title.trim().to_string(),
            description: new.description.trim().to_string(),
            assigned_to: new.assigned_to,
            status: TaskStatus::Pending,
            created_at: Timestamp::now(),
        };

        let (_, task) = self
            .repo
            .transact(id, "assign_task", |project| {
                authorize(Some(actor), project, Action::AssignTask)?;
                if ensure_member(project, &task.assigned_to) {
                    tracing::debug!(project = %project.id, uid = %task.assigned_to, "assignee added as collaborator");
                }
                project.tasks.push(task.clone());
                Ok(Outcome::Changed(task.clone()))
            })
            .await?;
        tracing::info!(project = %id, task = %task.id, assignee = %task.assigned_to, "task assigned");
        Ok(task)
    }

    /// Change the status of a task (assignee only)
    pub async fn set_task_status(
        &self,
        id: &ProjectId,
        key: impl Into<TaskKey>,
        actor: &Uid,
        status: TaskStatus,
    ) -> Result<Task> {
        let key = key.into();
        let (_, task) = self
            .repo
            .transact(id, "set_task_status", |project| {
                authorize(Some(actor), project, Action::SetTaskStatus)?;
                let index = locate(project, key)?;
                let task = &mut project.tasks[index];
                if task.assigned_to != *actor {
                    return Err(DevflowError::denied(format!(
                        "{actor} is not the assignee of task {key}"
                    )));
                }
                validate_transition(task.status, status)?;
                if task.status == status {
                    return Ok(Outcome::Unchanged(task.clone()));
                }
                task.status = status;
                Ok(Outcome::Changed(task.clone()))
            })
            .await?;
        tracing::debug!(project = %id, task = %task.id, %status, "task status set");
        Ok(task)
    }

    /// Edit a task (owner only)
    ///
    /// A status change obeys the same state machine as
    /// [`set_task_status`](Self::set_task_status); a new assignee becomes a
    /// collaborator in the same write.
    pub async fn edit_task(
        &self,
        id: &ProjectId,
        key: impl Into<TaskKey>,
        actor: &Uid,
        patch: TaskPatch,
    ) -> Result<Task> {
        let key = key.into();
        let limits = self.repo.config().validation;
        if let Some(title) = &patch.title {
            validate_text("task title", title, limits.max_title_len)?;
        }
        if patch.assigned_to.as_ref().is_some_and(Uid::is_blank) {
            return Err(DevflowError::validation("assignee must not be empty"));
        }

        let (_, task) = self
            .repo
            .transact(id, "edit_task", |project| {
                authorize(Some(actor), project, Action::EditTask)?;
                let index = locate(project, key)?;

                let mut next = project.tasks[index].clone();
                if let Some(title) = &patch.title {
                    next.title = title.trim().to_string();
                }
                if let Some(description) = &patch.description {
                    next.description = description.trim().to_string();
                }
                if let Some(status) = patch.status {
                    if status != next.status {
                        validate_transition(next.status, status)?;
                        next.status = status;
                    }
                }
                if let Some(assignee) = &patch.assigned_to {
                    next.assigned_to = assignee.clone();
                }

                if next == project.tasks[index] {
                    return Ok(Outcome::Unchanged(next));
                }
                ensure_member(project, &next.assigned_to);
                project.tasks[index] = next.clone();
                Ok(Outcome::Changed(next))
            })
            .await?;
        tracing::debug!(project = %id, task = %task.id, "task edited");
        Ok(task)
    }

    /// Remove a task (owner only)
    pub async fn delete_task(&self, id: &ProjectId, key: impl Into<TaskKey>, actor: &Uid) -> Result<Task> {
        let key = key.into();
        let (_, task) = self
            .repo
            .transact(id, "delete_task", |project| {
                authorize(Some(actor), project, Action::DeleteTask)?;
                let index = locate(project, key)?;
                Ok(Outcome::Changed(project.tasks.remove(index)))
            })
            .await?;
        tracing::info!(project = %id, task = %task.id, "task deleted");
        Ok(task)
    }

    /// Open tasks assigned to `uid` across every project they belong to
    pub async fn list_assigned_tasks(&self, uid: &Uid) -> Result<Vec<AssignedTask>> {
        let mut projects = self.repo.list_owned_projects(uid).await?;
        projects.extend(self.repo.list_collaborating_projects(uid).await?);

        Ok(projects
            .iter()
            .flat_map(|project| {
                project
                    .tasks_assigned_to(uid)
                    .filter(|(_, task)| !task.status.is_terminal())
                    .map(|(index, task)| AssignedTask {
                        project_id: project.id.clone(),
                        project_title: project.title.clone(),
                        owner_id: project.owner_id.clone(),
                        index,
                        task: task.clone(),
                    })
            })
            .collect())
    }
}
