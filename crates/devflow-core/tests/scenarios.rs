//! End-to-end scenarios over a signed-in session

use devflow_core::prelude::*;
use devflow_core::{AssignedTask, ErrorKind};
use devflow_store::DocumentStore;
use devflow_test_utils::TestWorkspace;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn owner_creates_empty_project() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;

    let project = owner
        .create_project(NewProject::new("X", "Y").public())
        .await
        .unwrap();

    assert_eq!(project.owner_id, Uid::from("owner"));
    assert_eq!(project.title, "X");
    assert_eq!(project.description, "Y");
    assert!(project.is_public);
    assert!(project.collaborators.is_empty());
    assert!(project.tasks.is_empty());
    assert!(project.updated_at.is_none());

    let (stored, role) = owner.view_project(&project.id).await.unwrap();
    assert_eq!(stored, project);
    assert_eq!(role, Role::Owner);
}

#[tokio::test]
async fn concurrent_double_join_records_visitor_once() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let visitor = ws.sign_in("visitor").await;
    let project = ws.public_project(&owner, "X").await;

    let (a, b) = tokio::join!(visitor.join(&project.id), visitor.join(&project.id));
    a.unwrap();
    b.unwrap();

    let (stored, role) = visitor.view_project(&project.id).await.unwrap();
    assert_eq!(stored.collaborators, vec![Uid::from("visitor")]);
    assert_eq!(role, Role::Collaborator);
}

#[tokio::test]
async fn assigning_to_non_member_adds_collaborator() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let project = ws.public_project(&owner, "X").await;

    let task = owner
        .assign_task(&project.id, NewTask::new("T1", "u2"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let (stored, _) = owner.view_project(&project.id).await.unwrap();
    assert_eq!(stored.collaborators, vec![Uid::from("u2")]);
    assert_eq!(stored.tasks.len(), 1);
    assert_eq!(stored.tasks[0].title, "T1");
    assert_eq!(stored.tasks[0].assigned_to, Uid::from("u2"));
    assert_eq!(stored.tasks[0].status, TaskStatus::Pending);
    assert!(stored.updated_at.is_some());
}

#[tokio::test]
async fn done_cannot_be_reopened() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let u2 = ws.sign_in("u2").await;
    let project = ws.public_project(&owner, "X").await;
    owner.assign_task(&project.id, NewTask::new("T1", "u2")).await.unwrap();

    let done = u2
        .set_task_status(&project.id, TaskKey::Index(0), TaskStatus::Done)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Done);

    let err = u2
        .set_task_status(&project.id, TaskKey::Index(0), TaskStatus::InProgress)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DevflowError::InvalidTransition {
            from: TaskStatus::Done,
            to: TaskStatus::InProgress,
        }
    );

    let (stored, _) = owner.view_project(&project.id).await.unwrap();
    assert_eq!(stored.tasks[0].status, TaskStatus::Done);
}

#[tokio::test]
async fn non_member_cannot_post() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let stranger = ws.sign_in("stranger").await;
    let project = ws.public_project(&owner, "X").await;

    let err = stranger.post_message(&project.id, "hello").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(owner.chat_history(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_the_assignee_moves_a_task() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let u2 = ws.sign_in("u2").await;
    let u3 = ws.sign_in("u3").await;
    let project = ws.public_project(&owner, "X").await;
    owner.assign_task(&project.id, NewTask::new("T1", "u2")).await.unwrap();
    u3.join(&project.id).await.unwrap();

    for actor in [&owner, &u3] {
        let err = actor
            .set_task_status(&project.id, TaskKey::Index(0), TaskStatus::InProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    let err = u2
        .set_task_status(&project.id, TaskKey::Index(5), TaskStatus::InProgress)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn owner_edits_and_deletes_tasks() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let project = ws.public_project(&owner, "X").await;
    let task = owner.assign_task(&project.id, NewTask::new("T1", "u2")).await.unwrap();

    let edited = owner
        .edit_task(
            &project.id,
            TaskKey::Id(task.id),
            TaskPatch::new().with_title("T1b").with_assignee("u3").with_status(TaskStatus::InProgress),
        )
        .await
        .unwrap();
    assert_eq!(edited.title, "T1b");
    assert_eq!(edited.assigned_to, Uid::from("u3"));
    assert_eq!(edited.status, TaskStatus::InProgress);

    let (stored, _) = owner.view_project(&project.id).await.unwrap();
    assert_eq!(stored.collaborators, vec![Uid::from("u2"), Uid::from("u3")]);

    let deleted = owner.delete_task(&project.id, TaskKey::Index(0)).await.unwrap();
    assert_eq!(deleted.id, task.id);
    let (stored, _) = owner.view_project(&project.id).await.unwrap();
    assert!(stored.tasks.is_empty());
}

#[tokio::test]
async fn collaborator_cannot_administer() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let u2 = ws.sign_in("u2").await;
    let project = ws.public_project(&owner, "X").await;
    u2.join(&project.id).await.unwrap();

    let denied = [
        u2.update_project(&project.id, ProjectPatch::new().with_title("mine")).await.err(),
        u2.assign_task(&project.id, NewTask::new("T", "u2")).await.err(),
        u2.delete_project(&project.id).await.err(),
    ];
    for err in denied {
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::PermissionDenied));
    }
}

#[tokio::test]
async fn private_projects_are_hidden_from_visitors() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let visitor = ws.sign_in("visitor").await;
    let project = ws.private_project(&owner, "Secret").await;

    let err = visitor.view_project(&project.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = visitor.join(&project.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let anonymous = ws.devflow.projects().view_project(&project.id, None).await.unwrap_err();
    assert_eq!(anonymous.kind(), ErrorKind::PermissionDenied);
    assert!(visitor.available_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn update_validates_and_stamps() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let project = ws.public_project(&owner, "X").await;

    let err = owner
        .update_project(&project.id, ProjectPatch::new().with_repo_url(Some("ftp://nope".into())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = owner
        .update_project(&project.id, ProjectPatch::new().with_title("   "))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let updated = owner
        .update_project(
            &project.id,
            ProjectPatch::new()
                .with_repo_url(Some("https://git.example.com/x".into()))
                .with_public(false),
        )
        .await
        .unwrap();
    assert_eq!(updated.repo_url.as_deref(), Some("https://git.example.com/x"));
    assert!(!updated.is_public);
    assert!(updated.updated_at.is_some());
    assert_eq!(updated.owner_id, project.owner_id);
}

#[tokio::test]
async fn delete_removes_project_and_chat() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let project = ws.public_project(&owner, "X").await;
    owner.post_message(&project.id, "one").await.unwrap();
    owner.post_message(&project.id, "two").await.unwrap();

    owner.delete_project(&project.id).await.unwrap();

    let err = owner.view_project(&project.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let chat = devflow_core::ProjectRepository::chat_collection(&project.id).unwrap();
    let remaining = ws
        .store
        .query(&devflow_store::Query::new(chat))
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn listings_partition_projects() {
    let ws = TestWorkspace::new();
    let alice = ws.sign_in("alice").await;
    let bob = ws.sign_in("bob").await;

    let first = ws.public_project(&alice, "first").await;
    let second = ws.public_project(&alice, "second").await;
    let hidden = ws.private_project(&alice, "hidden").await;
    bob.join(&first.id).await.unwrap();

    let owned: Vec<_> = alice.my_projects().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(owned, vec![hidden.id.clone(), second.id.clone(), first.id.clone()]);

    let collaborating: Vec<_> = bob
        .collaborating_projects()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(collaborating, vec![first.id.clone()]);

    let available: Vec<_> = bob.available_projects().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(available, vec![second.id.clone()]);

    let public: Vec<_> = bob.public_projects().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(public, vec![second.id, first.id]);
}

#[tokio::test]
async fn my_tasks_spans_projects_and_skips_done() {
    let ws = TestWorkspace::new();
    let alice = ws.sign_in("alice").await;
    let bob = ws.sign_in("bob").await;
    let p1 = ws.public_project(&alice, "p1").await;
    let p2 = ws.public_project(&bob, "p2").await;

    alice.assign_task(&p1.id, NewTask::new("a", "bob")).await.unwrap();
    alice.assign_task(&p1.id, NewTask::new("b", "bob")).await.unwrap();
    bob.assign_task(&p2.id, NewTask::new("c", "bob")).await.unwrap();
    bob.set_task_status(&p1.id, TaskKey::Index(0), TaskStatus::Done).await.unwrap();

    let mut tasks: Vec<AssignedTask> = bob.my_tasks().await.unwrap();
    tasks.sort_by(|a, b| a.task.title.cmp(&b.task.title));
    let summary: Vec<(&str, &str, usize)> = tasks
        .iter()
        .map(|t| (t.project_title.as_str(), t.task.title.as_str(), t.index))
        .collect();
    assert_eq!(summary, vec![("p1", "b", 1), ("p2", "c", 0)]);
}

#[tokio::test]
async fn leaving_requires_no_open_tasks() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let u2 = ws.sign_in("u2").await;
    let project = ws.public_project(&owner, "X").await;
    owner.assign_task(&project.id, NewTask::new("T1", "u2")).await.unwrap();

    let err = u2.leave(&project.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = owner.remove_collaborator(&project.id, &"u2".into()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    owner.delete_task(&project.id, TaskKey::Index(0)).await.unwrap();
    let after = u2.leave(&project.id).await.unwrap();
    assert!(after.collaborators.is_empty());
}

#[tokio::test]
async fn chat_carries_sender_profile() {
    let ws = TestWorkspace::new();
    let owner = ws.sign_in("owner").await;
    let project = ws.public_project(&owner, "X").await;

    let message = owner.post_message(&project.id, "hi").await.unwrap();
    assert_eq!(message.sender_uid, Uid::from("owner"));
    assert_eq!(message.sender_display_name, "User owner");

    let history = owner.chat_history(&project.id).await.unwrap();
    assert_eq!(history, vec![message]);
}
