//! Consistency simulator
//!
//! Runs seeded random operations from many concurrent sessions against one
//! in-memory store, then checks the project documents and chats for lost
//! writes and broken invariants.
//!
//! Checked after the run:
//! - owner is never a collaborator, every assignee is a member
//! - tasks per project = successful assigns - successful deletes
//! - chat messages per project = successful posts
//! - chat timestamps never go backwards

use crate::config::DevflowConfig;
use crate::error::{DevflowError, ErrorKind, Result};
use crate::identity::{Identity, StaticIdentityProvider};
use crate::session::{Devflow, Session};
use crate::types::{NewProject, NewTask, ProjectId, TaskKey, TaskPatch, TaskStatus, Uid};
use devflow_store::{MemoryStore, MemoryStoreConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed; each client derives its own stream from it
    pub seed: u64,
    /// Concurrent signed-in clients
    pub clients: usize,
    /// Operations each client performs
    pub ops_per_client: u64,
    /// Projects created before the run
    pub projects: usize,
    /// Simulated store latency in milliseconds (0 = none)
    pub latency_ms: u64,
    /// Core configuration the clients run with
    #[serde(skip)]
    pub devflow: DevflowConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            clients: 8,
            ops_per_client: 200,
            projects: 4,
            latency_ms: 0,
            devflow: DevflowConfig::default(),
        }
    }
}

/// Operation a client can pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SimulatedOperation {
    /// Join the project
    Join,
    /// Leave the project
    Leave,
    /// Assign a task (owner)
    Assign {
        /// Who gets it
        assignee: Uid,
    },
    /// Move one of my tasks
    SetStatus {
        /// Which of my tasks, modulo their count
        pick: usize,
        /// Target status
        status: TaskStatus,
    },
    /// Retitle a task (owner)
    EditTask {
        /// Which task, modulo the task count
        pick: usize,
    },
    /// Delete a task (owner)
    DeleteTask {
        /// Which task, modulo the task count
        pick: usize,
    },
    /// Post a chat message
    Post,
    /// Read the project
    View,
}

/// A broken property found after the run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Project document breaks a membership invariant
    Invariant {
        /// Project
        project: ProjectId,
        /// What is wrong
        detail: String,
    },
    /// Task count differs from successful assigns minus deletes
    LostTaskWrite {
        /// Project
        project: ProjectId,
        /// Expected count
        expected: i64,
        /// Stored count
        actual: usize,
    },
    /// Chat count differs from successful posts
    LostMessage {
        /// Project
        project: ProjectId,
        /// Expected count
        expected: u64,
        /// Stored count
        actual: usize,
    },
    /// A chat message sorts before its predecessor's timestamp
    ChatOrder {
        /// Project
        project: ProjectId,
    },
    /// An operation failed in a way no rule explains
    UnexpectedError {
        /// Operation
        operation: SimulatedOperation,
        /// Error text
        error: String,
    },
    /// A client task panicked
    ClientPanicked {
        /// Panic text
        detail: String,
    },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    /// Operations issued by all clients
    pub operations_attempted: u64,
    /// Operations that succeeded
    pub operations_applied: u64,
    /// Operations with nothing to act on (no task to pick, no peer)
    pub operations_skipped: u64,
    /// Operations refused by a rule
    pub operations_rejected: u64,
    /// Writes that ran out of conflict retries
    pub conflicts_exhausted: u64,
    /// Successful task assignments
    pub tasks_assigned: u64,
    /// Successful task deletions
    pub tasks_deleted: u64,
    /// Successful chat posts
    pub messages_posted: u64,
    /// Refusals by error kind
    pub rejections: BTreeMap<ErrorKind, u64>,
    /// Wall-clock run time
    pub elapsed_ms: u64,
}

impl SimulatorStats {
    fn merge(&mut self, other: &Self) {
        self.operations_attempted += other.operations_attempted;
        self.operations_applied += other.operations_applied;
        self.operations_skipped += other.operations_skipped;
        self.operations_rejected += other.operations_rejected;
        self.conflicts_exhausted += other.conflicts_exhausted;
        self.tasks_assigned += other.tasks_assigned;
        self.tasks_deleted += other.tasks_deleted;
        self.messages_posted += other.messages_posted;
        for (kind, count) in &other.rejections {
            *self.rejections.entry(*kind).or_default() += count;
        }
    }
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Aggregated client statistics
    pub stats: SimulatorStats,
    /// Every broken invariant found
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let stats = &self.stats;

        report.push_str("=== DevFlow Consistency Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Clients: {}", self.config.clients);
        let _ = writeln!(report, "Projects: {}", self.config.projects);
        let _ = writeln!(report, "Operations Attempted: {}", stats.operations_attempted);
        let _ = writeln!(report, "Operations Applied: {}", stats.operations_applied);
        let _ = writeln!(report, "Operations Skipped: {}", stats.operations_skipped);
        let _ = writeln!(report, "Operations Rejected: {}", stats.operations_rejected);
        for (kind, count) in &stats.rejections {
            let _ = writeln!(report, "  {kind}: {count}");
        }
        let _ = writeln!(report, "Conflicts Exhausted: {}", stats.conflicts_exhausted);
        let _ = writeln!(report, "Tasks Assigned: {}", stats.tasks_assigned);
        let _ = writeln!(report, "Tasks Deleted: {}", stats.tasks_deleted);
        let _ = writeln!(report, "Messages Posted: {}", stats.messages_posted);
        let _ = writeln!(report, "Elapsed: {}ms", stats.elapsed_ms);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = write!(
            report,
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    /// Report as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// What a successful operation did
enum Effect {
    None,
    TaskAdded,
    TaskRemoved,
    MessagePosted,
}

/// Per-client counters, merged after the run
#[derive(Default)]
struct ClientLog {
    stats: SimulatorStats,
    assigned: BTreeMap<ProjectId, u64>,
    deleted: BTreeMap<ProjectId, u64>,
    posted: BTreeMap<ProjectId, u64>,
    violations: Vec<Violation>,
}

impl ClientLog {
    fn record(&mut self, project: &ProjectId, operation: SimulatedOperation, outcome: Result<Option<Effect>>) {
        self.stats.operations_attempted += 1;
        match outcome {
            Ok(None) => self.stats.operations_skipped += 1,
            Ok(Some(effect)) => {
                self.stats.operations_applied += 1;
                match effect {
                    Effect::TaskAdded => {
                        self.stats.tasks_assigned += 1;
                        *self.assigned.entry(project.clone()).or_default() += 1;
                    }
                    Effect::TaskRemoved => {
                        self.stats.tasks_deleted += 1;
                        *self.deleted.entry(project.clone()).or_default() += 1;
                    }
                    Effect::MessagePosted => {
                        self.stats.messages_posted += 1;
                        *self.posted.entry(project.clone()).or_default() += 1;
                    }
                    Effect::None => {}
                }
            }
            Err(DevflowError::Conflict { .. }) => self.stats.conflicts_exhausted += 1,
            Err(
                err @ (DevflowError::Validation(_)
                | DevflowError::PermissionDenied(_)
                | DevflowError::NotFound(_)
                | DevflowError::InvalidTransition { .. }),
            ) => {
                self.stats.operations_rejected += 1;
                *self.stats.rejections.entry(err.kind()).or_default() += 1;
                tracing::trace!(project = %project, ?operation, error = %err, "operation rejected");
            }
            Err(err) => self.violations.push(Violation::UnexpectedError {
                operation,
                error: err.to_string(),
            }),
        }
    }
}

fn choose_operation(rng: &mut StdRng, is_owner: bool, peers: &[Uid]) -> SimulatedOperation {
    let pick = rng.random_range(0..1024);
    if is_owner {
        match rng.random_range(0..9) {
            0..=2 => SimulatedOperation::Assign {
                assignee: peers[rng.random_range(0..peers.len())].clone(),
            },
            3 => SimulatedOperation::DeleteTask { pick },
            4 => SimulatedOperation::EditTask { pick },
            5 => SimulatedOperation::SetStatus {
                pick,
                status: TaskStatus::ALL[rng.random_range(0..TaskStatus::ALL.len())],
            },
            6 | 7 => SimulatedOperation::Post,
            _ => SimulatedOperation::View,
        }
    } else {
        match rng.random_range(0..8) {
            0 | 1 => SimulatedOperation::Join,
            2 => SimulatedOperation::Leave,
            3 | 4 => SimulatedOperation::SetStatus {
                pick,
                status: TaskStatus::ALL[rng.random_range(0..TaskStatus::ALL.len())],
            },
            5 | 6 => SimulatedOperation::Post,
            _ => SimulatedOperation::View,
        }
    }
}

async fn execute(session: &Session, id: &ProjectId, operation: &SimulatedOperation, serial: u64) -> Result<Option<Effect>> {
    match operation {
        SimulatedOperation::Join => session.join(id).await.map(|_| Some(Effect::None)),
        SimulatedOperation::Leave => session.leave(id).await.map(|_| Some(Effect::None)),
        SimulatedOperation::Assign { assignee } => {
            let new = NewTask::new(format!("task {serial} by {}", session.uid()), assignee.clone());
            session.assign_task(id, new).await.map(|_| Some(Effect::TaskAdded))
        }
        SimulatedOperation::SetStatus { pick, status } => {
            let (project, _) = session.view_project(id).await?;
            let mine: Vec<_> = project.tasks_assigned_to(session.uid()).map(|(_, t)| t.id).collect();
            if mine.is_empty() {
                return Ok(None);
            }
            let task = mine[pick % mine.len()];
            session
                .set_task_status(id, TaskKey::Id(task), *status)
                .await
                .map(|_| Some(Effect::None))
        }
        SimulatedOperation::EditTask { pick } => {
            let (project, _) = session.view_project(id).await?;
            if project.tasks.is_empty() {
                return Ok(None);
            }
            let task = project.tasks[pick % project.tasks.len()].id;
            let patch = TaskPatch::new().with_title(format!("edited {serial}"));
            session
                .edit_task(id, TaskKey::Id(task), patch)
                .await
                .map(|_| Some(Effect::None))
        }
        SimulatedOperation::DeleteTask { pick } => {
            let (project, _) = session.view_project(id).await?;
            if project.tasks.is_empty() {
                return Ok(None);
            }
            let task = project.tasks[pick % project.tasks.len()].id;
            session
                .delete_task(id, TaskKey::Id(task))
                .await
                .map(|_| Some(Effect::TaskRemoved))
        }
        SimulatedOperation::Post => session
            .post_message(id, &format!("message {serial} from {}", session.uid()))
            .await
            .map(|_| Some(Effect::MessagePosted)),
        SimulatedOperation::View => session.view_project(id).await.map(|_| Some(Effect::None)),
    }
}

async fn run_client(
    session: Session,
    peers: Arc<Vec<Uid>>,
    projects: Arc<Vec<(ProjectId, Uid)>>,
    ops: u64,
    mut rng: StdRng,
) -> ClientLog {
    let mut log = ClientLog::default();
    for serial in 0..ops {
        let (id, owner) = &projects[rng.random_range(0..projects.len())];
        let operation = choose_operation(&mut rng, owner == session.uid(), &peers);
        let outcome = execute(&session, id, &operation, serial).await;
        log.record(id, operation, outcome);
    }
    log
}

async fn check_project(devflow: &Devflow, id: &ProjectId, owner: &Uid, merged: &ClientLog) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let project = devflow.projects().get_project(id).await?;

    for detail in project.invariant_violations() {
        violations.push(Violation::Invariant {
            project: id.clone(),
            detail,
        });
    }

    let assigned = merged.assigned.get(id).copied().unwrap_or(0);
    let deleted = merged.deleted.get(id).copied().unwrap_or(0);
    let expected = i64::try_from(assigned).unwrap_or(i64::MAX) - i64::try_from(deleted).unwrap_or(i64::MAX);
    if i64::try_from(project.tasks.len()).ok() != Some(expected) {
        violations.push(Violation::LostTaskWrite {
            project: id.clone(),
            expected,
            actual: project.tasks.len(),
        });
    }

    let history = devflow.chat().history(id, owner).await?;
    let posted = merged.posted.get(id).copied().unwrap_or(0);
    if u64::try_from(history.len()).ok() != Some(posted) {
        violations.push(Violation::LostMessage {
            project: id.clone(),
            expected: posted,
            actual: history.len(),
        });
    }
    if history.windows(2).any(|w| w[1].created_at < w[0].created_at) {
        violations.push(Violation::ChatOrder { project: id.clone() });
    }
    Ok(violations)
}

/// Run the consistency simulator
///
/// Fails only when the run cannot be set up; everything that goes wrong
/// during the run ends up in the report.
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport> {
    if config.clients == 0 || config.projects == 0 {
        return Err(DevflowError::validation("simulator needs at least one client and one project"));
    }
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut store_config = MemoryStoreConfig::new();
    if config.latency_ms > 0 {
        store_config = store_config.with_latency(Duration::from_millis(config.latency_ms));
    }
    let store = Arc::new(MemoryStore::with_config(store_config));
    let devflow = Devflow::new(store.clone(), config.devflow.clone());

    let mut sessions = Vec::with_capacity(config.clients);
    for i in 0..config.clients {
        let identity = Identity::new(format!("client-{i}")).with_display_name(format!("Client {i}"));
        sessions.push(devflow.sign_in(&StaticIdentityProvider::new(identity)).await?);
    }
    let peers: Arc<Vec<Uid>> = Arc::new(sessions.iter().map(|s| s.uid().clone()).collect());

    let mut projects = Vec::with_capacity(config.projects);
    for k in 0..config.projects {
        let owner = &sessions[k % sessions.len()];
        let mut new = NewProject::new(format!("project {k}"), "simulated");
        new.is_public = k == 0 || rng.random_bool(0.75);
        let project = owner.create_project(new).await?;
        projects.push((project.id, owner.uid().clone()));
    }
    let projects = Arc::new(projects);

    tracing::info!(
        seed = config.seed,
        clients = config.clients,
        projects = config.projects,
        ops = config.ops_per_client,
        "simulation started"
    );

    let mut clients = JoinSet::new();
    for session in sessions {
        let client_rng = StdRng::seed_from_u64(rng.random());
        clients.spawn(run_client(
            session,
            Arc::clone(&peers),
            Arc::clone(&projects),
            config.ops_per_client,
            client_rng,
        ));
    }

    let mut merged = ClientLog::default();
    while let Some(joined) = clients.join_next().await {
        match joined {
            Ok(log) => {
                merged.stats.merge(&log.stats);
                for (id, n) in log.assigned {
                    *merged.assigned.entry(id).or_default() += n;
                }
                for (id, n) in log.deleted {
                    *merged.deleted.entry(id).or_default() += n;
                }
                for (id, n) in log.posted {
                    *merged.posted.entry(id).or_default() += n;
                }
                merged.violations.extend(log.violations);
            }
            Err(err) => merged.violations.push(Violation::ClientPanicked {
                detail: err.to_string(),
            }),
        }
    }

    for (id, owner) in projects.iter() {
        let found = check_project(&devflow, id, owner, &merged).await?;
        merged.violations.extend(found);
    }

    let mut stats = merged.stats;
    stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(
        applied = stats.operations_applied,
        rejected = stats.operations_rejected,
        violations = merged.violations.len(),
        elapsed_ms = stats.elapsed_ms,
        "simulation finished"
    );

    Ok(SimulatorReport {
        config,
        stats,
        violations: merged.violations,
    })
}
