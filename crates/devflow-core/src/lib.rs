//! DevFlow Core - project/task/chat sync and authorization engine
//!
//! Keeps a shared project document consistent across concurrently connected
//! clients, decides who may read or change which part of it, and mirrors
//! changes into live views.
//!
//! Every mutation of an existing project is an optimistic read-modify-write
//! guarded by the document version, with the actor's role re-derived from the
//! freshly read state on every attempt.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use devflow_core::prelude::*;
//! use devflow_store::MemoryStore;
//!
//! let devflow = Devflow::new(Arc::new(MemoryStore::new()), DevflowConfig::default());
//! let alice = devflow
//!     .sign_in(&StaticIdentityProvider::new(Identity::new("alice")))
//!     .await?;
//!
//! let project = alice.create_project(NewProject::new("Site", "Rebuild").public()).await?;
//! alice.assign_task(&project.id, NewTask::new("Draft", "bob")).await?;
//!
//! let view = alice.mount(&project.id, true).await?;
//! let state = view.wait_for(|s| s.status == ViewStatus::Live).await;
//! ```

#![warn(unreachable_pub)]

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
mod gate;
pub mod identity;
pub mod membership;
pub mod repository;
pub mod retry;
pub mod session;
pub mod simulator;
pub mod sync;
pub mod tasks;
pub mod types;

// Re-exports
pub use auth::{authorize, permits, role_of, Action, Role};
pub use chat::{ChatService, ChatSubscription};
pub use config::{ChatConfig, ConfigError, DevflowConfig, DirectoryConfig, RetryConfig, ValidationConfig};
pub use error::{DevflowError, ErrorKind, Result};
pub use identity::{AuthError, Identity, IdentityProvider, StaticIdentityProvider, UserDirectory};
pub use membership::Membership;
pub use repository::{is_valid_repo_url, ProjectRepository};
pub use session::{Devflow, Session};
pub use sync::{LiveSyncController, ProjectView, ViewState, ViewStatus};
pub use tasks::{allowed_transitions, validate_transition, TaskService};
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::auth::{Action, Role};
    pub use crate::config::DevflowConfig;
    pub use crate::error::{DevflowError, Result};
    pub use crate::identity::{Identity, IdentityProvider, StaticIdentityProvider};
    pub use crate::session::{Devflow, Session};
    pub use crate::sync::{ProjectView, ViewState, ViewStatus};
    pub use crate::types::{
        NewProject, NewTask, Project, ProjectId, ProjectPatch, Task, TaskKey, TaskPatch, TaskStatus, Uid,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
