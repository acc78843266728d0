//! Testing utilities for DevFlow workspace
//!
//! Shared fixtures: an in-memory workspace, signed-in sessions and seeded
//! projects.

#![allow(missing_docs)]

use devflow_core::{
    Devflow, DevflowConfig, Identity, NewProject, Project, Session, StaticIdentityProvider,
};
use devflow_store::{MemoryStore, MemoryStoreConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Install a test log writer once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn identity(uid: &str) -> Identity {
    Identity::new(uid)
        .with_display_name(format!("User {uid}"))
        .with_email(format!("{uid}@example.com"))
}

/// Store plus wired services
#[derive(Debug, Clone)]
pub struct TestWorkspace {
    pub store: Arc<MemoryStore>,
    pub devflow: Devflow,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(DevflowConfig::default())
    }

    pub fn with_config(config: DevflowConfig) -> Self {
        Self::build(MemoryStoreConfig::new(), config)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self::build(MemoryStoreConfig::new().with_latency(latency), DevflowConfig::default())
    }

    fn build(store_config: MemoryStoreConfig, config: DevflowConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::with_config(store_config));
        let devflow = Devflow::new(store.clone(), config);
        Self { store, devflow }
    }

    pub async fn sign_in(&self, uid: &str) -> Session {
        self.devflow
            .sign_in(&StaticIdentityProvider::new(identity(uid)))
            .await
            .unwrap()
    }

    pub async fn public_project(&self, owner: &Session, title: &str) -> Project {
        owner
            .create_project(NewProject::new(title, format!("{title} description")).public())
            .await
            .unwrap()
    }

    pub async fn private_project(&self, owner: &Session, title: &str) -> Project {
        owner
            .create_project(NewProject::new(title, format!("{title} description")))
            .await
            .unwrap()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}
