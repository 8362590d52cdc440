//! Build State Store: the single durable row per `build_id`. An in-memory
//! implementation backs tests and local/mock runs; a real deployment swaps
//! in a row-store-backed implementation behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use webforge_types::BuildState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no build state for build_id {0}")]
    NotFound(String),
}

#[async_trait]
pub trait BuildStateStore: Send + Sync {
    async fn load(&self, build_id: &str) -> Result<BuildState, StoreError>;
    async fn save(&self, state: BuildState) -> Result<(), StoreError>;
    async fn delete(&self, build_id: &str) -> Result<(), StoreError>;
}

/// Single `RwLock<HashMap>` keyed by `build_id`. Each `save` overwrites the
/// whole row; there is exactly one writer coroutine per `build_id` by
/// construction (the orchestrator owns its own build end to end), so this
/// never needs per-row locking.
#[derive(Clone, Default)]
pub struct InMemoryBuildStateStore {
    rows: Arc<RwLock<HashMap<String, BuildState>>>,
}

impl InMemoryBuildStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStateStore for InMemoryBuildStateStore {
    async fn load(&self, build_id: &str) -> Result<BuildState, StoreError> {
        self.rows
            .read()
            .await
            .get(build_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(build_id.to_string()))
    }

    async fn save(&self, state: BuildState) -> Result<(), StoreError> {
        self.rows.write().await.insert(state.build_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, build_id: &str) -> Result<(), StoreError> {
        self.rows.write().await.remove(build_id);
        Ok(())
    }
}
