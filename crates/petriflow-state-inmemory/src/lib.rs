//! In-memory state store for the Petriflow engine
//!
//! This crate provides in-memory implementations of the repository traits
//! defined in petriflow-core: the per-case event log, the snapshot store and a
//! specification loader. It is primarily useful for development, testing and
//! single-process deployments where persistence is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub mod repositories;
pub use repositories::{
    InMemoryEventStore, InMemorySnapshotStore, InMemorySpecificationLoader, StateStoreError,
    StoredCase,
};

use petriflow_core::{
    CaseId, CaseSnapshot, EventStore, SnapshotStore, SpecificationKey, SpecificationLoader,
    SpecificationModel,
};

/// Provider for in-memory repositories sharing one set of maps
pub struct InMemoryStoreProvider {
    // Event log per case, plus the specification each case was launched with
    cases: Arc<RwLock<HashMap<CaseId, StoredCase>>>,

    // Latest snapshot per case
    snapshots: Arc<RwLock<HashMap<CaseId, CaseSnapshot>>>,

    // Registered specifications
    specifications: Arc<RwLock<HashMap<SpecificationKey, SpecificationModel>>>,
}

impl InMemoryStoreProvider {
    /// Create a new provider with empty storage
    pub fn new() -> Self {
        Self {
            cases: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            specifications: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create repositories backed by this provider's storage
    ///
    /// Every call returns handles onto the same maps, so several engines built
    /// from one provider see each other's cases.
    pub fn create_repositories(
        &self,
    ) -> (
        Arc<dyn EventStore>,
        Arc<dyn SnapshotStore>,
        Arc<dyn SpecificationLoader>,
    ) {
        debug!("Creating in-memory repositories");
        (
            Arc::new(self.event_store()),
            Arc::new(self.snapshot_store()),
            Arc::new(self.specification_loader()),
        )
    }

    /// Concrete event store over the shared log
    pub fn event_store(&self) -> InMemoryEventStore {
        InMemoryEventStore::new(self.cases.clone())
    }

    /// Concrete snapshot store over the shared snapshots
    pub fn snapshot_store(&self) -> InMemorySnapshotStore {
        InMemorySnapshotStore::new(self.snapshots.clone())
    }

    /// Concrete specification loader over the shared registry
    pub fn specification_loader(&self) -> InMemorySpecificationLoader {
        InMemorySpecificationLoader::new(self.specifications.clone())
    }
}

impl Default for InMemoryStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
