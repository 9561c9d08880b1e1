//! Repository traits for the Petriflow engine
//!
//! The engine keeps no case in memory between calls. Cases live in an
//! append-only event log, optionally shortened by snapshots, and
//! specifications come from a loader. External crates implement these traits
//! to provide different persistence mechanisms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::case_state::CaseState;
use super::events::CaseEvent;
use super::identifier::{CaseId, SpecificationId, SpecificationKey};
use super::specification::SpecificationModel;
use crate::CoreError;

/// Append-only, per-case ordered event log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `event` if the case's log currently ends at `expected_sequence`
    ///
    /// Returns the new last sequence number. A mismatch is reported as
    /// [`CoreError::ConcurrencyConflict`] and nothing is written.
    async fn append(
        &self,
        case_id: &CaseId,
        expected_sequence: u64,
        event: CaseEvent,
    ) -> Result<u64, CoreError>;

    /// Events with a sequence number greater than `after_sequence`, in order
    async fn load_events(
        &self,
        case_id: &CaseId,
        after_sequence: u64,
    ) -> Result<Vec<CaseEvent>, CoreError>;

    /// Ids of every case launched from the specification
    async fn load_case_ids(&self, spec_id: &SpecificationId) -> Result<Vec<CaseId>, CoreError>;
}

/// Point-in-time copy of a case, equivalent to replaying its log up to `sequence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    /// Case id
    pub case_id: CaseId,
    /// Last event folded into the state
    pub sequence: u64,
    /// The state
    pub state: CaseState,
}

/// Snapshot persistence
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing older ones
    async fn save(&self, snapshot: &CaseSnapshot) -> Result<(), CoreError>;

    /// Most recent snapshot for a case
    async fn load_latest(&self, case_id: &CaseId) -> Result<Option<CaseSnapshot>, CoreError>;

    /// Remove every snapshot of a case
    async fn delete(&self, case_id: &CaseId) -> Result<(), CoreError>;
}

/// Source of validated specifications
#[async_trait]
pub trait SpecificationLoader: Send + Sync {
    /// Load a specification by id and version
    ///
    /// Returns [`CoreError::SpecificationNotFound`] for unknown keys.
    async fn load(&self, key: &SpecificationKey) -> Result<SpecificationModel, CoreError>;
}
