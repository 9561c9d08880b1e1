//! In-memory repository implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use petriflow_core::{
    CaseCommand, CaseEvent, CaseId, CaseSnapshot, CoreError, EventStore, SnapshotStore,
    SpecificationId, SpecificationKey, SpecificationLoader, SpecificationModel,
};

/// Faults specific to the in-memory store
#[derive(Error, Debug)]
pub enum StateStoreError {
    /// A log must start with a launch event
    #[error("First event of case {0} is not a launch")]
    MissingLaunch(String),

    /// Event does not belong to the log it is appended to
    #[error("Event for case {event} appended to case {case}")]
    WrongCase {
        /// Case being appended to
        case: String,
        /// Case named by the event
        event: String,
    },

    /// Event number does not follow the expected sequence
    #[error("Event {sequence} of case {case} does not follow {expected}")]
    OutOfSequence {
        /// Case
        case: String,
        /// Sequence carried by the event
        sequence: u64,
        /// Sequence the log ends at
        expected: u64,
    },

    /// Log could not be encoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StateStoreError> for CoreError {
    fn from(err: StateStoreError) -> Self {
        CoreError::StoreError(err.to_string())
    }
}

/// Event log of one case
#[derive(Debug, Clone)]
pub struct StoredCase {
    /// Specification the case was launched with
    pub specification: SpecificationKey,
    /// Events in sequence order
    pub events: Vec<CaseEvent>,
    /// When the last event was appended
    pub last_appended: DateTime<Utc>,
}

impl StoredCase {
    fn last_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0)
    }
}

/// In-memory implementation of the EventStore
#[derive(Clone)]
pub struct InMemoryEventStore {
    cases: Arc<RwLock<HashMap<CaseId, StoredCase>>>,
}

impl InMemoryEventStore {
    /// Create a new event store over shared storage
    pub fn new(cases: Arc<RwLock<HashMap<CaseId, StoredCase>>>) -> Self {
        Self { cases }
    }

    /// Number of cases with at least one event
    pub async fn case_count(&self) -> usize {
        self.cases.read().await.len()
    }

    /// Last sequence number of a case, 0 if it has no log
    pub async fn last_sequence(&self, case_id: &CaseId) -> u64 {
        self.cases
            .read()
            .await
            .get(case_id)
            .map(StoredCase::last_sequence)
            .unwrap_or(0)
    }

    /// The case's log as JSON lines, one event per line
    pub async fn export(&self, case_id: &CaseId) -> Result<String, CoreError> {
        let cases = self.cases.read().await;
        let stored = cases
            .get(case_id)
            .ok_or_else(|| CoreError::CaseNotFound(case_id.to_string()))?;

        let mut lines = Vec::with_capacity(stored.events.len());
        for event in &stored.events {
            lines.push(serde_json::to_string(event).map_err(StateStoreError::from)?);
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        case_id: &CaseId,
        expected_sequence: u64,
        event: CaseEvent,
    ) -> Result<u64, CoreError> {
        if &event.case_id != case_id {
            return Err(StateStoreError::WrongCase {
                case: case_id.to_string(),
                event: event.case_id.to_string(),
            }
            .into());
        }

        let mut cases = self.cases.write().await;
        let actual = cases.get(case_id).map(StoredCase::last_sequence).unwrap_or(0);
        if actual != expected_sequence {
            warn!(
                case_id = %case_id,
                expected = expected_sequence,
                actual,
                "Append rejected: log moved on"
            );
            return Err(CoreError::ConcurrencyConflict {
                case_id: case_id.to_string(),
                expected: expected_sequence,
                actual,
            });
        }
        if event.sequence != actual + 1 {
            return Err(StateStoreError::OutOfSequence {
                case: case_id.to_string(),
                sequence: event.sequence,
                expected: actual,
            }
            .into());
        }

        let sequence = event.sequence;
        let appended_at = event.timestamp;
        match cases.get_mut(case_id) {
            Some(stored) => {
                stored.events.push(event);
                stored.last_appended = appended_at;
            }
            None => {
                let specification = match &event.command {
                    CaseCommand::Launch { specification, .. } => specification.clone(),
                    _ => return Err(StateStoreError::MissingLaunch(case_id.to_string()).into()),
                };
                cases.insert(
                    case_id.clone(),
                    StoredCase {
                        specification,
                        events: vec![event],
                        last_appended: appended_at,
                    },
                );
            }
        }

        debug!(case_id = %case_id, sequence, "Event appended");
        Ok(sequence)
    }

    async fn load_events(
        &self,
        case_id: &CaseId,
        after_sequence: u64,
    ) -> Result<Vec<CaseEvent>, CoreError> {
        let cases = self.cases.read().await;
        Ok(cases
            .get(case_id)
            .map(|stored| {
                stored
                    .events
                    .iter()
                    .filter(|e| e.sequence > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_case_ids(&self, spec_id: &SpecificationId) -> Result<Vec<CaseId>, CoreError> {
        let cases = self.cases.read().await;
        let mut ids: Vec<CaseId> = cases
            .iter()
            .filter(|(_, stored)| &stored.specification.id == spec_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory implementation of the SnapshotStore
#[derive(Clone)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<CaseId, CaseSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// Create a new snapshot store over shared storage
    pub fn new(snapshots: Arc<RwLock<HashMap<CaseId, CaseSnapshot>>>) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &CaseSnapshot) -> Result<(), CoreError> {
        let mut snapshots = self.snapshots.write().await;
        // never replace a newer snapshot with an older one
        if let Some(existing) = snapshots.get(&snapshot.case_id) {
            if existing.sequence > snapshot.sequence {
                debug!(
                    case_id = %snapshot.case_id,
                    kept = existing.sequence,
                    offered = snapshot.sequence,
                    "Stale snapshot ignored"
                );
                return Ok(());
            }
        }
        snapshots.insert(snapshot.case_id.clone(), snapshot.clone());
        debug!(case_id = %snapshot.case_id, sequence = snapshot.sequence, "Snapshot saved");
        Ok(())
    }

    async fn load_latest(&self, case_id: &CaseId) -> Result<Option<CaseSnapshot>, CoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(case_id).cloned())
    }

    async fn delete(&self, case_id: &CaseId) -> Result<(), CoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(case_id);
        Ok(())
    }
}

/// In-memory implementation of the SpecificationLoader
#[derive(Clone)]
pub struct InMemorySpecificationLoader {
    specifications: Arc<RwLock<HashMap<SpecificationKey, SpecificationModel>>>,
}

impl InMemorySpecificationLoader {
    /// Create a new loader over shared storage
    pub fn new(specifications: Arc<RwLock<HashMap<SpecificationKey, SpecificationModel>>>) -> Self {
        Self { specifications }
    }

    /// Register a compiled specification, replacing any with the same key
    pub async fn register(&self, model: SpecificationModel) -> SpecificationKey {
        let key = model.key().clone();
        let mut specifications = self.specifications.write().await;
        if specifications.insert(key.clone(), model).is_some() {
            warn!(specification = %key, "Specification replaced");
        } else {
            debug!(specification = %key, "Specification registered");
        }
        key
    }

    /// Compile a YAML document and register it
    pub async fn register_yaml(&self, yaml: &str) -> Result<SpecificationKey, CoreError> {
        let model = SpecificationModel::from_yaml(yaml)?;
        Ok(self.register(model).await)
    }

    /// Compile a JSON document and register it
    pub async fn register_json(&self, json: &str) -> Result<SpecificationKey, CoreError> {
        let model = SpecificationModel::from_json(json)?;
        Ok(self.register(model).await)
    }

    /// Registered keys, sorted
    pub async fn keys(&self) -> Vec<SpecificationKey> {
        let specifications = self.specifications.read().await;
        let mut keys: Vec<SpecificationKey> = specifications.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SpecificationLoader for InMemorySpecificationLoader {
    async fn load(&self, key: &SpecificationKey) -> Result<SpecificationModel, CoreError> {
        let specifications = self.specifications.read().await;
        specifications
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::SpecificationNotFound(key.to_string()))
    }
}
