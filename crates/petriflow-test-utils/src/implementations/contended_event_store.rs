//! Event store that lets a rival writer win the next append.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use petriflow_core::{CaseCommand, CaseEvent, CaseId, CoreError, EventStore, SpecificationId};

/// Wraps a real event store; the next append to an existing case is preceded
/// by a rival command appended at the same position
pub struct ContendedEventStore {
    inner: Arc<dyn EventStore>,
    rivals: Mutex<Vec<CaseCommand>>,
}

impl ContendedEventStore {
    /// Wrap `inner` with no pending rivals
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            rivals: Mutex::new(Vec::new()),
        }
    }

    /// Queue a rival command for the next contended append
    pub fn rival(&self, command: CaseCommand) {
        self.rivals.lock().push(command);
    }

    /// Rivals not yet injected
    pub fn pending_rivals(&self) -> usize {
        self.rivals.lock().len()
    }
}

#[async_trait]
impl EventStore for ContendedEventStore {
    async fn append(
        &self,
        case_id: &CaseId,
        expected_sequence: u64,
        event: CaseEvent,
    ) -> Result<u64, CoreError> {
        let rival = if expected_sequence > 0 {
            let mut rivals = self.rivals.lock();
            if rivals.is_empty() {
                None
            } else {
                Some(rivals.remove(0))
            }
        } else {
            None
        };

        if let Some(command) = rival {
            debug!(case_id = %case_id, sequence = event.sequence, command = command.name(), "Injecting rival append");
            let rival_event = CaseEvent {
                case_id: case_id.clone(),
                sequence: expected_sequence + 1,
                timestamp: event.timestamp,
                command,
            };
            self.inner
                .append(case_id, expected_sequence, rival_event)
                .await?;
        }
        self.inner.append(case_id, expected_sequence, event).await
    }

    async fn load_events(
        &self,
        case_id: &CaseId,
        after_sequence: u64,
    ) -> Result<Vec<CaseEvent>, CoreError> {
        self.inner.load_events(case_id, after_sequence).await
    }

    async fn load_case_ids(&self, spec_id: &SpecificationId) -> Result<Vec<CaseId>, CoreError> {
        self.inner.load_case_ids(spec_id).await
    }
}
