//! Stateless engine facade
//!
//! No case is held in memory between calls. Each operation rebuilds the case
//! from its latest snapshot plus the events logged after it, applies the
//! command to a copy, appends the command with the sequence number the copy
//! was built from, and only then announces the result. Two workers racing on
//! one case cannot both append; the loser gets a retryable
//! [`CoreError::ConcurrencyConflict`].

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::case_processor::{Applied, ApplyMode, CaseProcessor};
use crate::config::EngineConfig;
use crate::domain::case_state::{CaseState, CaseStatus, FailureReason, TimerRecord};
use crate::domain::events::{Announcement, CaseCommand, CaseEvent};
use crate::domain::identifier::{CaseId, SpecificationId, SpecificationKey, WorkItemId};
use crate::domain::predicate::{
    DataValidator, JmesPathEvaluator, PredicateEvaluator, SchemaValidator,
};
use crate::domain::repository::{CaseSnapshot, EventStore, SnapshotStore, SpecificationLoader};
use crate::domain::specification::SpecificationModel;
use crate::domain::work_item::{WorkItem, WorkItemStatus};
use crate::engine::announcer::EventAnnouncer;
use crate::engine::spec_cache::SpecificationCache;
use crate::{CoreError, DataPacket};

/// Attempts made by `cancel_case` when racing other writers
const CANCEL_ATTEMPTS: usize = 3;

/// What a committed command changed
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    /// Case id
    pub case_id: CaseId,
    /// Sequence number of the committed event
    pub sequence: u64,
    /// Case status afterwards
    pub status: CaseStatus,
    /// Work items that became enabled
    pub enabled: Vec<WorkItem>,
    /// Work items that completed
    pub completed: Vec<WorkItem>,
    /// Work items that were cancelled, withdrawn or failed
    pub cancelled: Vec<WorkItem>,
    /// Announcements pushed to listeners
    pub announcements: Vec<Announcement>,
}

impl CaseOutcome {
    fn between(before: Option<&CaseState>, applied: &Applied) -> Self {
        let after = &applied.state;
        let changed_to = |status: &dyn Fn(WorkItemStatus) -> bool| -> Vec<WorkItem> {
            let mut items: Vec<WorkItem> = after
                .work_items
                .values()
                .filter(|wi| status(wi.status))
                .filter(|wi| {
                    before
                        .and_then(|b| b.work_items.get(&wi.id))
                        .map_or(true, |prev| prev.status != wi.status)
                })
                .cloned()
                .collect();
            items.sort_by_key(|wi| wi.serial);
            items
        };

        Self {
            case_id: after.case_id.clone(),
            sequence: after.sequence,
            status: after.status.clone(),
            enabled: changed_to(&|s| s == WorkItemStatus::Enabled),
            completed: changed_to(&|s| s == WorkItemStatus::Complete),
            cancelled: changed_to(&|s| {
                matches!(s, WorkItemStatus::Cancelled | WorkItemStatus::Failed)
            }),
            announcements: applied.announcements.clone(),
        }
    }
}

/// Abort flag shared by the commands currently running against one case
struct InFlight {
    flag: Arc<AtomicBool>,
    commands: usize,
}

/// Registration of one running command, released on drop
struct InFlightGuard<'a> {
    registry: &'a DashMap<CaseId, InFlight>,
    case_id: CaseId,
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.registry.entry(self.case_id.clone()) {
            let running = entry.get_mut();
            running.commands = running.commands.saturating_sub(1);
            if running.commands == 0 {
                entry.remove();
            }
        }
    }
}

/// Stateless workflow engine
pub struct StatelessEngine {
    events: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    specifications: Arc<SpecificationCache>,
    announcer: Arc<EventAnnouncer>,
    predicates: Arc<dyn PredicateEvaluator>,
    validator: Arc<dyn DataValidator>,
    config: EngineConfig,
    in_flight: DashMap<CaseId, InFlight>,
}

impl StatelessEngine {
    /// Engine over an event store and a specification loader
    pub fn new(events: Arc<dyn EventStore>, loader: Arc<dyn SpecificationLoader>) -> Self {
        Self {
            events,
            snapshots: None,
            specifications: Arc::new(SpecificationCache::new(loader)),
            announcer: Arc::new(EventAnnouncer::new()),
            predicates: Arc::new(JmesPathEvaluator),
            validator: Arc::new(SchemaValidator),
            config: EngineConfig::default(),
            in_flight: DashMap::new(),
        }
    }

    /// Persist snapshots every `snapshot_interval` events
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Share a specification cache with other engines in the process
    pub fn with_specification_cache(mut self, cache: Arc<SpecificationCache>) -> Self {
        self.specifications = cache;
        self
    }

    /// Share an announcer with other engines in the process
    pub fn with_announcer(mut self, announcer: Arc<EventAnnouncer>) -> Self {
        self.announcer = announcer;
        self
    }

    /// Replace the split predicate evaluator
    pub fn with_predicates(mut self, predicates: Arc<dyn PredicateEvaluator>) -> Self {
        self.predicates = predicates;
        self
    }

    /// Replace the work item output validator
    pub fn with_validator(mut self, validator: Arc<dyn DataValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Announcer used for every committed command
    pub fn announcer(&self) -> &Arc<EventAnnouncer> {
        &self.announcer
    }

    /// Specification cache
    pub fn specifications(&self) -> &Arc<SpecificationCache> {
        &self.specifications
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an already compiled specification
    pub fn load_specification(&self, model: SpecificationModel) -> Arc<SpecificationModel> {
        self.specifications.insert(model)
    }

    /// Launch a case under a fresh id
    pub async fn launch_case(
        &self,
        specification: &SpecificationKey,
        data: DataPacket,
    ) -> Result<CaseOutcome, CoreError> {
        self.launch_case_with_id(CaseId::generate(), specification, data)
            .await
    }

    /// Launch a case under a caller-chosen id
    pub async fn launch_case_with_id(
        &self,
        case_id: CaseId,
        specification: &SpecificationKey,
        data: DataPacket,
    ) -> Result<CaseOutcome, CoreError> {
        let spec = self.specifications.get_or_load(specification).await?;
        if !self.events.load_events(&case_id, 0).await?.is_empty() {
            return Err(CoreError::CaseAlreadyExists(case_id.to_string()));
        }

        let event = CaseEvent {
            case_id: case_id.clone(),
            sequence: 1,
            timestamp: Utc::now(),
            command: CaseCommand::Launch {
                specification: specification.clone(),
                data,
            },
        };
        let guard = self.register(&case_id);
        let applied = CaseProcessor::new(
            &spec,
            &self.config,
            self.predicates.as_ref(),
            self.validator.as_ref(),
        )
        .with_abort(&guard.flag)
        .apply(None, &event, ApplyMode::Live)?;

        info!(case_id = %case_id, specification = %specification, "Launching case");
        self.commit(None, event, applied).await
    }

    /// Check out an enabled work item
    pub async fn checkout_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::StartWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Complete an executing work item; output is validated first
    pub async fn complete_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
        output: DataPacket,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::CompleteWorkItem {
                work_item: work_item.clone(),
                output,
            },
        )
        .await
    }

    /// Complete an enabled or executing work item without validation
    pub async fn force_complete_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
        output: DataPacket,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::ForceCompleteWorkItem {
                work_item: work_item.clone(),
                output,
            },
        )
        .await
    }

    /// Cancel a live work item
    pub async fn cancel_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::CancelWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Suspend a work item
    pub async fn suspend_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::SuspendWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Unsuspend a work item
    pub async fn unsuspend_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::UnsuspendWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Return an executing work item to the offer
    pub async fn rollback_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::RollbackWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Complete an enabled work item with empty output
    pub async fn skip_work_item(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::SkipWorkItem {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Add a child next to `sibling` in a dynamic multi-instance task
    pub async fn add_instance(
        &self,
        case_id: &CaseId,
        sibling: &WorkItemId,
        data: DataPacket,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::AddInstance {
                sibling: sibling.clone(),
                data,
            },
        )
        .await
    }

    /// Deliver a timer expiry
    pub async fn expire_timer(
        &self,
        case_id: &CaseId,
        work_item: &WorkItemId,
    ) -> Result<CaseOutcome, CoreError> {
        self.execute(
            case_id,
            CaseCommand::ExpireTimer {
                work_item: work_item.clone(),
            },
        )
        .await
    }

    /// Suspend a running case
    pub async fn suspend_case(&self, case_id: &CaseId) -> Result<CaseOutcome, CoreError> {
        self.execute(case_id, CaseCommand::SuspendCase).await
    }

    /// Resume a suspended case
    pub async fn resume_case(&self, case_id: &CaseId) -> Result<CaseOutcome, CoreError> {
        self.execute(case_id, CaseCommand::ResumeCase).await
    }

    /// Cancel a case
    ///
    /// Raises the abort flag of commands still running against the case so
    /// their cascades give up, then appends the cancellation, retrying on
    /// conflicts.
    pub async fn cancel_case(&self, case_id: &CaseId) -> Result<CaseOutcome, CoreError> {
        if let Some(running) = self.in_flight.get(case_id) {
            running.flag.store(true, Ordering::SeqCst);
            debug!(case_id = %case_id, commands = running.commands, "Aborting in-flight commands");
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply_command(case_id, CaseCommand::CancelCase, false).await {
                Err(e) if e.is_retryable() && attempt < CANCEL_ATTEMPTS => {
                    debug!(case_id = %case_id, attempt, "Retrying cancellation after conflict");
                }
                other => return other,
            }
        }
    }

    /// Number of cases with a command currently running on this engine
    pub fn in_flight_cases(&self) -> usize {
        self.in_flight.len()
    }

    /// Enabled work items of a case
    pub async fn get_enabled_work_items(
        &self,
        case_id: &CaseId,
    ) -> Result<Vec<WorkItem>, CoreError> {
        let state = self.reconstruct(case_id).await?;
        Ok(state
            .work_items_with_status(WorkItemStatus::Enabled)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Every work item of a case in creation order
    pub async fn get_work_items(&self, case_id: &CaseId) -> Result<Vec<WorkItem>, CoreError> {
        let state = self.reconstruct(case_id).await?;
        let mut items: Vec<WorkItem> = state.work_items.into_values().collect();
        items.sort_by_key(|wi| wi.serial);
        Ok(items)
    }

    /// Current state of a case
    pub async fn get_case_state(&self, case_id: &CaseId) -> Result<CaseState, CoreError> {
        self.reconstruct(case_id).await
    }

    /// Pending timers of a case ordered by deadline
    pub async fn get_pending_timers(
        &self,
        case_id: &CaseId,
    ) -> Result<Vec<TimerRecord>, CoreError> {
        let state = self.reconstruct(case_id).await?;
        Ok(state.pending_timers().into_iter().cloned().collect())
    }

    /// States of every case launched from a specification
    pub async fn list_cases(
        &self,
        specification: &SpecificationId,
    ) -> Result<Vec<CaseState>, CoreError> {
        let ids = self.events.load_case_ids(specification).await?;
        try_join_all(ids.iter().map(|id| self.reconstruct(id))).await
    }

    /// Rebuild a case from its snapshot and event log
    pub async fn reconstruct(&self, case_id: &CaseId) -> Result<CaseState, CoreError> {
        let snapshot = match &self.snapshots {
            Some(store) => store.load_latest(case_id).await?,
            None => None,
        };
        let (mut state, after) = match snapshot {
            Some(snapshot) => (Some(snapshot.state), snapshot.sequence),
            None => (None, 0),
        };
        let events = self.events.load_events(case_id, after).await?;

        let key = match (&state, events.first()) {
            (Some(state), _) => state.specification.clone(),
            (None, Some(first)) => match &first.command {
                CaseCommand::Launch { specification, .. } => specification.clone(),
                _ => {
                    return Err(CoreError::StoreError(format!(
                        "Event log of case {} does not start with a launch",
                        case_id
                    )))
                }
            },
            (None, None) => return Err(CoreError::CaseNotFound(case_id.to_string())),
        };
        let spec = self.specifications.get_or_load(&key).await?;

        let processor = CaseProcessor::new(
            &spec,
            &self.config,
            self.predicates.as_ref(),
            self.validator.as_ref(),
        );
        for event in &events {
            state = Some(processor.apply(state.as_ref(), event, ApplyMode::Replay)?.state);
        }
        debug!(case_id = %case_id, from = after, replayed = events.len(), "Case reconstructed");
        state.ok_or_else(|| CoreError::CaseNotFound(case_id.to_string()))
    }

    async fn execute(
        &self,
        case_id: &CaseId,
        command: CaseCommand,
    ) -> Result<CaseOutcome, CoreError> {
        self.apply_command(case_id, command, true).await
    }

    async fn apply_command(
        &self,
        case_id: &CaseId,
        command: CaseCommand,
        abortable: bool,
    ) -> Result<CaseOutcome, CoreError> {
        let state = self.reconstruct(case_id).await?;
        let guard = abortable.then(|| self.register(case_id));
        let spec = self.specifications.get_or_load(&state.specification).await?;
        let event = CaseEvent {
            case_id: case_id.clone(),
            sequence: state.sequence + 1,
            timestamp: Utc::now(),
            command,
        };

        let mut processor = CaseProcessor::new(
            &spec,
            &self.config,
            self.predicates.as_ref(),
            self.validator.as_ref(),
        );
        if let Some(guard) = &guard {
            processor = processor.with_abort(&guard.flag);
        }
        let applied = processor.apply(Some(&state), &event, ApplyMode::Live)?;
        debug!(case_id = %case_id, command = event.command.name(), "Command applied");

        self.commit(Some(&state), event, applied).await
    }

    /// Append, snapshot, announce, then surface business outcomes
    async fn commit(
        &self,
        before: Option<&CaseState>,
        event: CaseEvent,
        applied: Applied,
    ) -> Result<CaseOutcome, CoreError> {
        let case_id = event.case_id.clone();
        let expected = before.map_or(0, |s| s.sequence);
        let sequence = self.events.append(&case_id, expected, event).await?;

        if let Some(store) = &self.snapshots {
            let interval = self.config.snapshot_interval;
            if interval > 0 && sequence % interval == 0 {
                let snapshot = CaseSnapshot {
                    case_id: case_id.clone(),
                    sequence,
                    state: applied.state.clone(),
                };
                // the log stays authoritative
                if let Err(e) = store.save(&snapshot).await {
                    warn!(case_id = %case_id, sequence, error = %e, "Failed to save snapshot");
                }
            }
        }

        self.announcer.announce_all(&applied.announcements);
        let outcome = CaseOutcome::between(before, &applied);

        for announcement in &applied.announcements {
            match announcement {
                Announcement::CaseDeadlocked { tasks, .. } => {
                    return Err(CoreError::DeadlockDetected {
                        case_id: case_id.to_string(),
                        tasks: tasks.iter().map(|t| t.to_string()).collect(),
                    });
                }
                Announcement::CaseFailed {
                    reason: FailureReason::LoopBoundExceeded { edge, bound },
                    ..
                } => {
                    return Err(CoreError::LoopBoundExceeded {
                        case_id: case_id.to_string(),
                        edge: edge.clone(),
                        bound: *bound,
                    });
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    fn register(&self, case_id: &CaseId) -> InFlightGuard<'_> {
        let flag = {
            let mut running = self.in_flight.entry(case_id.clone()).or_insert_with(|| InFlight {
                flag: Arc::new(AtomicBool::new(false)),
                commands: 0,
            });
            running.commands += 1;
            Arc::clone(&running.flag)
        };
        InFlightGuard {
            registry: &self.in_flight,
            case_id: case_id.clone(),
            flag,
        }
    }
}
