//! Per-case token store
//!
//! A case is a tree of net instances (the root net plus one instance per
//! running composite task), the work items offered so far, loop counters and
//! pending timers. Every collection is ordered so two replays of the same
//! event log produce identical, byte-for-byte equal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identifier::{
    CaseId, ConditionId, Identifier, NetId, SpecificationKey, TaskId, WorkItemId,
};
use super::marking::Marking;
use super::work_item::{WorkItem, WorkItemStatus};
use crate::{CoreError, DataPacket};

/// Why a case is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspendReason {
    /// Nothing can fire and no work is outstanding
    Deadlocked,
    /// Parked by an operator
    Operator,
}

/// Why a case failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// A loop-back edge exceeded the configured bound
    LoopBoundExceeded {
        /// Offending edge
        edge: String,
        /// Configured bound
        bound: u32,
    },
}

/// Case status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    /// Accepting commands
    Running,
    /// Waiting for operator intervention
    Suspended(SuspendReason),
    /// Output condition of the root net reached
    Completed,
    /// Cancelled by a command
    Cancelled,
    /// Stopped by a safety limit
    Failed(FailureReason),
}

impl CaseStatus {
    /// Whether the case can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::Completed | CaseStatus::Cancelled | CaseStatus::Failed(_)
        )
    }
}

/// Link from a sub-net instance to the composite task that started it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Parent net instance
    pub net: Identifier,
    /// Composite task in the parent
    pub task: TaskId,
}

/// Progress of a running multi-instance task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiInstanceProgress {
    /// Children created so far
    pub launched: u32,
    /// Children completed so far
    pub completed: u32,
    /// Children cancelled before completing
    #[serde(default)]
    pub cancelled: u32,
    /// Completions needed before the task exits
    pub threshold: u32,
    /// Upper bound on children
    pub max: u32,
    /// Whether children may be added while running
    pub dynamic: bool,
    /// Outputs of completed children by ordinal
    pub outputs: BTreeMap<u32, DataPacket>,
}

impl MultiInstanceProgress {
    /// Completions needed given how many children actually exist
    pub fn required(&self) -> u32 {
        self.threshold.min(self.launched.saturating_sub(self.cancelled))
    }

    /// Children still outstanding
    pub fn outstanding(&self) -> u32 {
        self.launched
            .saturating_sub(self.completed)
            .saturating_sub(self.cancelled)
    }

    /// Whether enough children completed for the task to exit
    pub fn is_satisfied(&self) -> bool {
        self.completed >= self.required()
    }
}

/// One running instance of a net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetInstance {
    /// Thread of control of this instance
    pub identifier: Identifier,

    /// Net being run
    pub net_id: NetId,

    /// Composite task that owns this instance, `None` for the root net
    pub parent: Option<ParentLink>,

    /// Token distribution
    pub marking: Marking,

    /// Live instances per task
    pub active: BTreeMap<TaskId, u32>,

    /// Tokens consumed by busy single-instance tasks
    pub consumed: BTreeMap<TaskId, Vec<(ConditionId, Identifier)>>,

    /// Running multi-instance tasks
    pub multi_instance: BTreeMap<TaskId, MultiInstanceProgress>,

    /// Net-level data
    pub data: DataPacket,

    /// Next child ordinal for sub-nets and multi-instance children
    pub next_child: u32,
}

impl NetInstance {
    /// Fresh instance with a single token on the input condition
    pub fn start(
        identifier: Identifier,
        net_id: NetId,
        input_condition: &ConditionId,
        parent: Option<ParentLink>,
        data: DataPacket,
    ) -> Self {
        let mut marking = Marking::new();
        marking.add(input_condition, &identifier, 1);
        Self {
            identifier,
            net_id,
            parent,
            marking,
            active: BTreeMap::new(),
            consumed: BTreeMap::new(),
            multi_instance: BTreeMap::new(),
            data,
            next_child: 1,
        }
    }

    /// Live instances of `task`
    pub fn active_count(&self, task: &TaskId) -> u32 {
        self.active.get(task).copied().unwrap_or(0)
    }

    /// Whether `task` has live instances
    pub fn is_busy(&self, task: &TaskId) -> bool {
        self.active_count(task) > 0
    }

    /// Reserve the next child identifier
    pub fn next_child_identifier(&mut self) -> Identifier {
        let child = self.identifier.child(self.next_child);
        self.next_child += 1;
        child
    }
}

/// Timer registered for a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    /// Work item the timer belongs to
    pub work_item: WorkItemId,
    /// Task of that work item
    pub task: TaskId,
    /// When the external scheduler should deliver the expiry
    pub deadline: DateTime<Utc>,
}

/// Aggregate: full state of one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseState {
    /// Case id
    pub case_id: CaseId,

    /// Specification the case runs
    pub specification: SpecificationKey,

    /// Current status
    pub status: CaseStatus,

    /// Sequence number of the last applied event
    pub sequence: u64,

    /// Net instances keyed by identifier
    pub nets: BTreeMap<Identifier, NetInstance>,

    /// Every work item ever offered
    pub work_items: BTreeMap<WorkItemId, WorkItem>,

    /// Firings per loop-back edge
    pub loop_counters: BTreeMap<String, u32>,

    /// Pending timers
    pub timers: BTreeMap<WorkItemId, TimerRecord>,

    /// Next work item serial
    pub next_serial: u64,

    /// Launch timestamp
    pub launched_at: DateTime<Utc>,

    /// Timestamp of the last applied event
    pub updated_at: DateTime<Utc>,
}

impl CaseState {
    /// Empty running case
    pub fn new(case_id: CaseId, specification: SpecificationKey, at: DateTime<Utc>) -> Self {
        Self {
            case_id,
            specification,
            status: CaseStatus::Running,
            sequence: 0,
            nets: BTreeMap::new(),
            work_items: BTreeMap::new(),
            loop_counters: BTreeMap::new(),
            timers: BTreeMap::new(),
            next_serial: 1,
            launched_at: at,
            updated_at: at,
        }
    }

    /// Root net instance
    pub fn root(&self) -> Result<&NetInstance, CoreError> {
        self.net(&Identifier::root(&self.case_id))
    }

    /// Net instance by identifier
    pub fn net(&self, identifier: &Identifier) -> Result<&NetInstance, CoreError> {
        self.nets.get(identifier).ok_or_else(|| {
            CoreError::StructuralError(format!(
                "Net instance {} not found in case {}",
                identifier, self.case_id
            ))
        })
    }

    /// Mutable net instance by identifier
    pub fn net_mut(&mut self, identifier: &Identifier) -> Result<&mut NetInstance, CoreError> {
        let case_id = &self.case_id;
        self.nets.get_mut(identifier).ok_or_else(|| {
            CoreError::StructuralError(format!(
                "Net instance {} not found in case {}",
                identifier, case_id
            ))
        })
    }

    /// Work item by id
    pub fn work_item(&self, id: &WorkItemId) -> Result<&WorkItem, CoreError> {
        self.work_items
            .get(id)
            .ok_or_else(|| CoreError::WorkItemNotFound(id.to_string()))
    }

    /// Mutable work item by id
    pub fn work_item_mut(&mut self, id: &WorkItemId) -> Result<&mut WorkItem, CoreError> {
        self.work_items
            .get_mut(id)
            .ok_or_else(|| CoreError::WorkItemNotFound(id.to_string()))
    }

    /// Allocate the next deterministic work item id
    pub fn allocate_work_item_id(&mut self, task: &TaskId) -> (WorkItemId, u64) {
        let serial = self.next_serial;
        self.next_serial += 1;
        (WorkItemId::for_task(&self.case_id, task, serial), serial)
    }

    /// Live work items in creation order
    pub fn live_work_items(&self) -> Vec<&WorkItem> {
        self.sorted(|wi| wi.is_live())
    }

    /// Work items with the given status in creation order
    pub fn work_items_with_status(&self, status: WorkItemStatus) -> Vec<&WorkItem> {
        self.sorted(|wi| wi.status == status)
    }

    /// Live work items of `task` in net instance `net`
    pub fn live_items_for(&self, net: &Identifier, task: &TaskId) -> Vec<WorkItemId> {
        self.sorted(|wi| wi.is_live() && &wi.net == net && &wi.task_id == task)
            .into_iter()
            .map(|wi| wi.id.clone())
            .collect()
    }

    fn sorted<F>(&self, filter: F) -> Vec<&WorkItem>
    where
        F: Fn(&WorkItem) -> bool,
    {
        let mut items: Vec<&WorkItem> = self.work_items.values().filter(|wi| filter(wi)).collect();
        items.sort_by_key(|wi| wi.serial);
        items
    }

    /// Pending timers ordered by deadline
    pub fn pending_timers(&self) -> Vec<&TimerRecord> {
        let mut timers: Vec<&TimerRecord> = self.timers.values().collect();
        timers.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.work_item.cmp(&b.work_item)));
        timers
    }

    /// Tokens across every net instance
    pub fn total_tokens(&self) -> u32 {
        self.nets.values().map(|n| n.marking.total()).sum()
    }

    /// Whether the case accepts work item commands
    pub fn ensure_running(&self) -> Result<(), CoreError> {
        match self.status {
            CaseStatus::Running => Ok(()),
            ref other => Err(CoreError::CaseNotRunning(format!(
                "Case {} is {:?}",
                self.case_id, other
            ))),
        }
    }

    /// Whether the case accepts administrative commands
    pub fn ensure_not_terminal(&self) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::CaseNotRunning(format!(
                "Case {} is {:?}",
                self.case_id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CaseState {
        let case_id = CaseId::from("case");
        let mut state = CaseState::new(case_id.clone(), SpecificationKey::new("s", "1"), Utc::now());
        let root = NetInstance::start(
            Identifier::root(&case_id),
            NetId::from("main"),
            &ConditionId::from("i"),
            None,
            DataPacket::empty(),
        );
        state.nets.insert(root.identifier.clone(), root);
        state
    }

    #[test]
    fn test_root_instance_starts_with_one_token() {
        let state = state();
        let root = state.root().unwrap();
        assert_eq!(root.marking.count(&ConditionId::from("i")), 1);
        assert_eq!(state.total_tokens(), 1);
    }

    #[test]
    fn test_work_item_ids_follow_serial() {
        let mut state = state();
        let (first, s1) = state.allocate_work_item_id(&TaskId::from("a"));
        let (second, s2) = state.allocate_work_item_id(&TaskId::from("b"));
        assert_eq!(first.as_str(), "case:a#1");
        assert_eq!(second.as_str(), "case:b#2");
        assert!(s1 < s2);
    }

    #[test]
    fn test_child_identifiers_are_sequential() {
        let mut state = state();
        let root_id = Identifier::root(&state.case_id);
        let root = state.net_mut(&root_id).unwrap();
        assert_eq!(root.next_child_identifier().as_str(), "case.1");
        assert_eq!(root.next_child_identifier().as_str(), "case.2");
    }

    #[test]
    fn test_multi_instance_required_caps_at_launched() {
        let progress = MultiInstanceProgress {
            launched: 3,
            completed: 2,
            cancelled: 1,
            threshold: 3,
            max: 5,
            dynamic: false,
            outputs: BTreeMap::new(),
        };
        assert_eq!(progress.required(), 2);
        assert_eq!(progress.outstanding(), 0);
        assert!(progress.is_satisfied());
    }

    #[test]
    fn test_terminal_case_rejects_commands() {
        let mut state = state();
        state.status = CaseStatus::Cancelled;
        assert!(state.ensure_running().is_err());
        assert!(state.ensure_not_terminal().is_err());

        state.status = CaseStatus::Suspended(SuspendReason::Deadlocked);
        assert!(state.ensure_running().is_err());
        assert!(state.ensure_not_terminal().is_ok());
    }
}
