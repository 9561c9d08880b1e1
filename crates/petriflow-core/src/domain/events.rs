//! Case event log and outbound announcements
//!
//! [`CaseEvent`]s are the commands persisted in the event log; replaying them
//! in sequence order rebuilds a case. [`Announcement`]s are what listeners
//! see after a command commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::case_state::FailureReason;
use super::identifier::{CaseId, Identifier, SpecificationKey, TaskId, WorkItemId};
use crate::DataPacket;

/// Command recorded in a case's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseCommand {
    /// Case launch
    Launch {
        /// Specification to run
        specification: SpecificationKey,
        /// Initial root net data
        data: DataPacket,
    },
    /// Work item checkout; fires its task
    StartWorkItem {
        /// Item to check out
        work_item: WorkItemId,
    },
    /// Work item completion
    CompleteWorkItem {
        /// Item to complete
        work_item: WorkItemId,
        /// Validated output
        output: DataPacket,
    },
    /// Administrative completion
    ForceCompleteWorkItem {
        /// Item to complete
        work_item: WorkItemId,
        /// Output, not validated
        output: DataPacket,
    },
    /// Work item cancellation
    CancelWorkItem {
        /// Item to cancel
        work_item: WorkItemId,
    },
    /// Park a work item
    SuspendWorkItem {
        /// Item to suspend
        work_item: WorkItemId,
    },
    /// Unpark a work item
    UnsuspendWorkItem {
        /// Item to resume
        work_item: WorkItemId,
    },
    /// Return a checked-out item to the offer
    RollbackWorkItem {
        /// Item to roll back
        work_item: WorkItemId,
    },
    /// Complete an enabled item without output
    SkipWorkItem {
        /// Item to skip
        work_item: WorkItemId,
    },
    /// Add a child to a dynamic multi-instance task
    AddInstance {
        /// Any live sibling of the new child
        sibling: WorkItemId,
        /// Data for the new child
        data: DataPacket,
    },
    /// Timer expiry delivered by an external scheduler
    ExpireTimer {
        /// Item whose timer expired
        work_item: WorkItemId,
    },
    /// Operator suspension of the whole case
    SuspendCase,
    /// Resume a suspended case
    ResumeCase,
    /// Case cancellation
    CancelCase,
}

impl CaseCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CaseCommand::Launch { .. } => "launch",
            CaseCommand::StartWorkItem { .. } => "start_work_item",
            CaseCommand::CompleteWorkItem { .. } => "complete_work_item",
            CaseCommand::ForceCompleteWorkItem { .. } => "force_complete_work_item",
            CaseCommand::CancelWorkItem { .. } => "cancel_work_item",
            CaseCommand::SuspendWorkItem { .. } => "suspend_work_item",
            CaseCommand::UnsuspendWorkItem { .. } => "unsuspend_work_item",
            CaseCommand::RollbackWorkItem { .. } => "rollback_work_item",
            CaseCommand::SkipWorkItem { .. } => "skip_work_item",
            CaseCommand::AddInstance { .. } => "add_instance",
            CaseCommand::ExpireTimer { .. } => "expire_timer",
            CaseCommand::SuspendCase => "suspend_case",
            CaseCommand::ResumeCase => "resume_case",
            CaseCommand::CancelCase => "cancel_case",
        }
    }
}

/// Persisted event: one command at one position of a case's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEvent {
    /// Case the event belongs to
    pub case_id: CaseId,
    /// Position in the log, starting at 1
    pub sequence: u64,
    /// When the command was accepted; replay uses this instead of the clock
    pub timestamp: DateTime<Utc>,
    /// The command
    pub command: CaseCommand,
}

/// Listener category, mirroring the separate listener kinds of the engine API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnouncementCategory {
    /// Case lifecycle
    Case,
    /// Work item lifecycle
    WorkItem,
    /// Timer lifecycle
    Timer,
}

/// State change pushed to listeners after a command commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Announcement {
    /// Case launched
    CaseStarted {
        /// Case
        case_id: CaseId,
        /// Specification
        specification: SpecificationKey,
    },
    /// Case reached its output condition
    CaseCompleted {
        /// Case
        case_id: CaseId,
        /// Final root net data
        data: DataPacket,
    },
    /// Case cancelled
    CaseCancelled {
        /// Case
        case_id: CaseId,
    },
    /// Case suspended by an operator
    CaseSuspended {
        /// Case
        case_id: CaseId,
    },
    /// Case resumed
    CaseResumed {
        /// Case
        case_id: CaseId,
    },
    /// Case cannot progress
    CaseDeadlocked {
        /// Case
        case_id: CaseId,
        /// Tasks left waiting
        tasks: Vec<TaskId>,
    },
    /// Case failed
    CaseFailed {
        /// Case
        case_id: CaseId,
        /// Failure cause
        reason: FailureReason,
    },
    /// Sub-net instance started by a composite task
    SubnetStarted {
        /// Case
        case_id: CaseId,
        /// New net instance
        net: Identifier,
        /// Composite task
        task: TaskId,
    },
    /// Sub-net instance completed
    SubnetCompleted {
        /// Case
        case_id: CaseId,
        /// Finished net instance
        net: Identifier,
        /// Composite task
        task: TaskId,
    },
    /// Work item offered
    WorkItemEnabled {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
        /// Task
        task: TaskId,
    },
    /// Work item checked out
    WorkItemStarted {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item completed
    WorkItemCompleted {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item cancelled or withdrawn
    WorkItemCancelled {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item failed with its case
    WorkItemFailed {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item suspended
    WorkItemSuspended {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item unsuspended
    WorkItemResumed {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Work item returned to the offer
    WorkItemRolledBack {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Timer armed
    TimerStarted {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
        /// Expiry time
        deadline: DateTime<Utc>,
    },
    /// Timer delivered
    TimerExpired {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
    /// Timer disarmed because its item finished
    TimerCancelled {
        /// Case
        case_id: CaseId,
        /// Item
        work_item: WorkItemId,
    },
}

impl Announcement {
    /// Case the announcement concerns
    pub fn case_id(&self) -> &CaseId {
        match self {
            Announcement::CaseStarted { case_id, .. }
            | Announcement::CaseCompleted { case_id, .. }
            | Announcement::CaseCancelled { case_id }
            | Announcement::CaseSuspended { case_id }
            | Announcement::CaseResumed { case_id }
            | Announcement::CaseDeadlocked { case_id, .. }
            | Announcement::CaseFailed { case_id, .. }
            | Announcement::SubnetStarted { case_id, .. }
            | Announcement::SubnetCompleted { case_id, .. }
            | Announcement::WorkItemEnabled { case_id, .. }
            | Announcement::WorkItemStarted { case_id, .. }
            | Announcement::WorkItemCompleted { case_id, .. }
            | Announcement::WorkItemCancelled { case_id, .. }
            | Announcement::WorkItemFailed { case_id, .. }
            | Announcement::WorkItemSuspended { case_id, .. }
            | Announcement::WorkItemResumed { case_id, .. }
            | Announcement::WorkItemRolledBack { case_id, .. }
            | Announcement::TimerStarted { case_id, .. }
            | Announcement::TimerExpired { case_id, .. }
            | Announcement::TimerCancelled { case_id, .. } => case_id,
        }
    }

    /// Listener category
    pub fn category(&self) -> AnnouncementCategory {
        match self {
            Announcement::WorkItemEnabled { .. }
            | Announcement::WorkItemStarted { .. }
            | Announcement::WorkItemCompleted { .. }
            | Announcement::WorkItemCancelled { .. }
            | Announcement::WorkItemFailed { .. }
            | Announcement::WorkItemSuspended { .. }
            | Announcement::WorkItemResumed { .. }
            | Announcement::WorkItemRolledBack { .. } => AnnouncementCategory::WorkItem,
            Announcement::TimerStarted { .. }
            | Announcement::TimerExpired { .. }
            | Announcement::TimerCancelled { .. } => AnnouncementCategory::Timer,
            _ => AnnouncementCategory::Case,
        }
    }

    /// Dotted event name
    pub fn event_type(&self) -> &'static str {
        match self {
            Announcement::CaseStarted { .. } => "case.started",
            Announcement::CaseCompleted { .. } => "case.completed",
            Announcement::CaseCancelled { .. } => "case.cancelled",
            Announcement::CaseSuspended { .. } => "case.suspended",
            Announcement::CaseResumed { .. } => "case.resumed",
            Announcement::CaseDeadlocked { .. } => "case.deadlocked",
            Announcement::CaseFailed { .. } => "case.failed",
            Announcement::SubnetStarted { .. } => "subnet.started",
            Announcement::SubnetCompleted { .. } => "subnet.completed",
            Announcement::WorkItemEnabled { .. } => "work_item.enabled",
            Announcement::WorkItemStarted { .. } => "work_item.started",
            Announcement::WorkItemCompleted { .. } => "work_item.completed",
            Announcement::WorkItemCancelled { .. } => "work_item.cancelled",
            Announcement::WorkItemFailed { .. } => "work_item.failed",
            Announcement::WorkItemSuspended { .. } => "work_item.suspended",
            Announcement::WorkItemResumed { .. } => "work_item.resumed",
            Announcement::WorkItemRolledBack { .. } => "work_item.rolled_back",
            Announcement::TimerStarted { .. } => "timer.started",
            Announcement::TimerExpired { .. } => "timer.expired",
            Announcement::TimerCancelled { .. } => "timer.cancelled",
        }
    }
}
