use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::{CaseId, Identifier, TaskId, WorkItemId};
use crate::{CoreError, DataPacket};

/// Work item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    /// Offered, not yet checked out
    Enabled,
    /// Checked out by a participant
    Executing,
    /// Finished with output
    Complete,
    /// Withdrawn or cancelled
    Cancelled,
    /// Terminated because the case failed
    Failed,
    /// Temporarily parked by an operator
    Suspended,
}

impl WorkItemStatus {
    /// Whether the item still represents outstanding work
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkItemStatus::Enabled | WorkItemStatus::Executing | WorkItemStatus::Suspended
        )
    }
}

/// Externally visible unit of work for one task firing opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: WorkItemId,

    /// Owning case
    pub case_id: CaseId,

    /// Task the item belongs to
    pub task_id: TaskId,

    /// Net instance the task lives in
    pub net: Identifier,

    /// Thread of control this item runs under
    pub identifier: Identifier,

    /// Creation order within the case
    pub serial: u64,

    /// Current status
    pub status: WorkItemStatus,

    /// Status to restore when unsuspended
    pub suspended_from: Option<WorkItemStatus>,

    /// Net data when the item was offered
    pub data: DataPacket,

    /// Output supplied on completion
    pub output: Option<DataPacket>,

    /// Position among multi-instance siblings
    pub mi_ordinal: Option<u32>,

    /// When the item was offered
    pub enabled_at: DateTime<Utc>,

    /// When the item was checked out
    pub started_at: Option<DateTime<Utc>>,

    /// When the item reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Create an enabled work item
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkItemId,
        case_id: CaseId,
        task_id: TaskId,
        net: Identifier,
        identifier: Identifier,
        serial: u64,
        data: DataPacket,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            case_id,
            task_id,
            net,
            identifier,
            serial,
            status: WorkItemStatus::Enabled,
            suspended_from: None,
            data,
            output: None,
            mi_ordinal: None,
            enabled_at: at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the item is still outstanding
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Enabled -> Executing
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != WorkItemStatus::Enabled {
            return Err(self.invalid("start"));
        }
        self.status = WorkItemStatus::Executing;
        self.started_at = Some(at);
        Ok(())
    }

    /// Executing -> Complete
    pub fn complete(&mut self, output: DataPacket, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != WorkItemStatus::Executing {
            return Err(self.invalid("complete"));
        }
        self.finish(WorkItemStatus::Complete, Some(output), at);
        Ok(())
    }

    /// Enabled or Executing -> Complete, bypassing checkout
    pub fn force_complete(
        &mut self,
        output: DataPacket,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if !matches!(
            self.status,
            WorkItemStatus::Enabled | WorkItemStatus::Executing
        ) {
            return Err(self.invalid("force-complete"));
        }
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
        self.finish(WorkItemStatus::Complete, Some(output), at);
        Ok(())
    }

    /// Enabled -> Complete with empty output
    pub fn skip(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != WorkItemStatus::Enabled {
            return Err(self.invalid("skip"));
        }
        self.finish(WorkItemStatus::Complete, Some(DataPacket::empty()), at);
        Ok(())
    }

    /// Any live status -> Cancelled
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.is_live() {
            return Err(self.invalid("cancel"));
        }
        self.finish(WorkItemStatus::Cancelled, None, at);
        Ok(())
    }

    /// Any live status -> Failed
    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.is_live() {
            return Err(self.invalid("fail"));
        }
        self.finish(WorkItemStatus::Failed, None, at);
        Ok(())
    }

    /// Enabled or Executing -> Suspended
    pub fn suspend(&mut self) -> Result<(), CoreError> {
        if !matches!(
            self.status,
            WorkItemStatus::Enabled | WorkItemStatus::Executing
        ) {
            return Err(self.invalid("suspend"));
        }
        self.suspended_from = Some(self.status);
        self.status = WorkItemStatus::Suspended;
        Ok(())
    }

    /// Suspended -> previous status
    pub fn unsuspend(&mut self) -> Result<(), CoreError> {
        match (self.status, self.suspended_from.take()) {
            (WorkItemStatus::Suspended, Some(previous)) => {
                self.status = previous;
                Ok(())
            }
            _ => Err(self.invalid("unsuspend")),
        }
    }

    /// Executing -> Enabled
    pub fn rollback(&mut self) -> Result<(), CoreError> {
        if self.status != WorkItemStatus::Executing {
            return Err(self.invalid("roll back"));
        }
        self.status = WorkItemStatus::Enabled;
        self.started_at = None;
        Ok(())
    }

    fn finish(&mut self, status: WorkItemStatus, output: Option<DataPacket>, at: DateTime<Utc>) {
        self.status = status;
        self.suspended_from = None;
        self.output = output;
        self.completed_at = Some(at);
    }

    fn invalid(&self, action: &str) -> CoreError {
        CoreError::InvalidTransition(format!(
            "Cannot {} work item {} in state: {:?}",
            action, self.id, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> WorkItem {
        let case_id = CaseId::from("case");
        let task_id = TaskId::from("approve");
        WorkItem::new(
            WorkItemId::for_task(&case_id, &task_id, 1),
            case_id.clone(),
            task_id,
            Identifier::root(&case_id),
            Identifier::root(&case_id),
            1,
            DataPacket::empty(),
            Utc::now(),
        )
    }

    #[test]
    fn test_forward_lifecycle() {
        let mut wi = item();
        wi.start(Utc::now()).unwrap();
        assert_eq!(wi.status, WorkItemStatus::Executing);
        assert!(wi.started_at.is_some());

        wi.complete(DataPacket::new(json!({"ok": true})), Utc::now())
            .unwrap();
        assert_eq!(wi.status, WorkItemStatus::Complete);
        assert!(!wi.is_live());
        assert!(wi.completed_at.is_some());
    }

    #[test]
    fn test_complete_requires_checkout() {
        let mut wi = item();
        let err = wi.complete(DataPacket::empty(), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
        assert_eq!(wi.status, WorkItemStatus::Enabled);
    }

    #[test]
    fn test_double_checkout_rejected() {
        let mut wi = item();
        wi.start(Utc::now()).unwrap();
        assert!(wi.start(Utc::now()).is_err());
    }

    #[test]
    fn test_suspend_restores_previous_status() {
        let mut wi = item();
        wi.start(Utc::now()).unwrap();
        wi.suspend().unwrap();
        assert_eq!(wi.status, WorkItemStatus::Suspended);
        assert!(wi.is_live());

        wi.unsuspend().unwrap();
        assert_eq!(wi.status, WorkItemStatus::Executing);
        assert!(wi.unsuspend().is_err());
    }

    #[test]
    fn test_rollback_returns_to_enabled() {
        let mut wi = item();
        wi.start(Utc::now()).unwrap();
        wi.rollback().unwrap();
        assert_eq!(wi.status, WorkItemStatus::Enabled);
        assert!(wi.started_at.is_none());
    }

    #[test]
    fn test_cancel_terminal_item_rejected() {
        let mut wi = item();
        wi.skip(Utc::now()).unwrap();
        assert_eq!(wi.output, Some(DataPacket::empty()));
        assert!(wi.cancel(Utc::now()).is_err());
    }

    #[test]
    fn test_force_complete_from_enabled() {
        let mut wi = item();
        wi.force_complete(DataPacket::empty(), Utc::now()).unwrap();
        assert_eq!(wi.status, WorkItemStatus::Complete);
        assert!(wi.started_at.is_some());
    }
}
