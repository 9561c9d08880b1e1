//! Assertion utilities for validating case state.

use petriflow_core::{
    CaseState, CaseStatus, ConditionId, Identifier, TaskId, WorkItem, WorkItemStatus,
};
use thiserror::Error;

/// Error type for case state validation failures
#[derive(Debug, Error)]
pub enum CaseStateValidationError {
    /// Case status differs
    #[error("Invalid case status: expected {expected}, got {actual}")]
    InvalidStatus {
        /// Expected status
        expected: String,
        /// Actual status
        actual: String,
    },

    /// Token count on a condition differs
    #[error("Condition {condition}: expected {expected} tokens, got {actual}")]
    TokenCount {
        /// Condition
        condition: String,
        /// Expected count
        expected: u32,
        /// Actual count
        actual: u32,
    },

    /// Work item count for a task and status differs
    #[error("Task {task}: expected {expected} work items {status}, got {actual}")]
    WorkItemCount {
        /// Task
        task: String,
        /// Status filter
        status: String,
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },

    /// No work item of the task has the status
    #[error("No work item of task {task} is {status}")]
    MissingWorkItem {
        /// Task
        task: String,
        /// Status filter
        status: String,
    },

    /// Two states that should be identical are not
    #[error("States differ: {0}")]
    Divergent(String),

    /// Net instance not found
    #[error("Net instance not found: {0}")]
    MissingNet(String),
}

/// Asserts that a case has the expected status.
pub fn assert_case_status(
    state: &CaseState,
    expected: &CaseStatus,
) -> Result<(), CaseStateValidationError> {
    if &state.status != expected {
        return Err(CaseStateValidationError::InvalidStatus {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", state.status),
        });
    }
    Ok(())
}

/// Asserts the token count of a condition in the root net.
pub fn assert_tokens(
    state: &CaseState,
    condition: &str,
    expected: u32,
) -> Result<(), CaseStateValidationError> {
    let root = state
        .root()
        .map_err(|_| CaseStateValidationError::MissingNet(state.case_id.to_string()))?;
    let actual = root.marking.count(&ConditionId::from(condition));
    if actual != expected {
        return Err(CaseStateValidationError::TokenCount {
            condition: condition.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Work items of `task` with `status`, in creation order.
pub fn items_of(state: &CaseState, task: &str, status: WorkItemStatus) -> Vec<WorkItem> {
    let task = TaskId::from(task);
    let mut items: Vec<WorkItem> = state
        .work_items
        .values()
        .filter(|wi| wi.task_id == task && wi.status == status)
        .cloned()
        .collect();
    items.sort_by_key(|wi| wi.serial);
    items
}

/// The first work item of `task` with `status`.
pub fn item_of(
    state: &CaseState,
    task: &str,
    status: WorkItemStatus,
) -> Result<WorkItem, CaseStateValidationError> {
    items_of(state, task, status)
        .into_iter()
        .next()
        .ok_or_else(|| CaseStateValidationError::MissingWorkItem {
            task: task.to_string(),
            status: format!("{:?}", status),
        })
}

/// Asserts how many work items of `task` have `status`.
pub fn assert_work_items(
    state: &CaseState,
    task: &str,
    status: WorkItemStatus,
    expected: usize,
) -> Result<(), CaseStateValidationError> {
    let actual = items_of(state, task, status).len();
    if actual != expected {
        return Err(CaseStateValidationError::WorkItemCount {
            task: task.to_string(),
            status: format!("{:?}", status),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Asserts that a net instance has been removed from the case.
pub fn assert_net_gone(
    state: &CaseState,
    identifier: &Identifier,
) -> Result<(), CaseStateValidationError> {
    if state.nets.contains_key(identifier) {
        return Err(CaseStateValidationError::Divergent(format!(
            "net instance {} still present",
            identifier
        )));
    }
    Ok(())
}

/// Asserts that two states serialize to the same JSON document.
pub fn assert_same_state(
    left: &CaseState,
    right: &CaseState,
) -> Result<(), CaseStateValidationError> {
    let encode = |state: &CaseState| {
        serde_json::to_string(state).map_err(|e| CaseStateValidationError::Divergent(e.to_string()))
    };
    let (a, b) = (encode(left)?, encode(right)?);
    if a != b {
        let at = a
            .bytes()
            .zip(b.bytes())
            .position(|(x, y)| x != y)
            .unwrap_or_else(|| a.len().min(b.len()));
        let start = at.saturating_sub(40);
        return Err(CaseStateValidationError::Divergent(format!(
            "first difference at byte {}: ...{}... vs ...{}...",
            at,
            a.get(start..(at + 40).min(a.len())).unwrap_or_default(),
            b.get(start..(at + 40).min(b.len())).unwrap_or_default(),
        )));
    }
    Ok(())
}
