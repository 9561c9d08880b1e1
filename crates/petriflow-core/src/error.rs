use thiserror::Error;

/// Core error type for the Petriflow engine
///
/// Business outcomes (structural faults, conflicts, deadlocks, loop bounds and
/// validation failures) and contract violations share one enum so every
/// operation returns a single discriminated result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Specification is internally inconsistent
    #[error("Structural error: {0}")]
    StructuralError(String),

    /// Another writer appended to the case first
    #[error("Concurrency conflict on case {case_id}: expected sequence {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Case that was raced for
        case_id: String,
        /// Sequence number the writer based its command on
        expected: u64,
        /// Sequence number actually found in the log
        actual: u64,
    },

    /// No task can fire and no external work is pending
    #[error("Deadlock detected in case {case_id}: {tasks:?}")]
    DeadlockDetected {
        /// Case that is now suspended
        case_id: String,
        /// Tasks left waiting on their joins
        tasks: Vec<String>,
    },

    /// A loop-back edge fired more often than allowed
    #[error("Loop bound exceeded in case {case_id} on edge {edge} (bound {bound})")]
    LoopBoundExceeded {
        /// Case that failed
        case_id: String,
        /// Loop-back edge that overflowed
        edge: String,
        /// Configured bound
        bound: u32,
    },

    /// Work item output rejected
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Case not found
    #[error("Case not found: {0}")]
    CaseNotFound(String),

    /// Case already launched
    #[error("Case already exists: {0}")]
    CaseAlreadyExists(String),

    /// Case is in a status that does not accept the command
    #[error("Case not running: {0}")]
    CaseNotRunning(String),

    /// Work item not found
    #[error("Work item not found: {0}")]
    WorkItemNotFound(String),

    /// Specification not found
    #[error("Specification not found: {0}")]
    SpecificationNotFound(String),

    /// Illegal lifecycle transition
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Flow predicate could not be evaluated
    #[error("Predicate error: {0}")]
    PredicateError(String),

    /// Event or snapshot store failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Evaluation aborted by a concurrent case cancellation
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether the caller may retry the command against fresh state
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict { .. })
    }

    /// Whether this error signals a broken caller contract rather than a business outcome
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            CoreError::CaseNotFound(_)
                | CoreError::WorkItemNotFound(_)
                | CoreError::SpecificationNotFound(_)
                | CoreError::CaseAlreadyExists(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                CoreError::StructuralError("dangling flow".to_string()),
                "Structural error: dangling flow",
            ),
            (
                CoreError::ConcurrencyConflict {
                    case_id: "c1".to_string(),
                    expected: 3,
                    actual: 4,
                },
                "Concurrency conflict on case c1: expected sequence 3, found 4",
            ),
            (
                CoreError::LoopBoundExceeded {
                    case_id: "c1".to_string(),
                    edge: "retry->c0".to_string(),
                    bound: 10,
                },
                "Loop bound exceeded in case c1 on edge retry->c0 (bound 10)",
            ),
            (
                CoreError::ValidationError("missing amount".to_string()),
                "Validation error: missing amount",
            ),
            (CoreError::CaseNotFound("c9".to_string()), "Case not found: c9"),
            (CoreError::Other("other_err".to_string()), "other_err"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = CoreError::ConcurrencyConflict {
            case_id: "c1".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());
        assert!(!CoreError::StructuralError("x".to_string()).is_retryable());
        assert!(!CoreError::DeadlockDetected {
            case_id: "c1".to_string(),
            tasks: vec!["join".to_string()],
        }
        .is_retryable());
    }

    #[test]
    fn test_contract_violations() {
        assert!(CoreError::CaseNotFound("c".to_string()).is_contract_violation());
        assert!(CoreError::WorkItemNotFound("w".to_string()).is_contract_violation());
        assert!(!CoreError::ValidationError("v".to_string()).is_contract_violation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_str() {
        let error: CoreError = "test error message".into();
        assert_eq!(error, CoreError::Other("test error message".to_string()));
    }
}
