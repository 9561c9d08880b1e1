//! Applies one logged command to a case state
//!
//! Live commands and replay go through the same code path, so replaying a
//! case's log always reproduces the state its commands originally produced.

use std::sync::atomic::AtomicBool;
use tracing::trace;

use crate::config::EngineConfig;
use crate::domain::case_state::CaseState;
use crate::domain::events::{Announcement, CaseCommand, CaseEvent};
use crate::domain::predicate::{DataValidator, PredicateEvaluator};
use crate::domain::specification::SpecificationModel;
use crate::engine::net_runner::{Effects, NetRunner};
use crate::engine::work_item_manager::WorkItemManager;
use crate::CoreError;

/// Whether a command is new or read back from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// New command: output is validated and cancellation can abort it
    Live,
    /// Logged command: already accepted once
    Replay,
}

/// Result of applying one event
#[derive(Debug, Clone)]
pub struct Applied {
    /// State after the event
    pub state: CaseState,
    /// Announcements the event produced
    pub announcements: Vec<Announcement>,
}

/// Applies events for cases of one specification
pub struct CaseProcessor<'a> {
    spec: &'a SpecificationModel,
    config: &'a EngineConfig,
    predicates: &'a dyn PredicateEvaluator,
    validator: &'a dyn DataValidator,
    abort: Option<&'a AtomicBool>,
}

impl<'a> CaseProcessor<'a> {
    /// Processor for `spec`
    pub fn new(
        spec: &'a SpecificationModel,
        config: &'a EngineConfig,
        predicates: &'a dyn PredicateEvaluator,
        validator: &'a dyn DataValidator,
    ) -> Self {
        Self {
            spec,
            config,
            predicates,
            validator,
            abort: None,
        }
    }

    /// Abort live commands once `flag` is raised
    pub fn with_abort(mut self, flag: &'a AtomicBool) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Apply `event` to a copy of `state`
    ///
    /// `state` is `None` only for the launch event. The input state is never
    /// modified, so a failed command leaves nothing behind.
    pub fn apply(
        &self,
        state: Option<&CaseState>,
        event: &CaseEvent,
        mode: ApplyMode,
    ) -> Result<Applied, CoreError> {
        let mut working = match (state, &event.command) {
            (None, CaseCommand::Launch { specification, .. }) => {
                if specification != self.spec.key() {
                    return Err(CoreError::StructuralError(format!(
                        "Case {} launched with {} but processed with {}",
                        event.case_id,
                        specification,
                        self.spec.key()
                    )));
                }
                CaseState::new(event.case_id.clone(), specification.clone(), event.timestamp)
            }
            (Some(_), CaseCommand::Launch { .. }) => {
                return Err(CoreError::CaseAlreadyExists(event.case_id.to_string()))
            }
            (None, _) => return Err(CoreError::CaseNotFound(event.case_id.to_string())),
            (Some(current), _) => current.clone(),
        };

        if event.sequence != working.sequence + 1 {
            return Err(CoreError::StoreError(format!(
                "Event {} of case {} does not follow sequence {}",
                event.sequence, event.case_id, working.sequence
            )));
        }

        let mut runner = NetRunner::new(self.spec, self.config, self.predicates);
        if let (ApplyMode::Live, Some(flag)) = (mode, self.abort) {
            runner = runner.with_abort(flag);
        }
        let manager = WorkItemManager::new(&runner, self.validator);
        let mut fx = Effects::new(event.timestamp);
        let state = &mut working;

        match &event.command {
            CaseCommand::Launch { data, .. } => runner.launch(state, data.clone(), &mut fx)?,
            CaseCommand::StartWorkItem { work_item } => manager.checkout(state, work_item, &mut fx)?,
            CaseCommand::CompleteWorkItem { work_item, output } => manager.complete(
                state,
                work_item,
                output.clone(),
                mode == ApplyMode::Live,
                &mut fx,
            )?,
            CaseCommand::ForceCompleteWorkItem { work_item, output } => {
                manager.force_complete(state, work_item, output.clone(), &mut fx)?
            }
            CaseCommand::CancelWorkItem { work_item } => manager.cancel(state, work_item, &mut fx)?,
            CaseCommand::SuspendWorkItem { work_item } => {
                manager.suspend(state, work_item, &mut fx)?
            }
            CaseCommand::UnsuspendWorkItem { work_item } => {
                manager.unsuspend(state, work_item, &mut fx)?
            }
            CaseCommand::RollbackWorkItem { work_item } => {
                manager.rollback(state, work_item, &mut fx)?
            }
            CaseCommand::SkipWorkItem { work_item } => manager.skip(state, work_item, &mut fx)?,
            CaseCommand::AddInstance { sibling, data } => {
                manager.add_instance(state, sibling, data.clone(), &mut fx)?;
            }
            CaseCommand::ExpireTimer { work_item } => {
                manager.expire_timer(state, work_item, &mut fx)?
            }
            CaseCommand::SuspendCase => runner.suspend_case(state, &mut fx)?,
            CaseCommand::ResumeCase => runner.resume_case(state, &mut fx)?,
            CaseCommand::CancelCase => runner.cancel_case(state, &mut fx)?,
        }

        working.sequence = event.sequence;
        working.updated_at = event.timestamp;
        trace!(
            case_id = %event.case_id,
            sequence = event.sequence,
            command = event.command.name(),
            announcements = fx.announcements.len(),
            "Event applied"
        );
        Ok(Applied {
            state: working,
            announcements: fx.announcements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identifier::{CaseId, SpecificationKey};
    use crate::domain::predicate::{JmesPathEvaluator, SchemaValidator};
    use crate::domain::specification::{NetDefinition, SpecificationDefinition, TaskDefinition};
    use crate::DataPacket;
    use chrono::Utc;

    fn model() -> SpecificationModel {
        SpecificationDefinition::new(
            "p",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::atomic("a", "manual_a"))
                .flow("i", "a")
                .flow("a", "o"),
        )
        .manual("manual_a", vec![])
        .compile()
        .unwrap()
    }

    fn event(sequence: u64, command: CaseCommand) -> CaseEvent {
        CaseEvent {
            case_id: CaseId::from("c1"),
            sequence,
            timestamp: Utc::now(),
            command,
        }
    }

    fn launch() -> CaseEvent {
        event(
            1,
            CaseCommand::Launch {
                specification: SpecificationKey::new("p", "1"),
                data: DataPacket::empty(),
            },
        )
    }

    #[test]
    fn test_launch_creates_state() {
        let model = model();
        let config = EngineConfig::default();
        let processor = CaseProcessor::new(&model, &config, &JmesPathEvaluator, &SchemaValidator);

        let applied = processor.apply(None, &launch(), ApplyMode::Live).unwrap();
        assert_eq!(applied.state.sequence, 1);
        assert_eq!(applied.state.live_work_items().len(), 1);
        assert_eq!(applied.announcements[0].event_type(), "case.started");
    }

    #[test]
    fn test_sequence_gap_is_rejected() {
        let model = model();
        let config = EngineConfig::default();
        let processor = CaseProcessor::new(&model, &config, &JmesPathEvaluator, &SchemaValidator);
        let applied = processor.apply(None, &launch(), ApplyMode::Live).unwrap();

        let result = processor.apply(Some(&applied.state), &event(3, CaseCommand::SuspendCase), ApplyMode::Live);
        assert!(matches!(result, Err(CoreError::StoreError(_))));
    }

    #[test]
    fn test_failed_command_leaves_input_untouched() {
        let model = model();
        let config = EngineConfig::default();
        let processor = CaseProcessor::new(&model, &config, &JmesPathEvaluator, &SchemaValidator);
        let applied = processor.apply(None, &launch(), ApplyMode::Live).unwrap();
        let before = applied.state.clone();

        let bogus = event(
            2,
            CaseCommand::CompleteWorkItem {
                work_item: before.live_work_items()[0].id.clone(),
                output: DataPacket::empty(),
            },
        );
        assert!(processor.apply(Some(&applied.state), &bogus, ApplyMode::Live).is_err());
        assert_eq!(applied.state, before);
    }

    #[test]
    fn test_wrong_specification_rejected() {
        let model = model();
        let config = EngineConfig::default();
        let processor = CaseProcessor::new(&model, &config, &JmesPathEvaluator, &SchemaValidator);
        let launch = event(
            1,
            CaseCommand::Launch {
                specification: SpecificationKey::new("other", "1"),
                data: DataPacket::empty(),
            },
        );
        assert!(matches!(
            processor.apply(None, &launch, ApplyMode::Live),
            Err(CoreError::StructuralError(_))
        ));
    }
}
