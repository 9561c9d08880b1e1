//! Work item lifecycle
//!
//! Maps work item commands onto task firings. Checking out a single-instance
//! item fires its task; completing it exits the task. Children of a
//! multi-instance task share one firing and the task exits once enough of
//! them have completed.

use tracing::{debug, info};

use super::net_runner::{Effects, NetRunner};
use crate::domain::case_state::CaseState;
use crate::domain::events::Announcement;
use crate::domain::identifier::WorkItemId;
use crate::domain::predicate::DataValidator;
use crate::domain::specification::{Task, TaskKind, TimerTrigger};
use crate::domain::work_item::{WorkItem, WorkItemStatus};
use crate::{CoreError, DataPacket};

/// Applies work item commands to a case
pub struct WorkItemManager<'a> {
    runner: &'a NetRunner<'a>,
    validator: &'a dyn DataValidator,
}

impl<'a> WorkItemManager<'a> {
    /// Manager driving `runner`
    pub fn new(runner: &'a NetRunner<'a>, validator: &'a dyn DataValidator) -> Self {
        Self { runner, validator }
    }

    /// Check out an enabled item
    pub fn checkout(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        let (item, task) = self.resolve(state, id)?;
        if item.status != WorkItemStatus::Enabled {
            return Err(invalid("start", &item));
        }
        if item.mi_ordinal.is_none() && !self.runner.is_enabled(state, &item.net, &task.id)? {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot start work item {} in state: task {} is no longer enabled",
                id, task.id
            )));
        }

        state.work_item_mut(id)?.start(fx.at)?;
        fx.announcements.push(Announcement::WorkItemStarted {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        info!(case_id = %state.case_id, work_item = %id, "Work item started");

        if item.mi_ordinal.is_none() {
            self.runner.fire_task(state, &item.net, task)?;
        }
        self.runner
            .arm_timer(state, task, id, TimerTrigger::OnStarted, fx)?;
        self.runner.continue_if_possible(state, fx)
    }

    /// Complete an executing item
    ///
    /// With `validate` set the output is checked against the task's
    /// decomposition first; a rejected output leaves the item executing.
    pub fn complete(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        output: DataPacket,
        validate: bool,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        let (item, task) = self.resolve(state, id)?;
        if item.status != WorkItemStatus::Executing {
            return Err(invalid("complete", &item));
        }
        if validate {
            self.validate_output(task, &output)?;
        }

        state.work_item_mut(id)?.complete(output.clone(), fx.at)?;
        self.completed(state, &item, task, output, fx)
    }

    /// Complete an enabled or executing item without validation
    pub fn force_complete(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        output: DataPacket,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_not_terminal()?;
        let (item, task) = self.resolve(state, id)?;
        if !matches!(
            item.status,
            WorkItemStatus::Enabled | WorkItemStatus::Executing
        ) {
            return Err(invalid("force-complete", &item));
        }
        self.fire_if_offered(state, &item, task, fx)?;

        state.work_item_mut(id)?.force_complete(output.clone(), fx.at)?;
        info!(case_id = %state.case_id, work_item = %id, "Work item force-completed");
        self.completed(state, &item, task, output, fx)
    }

    /// Complete an enabled item with empty output
    pub fn skip(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        let (item, task) = self.resolve(state, id)?;
        if item.status != WorkItemStatus::Enabled {
            return Err(invalid("skip", &item));
        }
        self.fire_if_offered(state, &item, task, fx)?;

        state.work_item_mut(id)?.skip(fx.at)?;
        debug!(case_id = %state.case_id, work_item = %id, "Work item skipped");
        self.completed(state, &item, task, DataPacket::empty(), fx)
    }

    /// Cancel a live item
    ///
    /// Tokens consumed by the task are not restored. Cancelling an offered
    /// single-instance item consumes the tokens of its task.
    pub fn cancel(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_not_terminal()?;
        let (item, task) = self.resolve(state, id)?;
        if !item.is_live() {
            return Err(invalid("cancel", &item));
        }

        match item.mi_ordinal {
            None => {
                let busy = state.net(&item.net)?.is_busy(&task.id);
                if !busy && self.runner.is_enabled(state, &item.net, &task.id)? {
                    self.runner.fire_task(state, &item.net, task)?;
                }
                let instance = state.net_mut(&item.net)?;
                instance.active.remove(&task.id);
                instance.consumed.remove(&task.id);
                self.cancel_item(state, id, fx)?;
            }
            Some(_) => {
                self.cancel_item(state, id, fx)?;
                let instance = state.net_mut(&item.net)?;
                if let Some(active) = instance.active.get_mut(&task.id) {
                    *active = active.saturating_sub(1);
                }
                let progress = instance.multi_instance.get_mut(&task.id).ok_or_else(|| {
                    CoreError::StructuralError(format!(
                        "Task {} is not running multiple instances",
                        task.id
                    ))
                })?;
                progress.cancelled += 1;
                let exhausted = progress.outstanding() == 0 && progress.completed == 0;
                let satisfied = progress.is_satisfied();

                if exhausted {
                    instance.active.remove(&task.id);
                    instance.consumed.remove(&task.id);
                    instance.multi_instance.remove(&task.id);
                    debug!(case_id = %state.case_id, task_id = %task.id, "Every child cancelled");
                } else if satisfied {
                    self.runner
                        .finish_multi_instance(state, &item.net, &task.id, fx)?;
                }
            }
        }
        self.runner.continue_if_possible(state, fx)
    }

    /// Park a live item
    pub fn suspend(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        state.work_item_mut(id)?.suspend()?;
        fx.announcements.push(Announcement::WorkItemSuspended {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        Ok(())
    }

    /// Restore a parked item to its previous status
    pub fn unsuspend(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        state.work_item_mut(id)?.unsuspend()?;
        fx.announcements.push(Announcement::WorkItemResumed {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        self.runner.continue_if_possible(state, fx)
    }

    /// Return an executing item to the offer, restoring consumed tokens
    pub fn rollback(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        let (item, task) = self.resolve(state, id)?;
        if item.status != WorkItemStatus::Executing {
            return Err(invalid("roll back", &item));
        }

        if item.mi_ordinal.is_none() {
            let instance = state.net_mut(&item.net)?;
            let tokens = instance.consumed.remove(&task.id).unwrap_or_default();
            for (condition, identifier) in &tokens {
                instance.marking.add(condition, identifier, 1);
            }
            instance.active.remove(&task.id);
            debug!(case_id = %state.case_id, work_item = %id, tokens = tokens.len(), "Tokens restored");
        }
        state.work_item_mut(id)?.rollback()?;
        if task
            .timer
            .as_ref()
            .is_some_and(|t| t.trigger == TimerTrigger::OnStarted)
        {
            self.runner.disarm_timer(state, id, fx);
        }
        fx.announcements.push(Announcement::WorkItemRolledBack {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        self.runner.continue_if_possible(state, fx)
    }

    /// Add a child to a running dynamic multi-instance task
    pub fn add_instance(
        &self,
        state: &mut CaseState,
        sibling: &WorkItemId,
        data: DataPacket,
        fx: &mut Effects,
    ) -> Result<WorkItemId, CoreError> {
        state.ensure_running()?;
        let (item, task) = self.resolve(state, sibling)?;
        if !item.is_live() || item.mi_ordinal.is_none() {
            return Err(invalid("add an instance next to", &item));
        }

        let instance = state.net(&item.net)?;
        let progress = instance.multi_instance.get(&task.id).ok_or_else(|| {
            CoreError::StructuralError(format!("Task {} is not running multiple instances", task.id))
        })?;
        if !progress.dynamic {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot add instance to task {} in state: static creation",
                task.id
            )));
        }
        if progress.launched >= progress.max {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot add instance to task {} in state: {} of {} launched",
                task.id, progress.launched, progress.max
            )));
        }

        let child_data = instance.data.merged(&data);
        let child = self
            .runner
            .add_child(state, &item.net, task, child_data, fx)?;
        info!(case_id = %state.case_id, work_item = %child, "Instance added");
        self.runner.continue_if_possible(state, fx)?;
        Ok(child)
    }

    /// Deliver a timer expiry: the item is force-completed with empty output
    pub fn expire_timer(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.ensure_running()?;
        if state.timers.remove(id).is_none() {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot expire timer of work item {} in state: no pending timer",
                id
            )));
        }
        fx.announcements.push(Announcement::TimerExpired {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        info!(case_id = %state.case_id, work_item = %id, "Timer expired");

        if state.work_item(id)?.status == WorkItemStatus::Suspended {
            state.work_item_mut(id)?.unsuspend()?;
            fx.announcements.push(Announcement::WorkItemResumed {
                case_id: state.case_id.clone(),
                work_item: id.clone(),
            });
        }
        self.force_complete(state, id, DataPacket::empty(), fx)
    }

    /// Check output against the decomposition of an atomic task
    pub fn validate_output(&self, task: &Task, output: &DataPacket) -> Result<(), CoreError> {
        let TaskKind::Atomic { decomposition } = &task.kind else {
            return Ok(());
        };
        let decomposition = self.runner.specification().decomposition(decomposition)?;
        self.validator.validate(&task.id, decomposition, output)
    }

    fn resolve(&self, state: &CaseState, id: &WorkItemId) -> Result<(WorkItem, &'a Task), CoreError> {
        let item = state.work_item(id)?.clone();
        if !item.is_live() {
            return Err(invalid("act on", &item));
        }
        let net = self.runner.net_of(state, &item.net)?;
        let task = net.task(&item.task_id)?;
        Ok((item, task))
    }

    /// Fire the task of an offered single-instance item
    fn fire_if_offered(
        &self,
        state: &mut CaseState,
        item: &WorkItem,
        task: &Task,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        if item.status == WorkItemStatus::Executing {
            return Ok(());
        }
        if item.mi_ordinal.is_some() {
            return state.work_item_mut(&item.id)?.start(fx.at);
        }
        if !self.runner.is_enabled(state, &item.net, &task.id)? {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot complete work item {} in state: task {} is no longer enabled",
                item.id, task.id
            )));
        }
        self.runner.fire_task(state, &item.net, task)
    }

    fn cancel_item(
        &self,
        state: &mut CaseState,
        id: &WorkItemId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        state.work_item_mut(id)?.cancel(fx.at)?;
        info!(case_id = %state.case_id, work_item = %id, "Work item cancelled");
        fx.announcements.push(Announcement::WorkItemCancelled {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
        });
        Ok(())
    }

    /// Feed a completed item back into its task
    fn completed(
        &self,
        state: &mut CaseState,
        item: &WorkItem,
        task: &Task,
        output: DataPacket,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        fx.announcements.push(Announcement::WorkItemCompleted {
            case_id: state.case_id.clone(),
            work_item: item.id.clone(),
        });

        match item.mi_ordinal {
            None => self
                .runner
                .exit_task(state, &item.net, &task.id, output, fx)?,
            Some(ordinal) => {
                let instance = state.net_mut(&item.net)?;
                if let Some(active) = instance.active.get_mut(&task.id) {
                    *active = active.saturating_sub(1);
                }
                let progress = instance.multi_instance.get_mut(&task.id).ok_or_else(|| {
                    CoreError::StructuralError(format!(
                        "Task {} is not running multiple instances",
                        task.id
                    ))
                })?;
                progress.completed += 1;
                progress.outputs.insert(ordinal, output);
                if progress.is_satisfied() {
                    self.runner
                        .finish_multi_instance(state, &item.net, &task.id, fx)?;
                }
            }
        }
        self.runner.continue_if_possible(state, fx)
    }
}

fn invalid(action: &str, item: &WorkItem) -> CoreError {
    CoreError::InvalidTransition(format!(
        "Cannot {} work item {} in state: {:?}",
        action, item.id, item.status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::case_state::CaseStatus;
    use crate::domain::identifier::{CaseId, ConditionId};
    use crate::domain::predicate::{JmesPathEvaluator, SchemaValidator};
    use crate::domain::case_state::FailureReason;
    use crate::domain::identifier::Identifier;
    use crate::domain::specification::{
        CreationMode, Flow, JoinKind, MultiInstance, NetDefinition, OutputParam, ParamType,
        SpecificationDefinition, SpecificationModel, SplitKind, TaskDefinition, TimerParams,
    };
    use crate::engine::loop_cancel::LoopCancelTracker;
    use chrono::Utc;
    use serde_json::json;

    fn single() -> SpecificationModel {
        SpecificationDefinition::new(
            "single",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::atomic("approve", "approval").timer(TimerParams {
                    trigger: TimerTrigger::OnStarted,
                    duration_ms: 60_000,
                }))
                .flow("i", "approve")
                .flow("approve", "o"),
        )
        .manual(
            "approval",
            vec![OutputParam {
                name: "approved".to_string(),
                param_type: ParamType::Boolean,
                required: true,
            }],
        )
        .compile()
        .unwrap()
    }

    fn dynamic_mi() -> SpecificationModel {
        SpecificationDefinition::new(
            "mi",
            "1",
            NetDefinition::new("main", "i", "o")
                .task(TaskDefinition::atomic("sign", "signing").multi_instance(MultiInstance {
                    min: 2,
                    max: 3,
                    threshold: 2,
                    creation: CreationMode::Dynamic,
                    splitter: None,
                }))
                .flow("i", "sign")
                .flow("sign", "o"),
        )
        .manual("signing", vec![])
        .compile()
        .unwrap()
    }

    /// `redo` is re-entered from `again`, so `again -> redo` closes the loop
    fn retry_loop() -> SpecificationModel {
        SpecificationDefinition::new(
            "retry",
            "1",
            NetDefinition::new("main", "i", "o")
                .condition("mid")
                .condition("again")
                .task(TaskDefinition::atomic("redo", "manual").join(JoinKind::Xor))
                .task(TaskDefinition::atomic("check", "manual").split(SplitKind::Xor))
                .flow("i", "redo")
                .flow("again", "redo")
                .flow("redo", "mid")
                .flow("mid", "check")
                .with_flow(Flow::guarded("check", "again", "retry", 0))
                .with_flow(Flow::default_branch("check", "o", 1)),
        )
        .manual("manual", vec![])
        .compile()
        .unwrap()
    }

    struct Harness {
        model: SpecificationModel,
        config: EngineConfig,
    }

    impl Harness {
        fn new(model: SpecificationModel) -> Self {
            Self {
                model,
                config: EngineConfig::default(),
            }
        }

        fn launch(&self) -> CaseState {
            let runner = NetRunner::new(&self.model, &self.config, &JmesPathEvaluator);
            let mut state =
                CaseState::new(CaseId::from("case"), self.model.key().clone(), Utc::now());
            let mut fx = Effects::new(Utc::now());
            runner.launch(&mut state, DataPacket::empty(), &mut fx).unwrap();
            state
        }

        fn with<F, T>(&self, state: &mut CaseState, f: F) -> Result<T, CoreError>
        where
            F: FnOnce(&WorkItemManager<'_>, &mut CaseState, &mut Effects) -> Result<T, CoreError>,
        {
            let runner = NetRunner::new(&self.model, &self.config, &JmesPathEvaluator);
            let manager = WorkItemManager::new(&runner, &SchemaValidator);
            let mut fx = Effects::new(Utc::now());
            f(&manager, state, &mut fx)
        }
    }

    fn enabled_for(state: &CaseState, task: &str) -> WorkItemId {
        state
            .work_items_with_status(WorkItemStatus::Enabled)
            .into_iter()
            .find(|wi| wi.task_id.as_str() == task)
            .map(|wi| wi.id.clone())
            .unwrap()
    }

    fn perform(h: &Harness, state: &mut CaseState, task: &str, output: serde_json::Value) {
        let id = enabled_for(state, task);
        h.with(state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();
        h.with(state, |m, s, fx| m.complete(s, &id, DataPacket::new(output), true, fx))
            .unwrap();
    }

    fn enabled(state: &CaseState) -> Vec<WorkItemId> {
        state
            .work_items_with_status(WorkItemStatus::Enabled)
            .into_iter()
            .map(|wi| wi.id.clone())
            .collect()
    }

    #[test]
    fn test_checkout_consumes_and_arms_timer() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();

        h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();
        assert_eq!(state.total_tokens(), 0);
        assert_eq!(state.work_item(&id).unwrap().status, WorkItemStatus::Executing);
        assert!(state.timers.contains_key(&id));
    }

    #[test]
    fn test_invalid_output_is_rejected() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();
        h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();

        let result = h.with(&mut state.clone(), |m, s, fx| {
            m.complete(s, &id, DataPacket::new(json!({"approved": "maybe"})), true, fx)
        });
        assert!(matches!(result, Err(CoreError::ValidationError(_))));

        h.with(&mut state, |m, s, fx| {
            m.complete(s, &id, DataPacket::new(json!({"approved": true})), true, fx)
        })
        .unwrap();
        assert_eq!(state.status, CaseStatus::Completed);
        assert!(state.timers.is_empty());
    }

    #[test]
    fn test_rollback_restores_tokens() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();
        h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();
        h.with(&mut state, |m, s, fx| m.rollback(s, &id, fx)).unwrap();

        assert_eq!(state.root().unwrap().marking.count(&ConditionId::from("i")), 1);
        assert_eq!(state.work_item(&id).unwrap().status, WorkItemStatus::Enabled);
        assert!(state.timers.is_empty());
        assert_eq!(enabled(&state), vec![id]);
    }

    #[test]
    fn test_rolled_back_checkouts_leave_loop_counter_alone() {
        let model = retry_loop();
        assert!(model.root_net().is_loop_back("again", "redo"));
        let h = Harness {
            model,
            config: EngineConfig {
                max_loop_iterations: 1,
                ..EngineConfig::default()
            },
        };
        let mut state = h.launch();
        let root = Identifier::root(&state.case_id);

        perform(&h, &mut state, "redo", json!({}));
        perform(&h, &mut state, "check", json!({"retry": true}));
        assert_eq!(state.root().unwrap().marking.count(&ConditionId::from("again")), 1);

        for _ in 0..3 {
            let id = enabled_for(&state, "redo");
            h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();
            h.with(&mut state, |m, s, fx| m.rollback(s, &id, fx)).unwrap();
            assert_eq!(LoopCancelTracker::count(&state, &root, "again", "redo"), 0);
            assert_eq!(state.status, CaseStatus::Running);
        }

        perform(&h, &mut state, "redo", json!({}));
        assert_eq!(LoopCancelTracker::count(&state, &root, "again", "redo"), 1);
        assert_eq!(state.status, CaseStatus::Running);

        perform(&h, &mut state, "check", json!({"retry": true}));
        perform(&h, &mut state, "redo", json!({}));
        assert_eq!(LoopCancelTracker::count(&state, &root, "again", "redo"), 2);
        assert!(matches!(
            state.status,
            CaseStatus::Failed(FailureReason::LoopBoundExceeded { bound: 1, .. })
        ));
    }

    #[test]
    fn test_skip_completes_without_output() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();
        h.with(&mut state, |m, s, fx| m.skip(s, &id, fx)).unwrap();

        assert_eq!(state.status, CaseStatus::Completed);
        assert_eq!(state.work_item(&id).unwrap().output, Some(DataPacket::empty()));
    }

    #[test]
    fn test_suspended_item_cannot_start() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();
        h.with(&mut state, |m, s, fx| m.suspend(s, &id, fx)).unwrap();

        let result = h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx));
        assert!(matches!(result, Err(CoreError::InvalidTransition(_))));

        h.with(&mut state, |m, s, fx| m.unsuspend(s, &id, fx)).unwrap();
        assert_eq!(state.work_item(&id).unwrap().status, WorkItemStatus::Enabled);
    }

    #[test]
    fn test_dynamic_instance_respects_max() {
        let h = Harness::new(dynamic_mi());
        let mut state = h.launch();
        let children = enabled(&state);
        assert_eq!(children.len(), 2);

        let added = h
            .with(&mut state, |m, s, fx| {
                m.add_instance(s, &children[0], DataPacket::new(json!({"who": "cy"})), fx)
            })
            .unwrap();
        assert_eq!(state.work_item(&added).unwrap().mi_ordinal, Some(3));

        let result = h.with(&mut state, |m, s, fx| {
            m.add_instance(s, &children[0], DataPacket::empty(), fx)
        });
        assert!(matches!(result, Err(CoreError::InvalidTransition(_))));
    }

    #[test]
    fn test_cancelled_children_lower_requirement() {
        let h = Harness::new(dynamic_mi());
        let mut state = h.launch();
        let children = enabled(&state);

        h.with(&mut state, |m, s, fx| m.cancel(s, &children[0], fx)).unwrap();
        assert_eq!(state.status, CaseStatus::Running);

        h.with(&mut state, |m, s, fx| m.checkout(s, &children[1], fx)).unwrap();
        h.with(&mut state, |m, s, fx| {
            m.complete(s, &children[1], DataPacket::new(json!({"ok": 1})), true, fx)
        })
        .unwrap();
        assert_eq!(state.status, CaseStatus::Completed);
        let data = &state.root().unwrap().data;
        assert_eq!(data.get("sign"), Some(&json!([{"ok": 1}])));
    }

    #[test]
    fn test_expire_timer_force_completes() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let id = enabled(&state)[0].clone();
        h.with(&mut state, |m, s, fx| m.checkout(s, &id, fx)).unwrap();
        h.with(&mut state, |m, s, fx| m.expire_timer(s, &id, fx)).unwrap();

        assert_eq!(state.work_item(&id).unwrap().status, WorkItemStatus::Complete);
        assert_eq!(state.status, CaseStatus::Completed);

        let again = h.with(&mut state, |m, s, fx| m.expire_timer(s, &id, fx));
        assert!(again.is_err());
    }

    #[test]
    fn test_cancel_unknown_item() {
        let h = Harness::new(single());
        let mut state = h.launch();
        let result = h.with(&mut state, |m, s, fx| {
            m.cancel(s, &WorkItemId::from("case:nope#9"), fx)
        });
        assert!(matches!(result, Err(CoreError::WorkItemNotFound(_))));
    }
}
