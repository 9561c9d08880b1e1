//! Net runner
//!
//! Drives token flow for one case. Automatic tasks, composite tasks and
//! multi-instance tasks fire as soon as their joins hold; single-instance
//! atomic tasks are offered as work items and only fire on checkout.
//! After every change the runner cascades until no further automatic firing
//! is possible, then offers and withdraws work items to match the marking
//! and checks whether the case has stalled.
//!
//! The runner mutates whatever [`CaseState`] it is handed. Callers apply
//! commands to a working copy and keep it only when the whole command
//! succeeds.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

use super::join_resolver::JoinResolver;
use super::loop_cancel::LoopCancelTracker;
use crate::config::EngineConfig;
use crate::domain::case_state::{
    CaseState, CaseStatus, FailureReason, MultiInstanceProgress, NetInstance, ParentLink,
    SuspendReason, TimerRecord,
};
use crate::domain::events::Announcement;
use crate::domain::identifier::{ConditionId, Identifier, TaskId, WorkItemId};
use crate::domain::marking::Marking;
use crate::domain::predicate::PredicateEvaluator;
use crate::domain::specification::{
    CreationMode, Net, OutFlow, SpecificationModel, SplitKind, Task, TaskKind, TimerTrigger,
};
use crate::domain::work_item::WorkItem;
use crate::{CoreError, DataPacket};

/// Announcements collected while one command is applied
#[derive(Debug, Clone)]
pub struct Effects {
    /// Logical time of the command
    pub at: DateTime<Utc>,
    /// Announcements in production order
    pub announcements: Vec<Announcement>,
}

impl Effects {
    /// Empty effects at `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            announcements: Vec::new(),
        }
    }

    fn push(&mut self, announcement: Announcement) {
        self.announcements.push(announcement);
    }
}

/// Token flow for the nets of one specification
pub struct NetRunner<'a> {
    spec: &'a SpecificationModel,
    config: &'a EngineConfig,
    predicates: &'a dyn PredicateEvaluator,
    abort: Option<&'a AtomicBool>,
    loops: LoopCancelTracker,
}

impl<'a> NetRunner<'a> {
    /// Runner for `spec`
    pub fn new(
        spec: &'a SpecificationModel,
        config: &'a EngineConfig,
        predicates: &'a dyn PredicateEvaluator,
    ) -> Self {
        Self {
            spec,
            config,
            predicates,
            abort: None,
            loops: LoopCancelTracker::new(config.max_loop_iterations),
        }
    }

    /// Abort evaluation once `flag` is raised
    pub fn with_abort(mut self, flag: &'a AtomicBool) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Specification being run
    pub fn specification(&self) -> &'a SpecificationModel {
        self.spec
    }

    /// Put the initial token on the root net and cascade
    pub fn launch(
        &self,
        state: &mut CaseState,
        data: DataPacket,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        if !state.nets.is_empty() {
            return Err(CoreError::CaseAlreadyExists(state.case_id.to_string()));
        }
        let net = self.spec.root_net();
        let data = if data.is_null() {
            DataPacket::empty()
        } else {
            data
        };
        let root = NetInstance::start(
            Identifier::root(&state.case_id),
            net.id.clone(),
            &net.input_condition,
            None,
            data,
        );
        state.nets.insert(root.identifier.clone(), root);

        info!(case_id = %state.case_id, specification = %state.specification, "Case launched");
        fx.push(Announcement::CaseStarted {
            case_id: state.case_id.clone(),
            specification: state.specification.clone(),
        });
        self.continue_if_possible(state, fx)
    }

    /// Cascade until quiescent, then align work items with the marking
    pub fn continue_if_possible(
        &self,
        state: &mut CaseState,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        if state.status != CaseStatus::Running {
            self.sync_timers(state, fx);
            return Ok(());
        }

        let mut rounds = 0u64;
        loop {
            self.check_abort()?;
            rounds += 1;
            let mut progressed = false;

            let identifiers: Vec<Identifier> = state.nets.keys().cloned().collect();
            for identifier in identifiers {
                if !state.nets.contains_key(&identifier) {
                    continue;
                }
                if self.complete_net_if_done(state, &identifier, fx)?
                    || self.fire_next_automatic(state, &identifier, fx)?
                {
                    progressed = true;
                }
                if state.status != CaseStatus::Running {
                    self.sync_timers(state, fx);
                    return Ok(());
                }
            }
            if !progressed {
                break;
            }
        }
        trace!(case_id = %state.case_id, rounds, "Cascade settled");

        self.refresh_offers(state, fx)?;
        self.detect_deadlock(state, fx)?;
        self.sync_timers(state, fx);
        Ok(())
    }

    /// Whether the join of `task` holds in net instance `net`
    pub fn is_enabled(
        &self,
        state: &CaseState,
        net: &Identifier,
        task: &TaskId,
    ) -> Result<bool, CoreError> {
        let definition = self.net_of(state, net)?;
        let enablement = self.resolver(definition).evaluate(state.net(net)?)?;
        Ok(enablement.is_enabled(task))
    }

    /// Compiled net run by a net instance
    pub fn net_of(&self, state: &CaseState, net: &Identifier) -> Result<&'a Net, CoreError> {
        self.spec.net(&state.net(net)?.net_id)
    }

    /// Consume the enabling tokens of `task` and mark it busy
    pub fn fire_task(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &Task,
    ) -> Result<(), CoreError> {
        let definition = self.net_of(state, net)?;
        let tokens = self
            .resolver(definition)
            .consumption(task, &state.net(net)?.marking)?;

        let case_id = state.case_id.clone();
        let instance = state.net_mut(net)?;
        for (condition, identifier) in &tokens {
            instance.marking.remove_one(condition, identifier)?;
        }
        *instance.active.entry(task.id.clone()).or_insert(0) += 1;
        debug!(case_id = %case_id, net = %net, task_id = %task.id, tokens = tokens.len(), "Task fired");
        instance.consumed.insert(task.id.clone(), tokens);
        Ok(())
    }

    /// Complete a busy task: merge its output, clear its cancellation region
    /// and produce tokens according to its split
    ///
    /// Loop-back edges into the task are counted here and not at firing, so
    /// a checkout that is rolled back leaves the loop counters untouched.
    pub fn exit_task(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task_id: &TaskId,
        output: DataPacket,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let definition = self.net_of(state, net)?;
        let task = definition.task(task_id)?;

        let instance = state.net_mut(net)?;
        output.merge_into(&mut instance.data);
        instance.active.remove(task_id);
        let consumed = instance.consumed.remove(task_id).unwrap_or_default();
        instance.multi_instance.remove(task_id);

        for (condition, _) in &consumed {
            if definition.is_loop_back(condition.as_str(), task_id.as_str()) {
                self.count_edge(state, net, condition.as_str(), task_id.as_str(), fx)?;
                if state.status != CaseStatus::Running {
                    return Ok(());
                }
            }
        }

        self.loops.clear_region(
            state,
            net,
            task_id,
            &task.cancellation,
            fx.at,
            &mut fx.announcements,
        )?;

        let data = state.net(net)?.data.clone();
        let targets = self.split_targets(task, &data)?;
        debug!(case_id = %state.case_id, net = %net, task_id = %task_id, targets = ?targets, "Task exited");

        for target in targets {
            state.net_mut(net)?.marking.add(&target, net, 1);
            if definition.is_loop_back(task_id.as_str(), target.as_str()) {
                self.count_edge(state, net, task_id.as_str(), target.as_str(), fx)?;
                if state.status != CaseStatus::Running {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Conditions that receive a token when `task` exits
    pub fn split_targets(
        &self,
        task: &Task,
        data: &DataPacket,
    ) -> Result<Vec<ConditionId>, CoreError> {
        let holds = |flow: &OutFlow| -> Result<bool, CoreError> {
            match &flow.predicate {
                Some(expression) => self.predicates.evaluate(expression, data),
                None => Ok(true),
            }
        };

        match task.split {
            SplitKind::And => Ok(task.postset.iter().map(|f| f.target.clone()).collect()),
            SplitKind::Xor => {
                for flow in task.postset.iter().filter(|f| !f.is_default) {
                    if holds(flow)? {
                        return Ok(vec![flow.target.clone()]);
                    }
                }
                fallback(task).map(|target| vec![target])
            }
            SplitKind::Or => {
                let mut chosen = Vec::new();
                for flow in task.postset.iter().filter(|f| !f.is_default) {
                    if holds(flow)? {
                        chosen.push(flow.target.clone());
                    }
                }
                if chosen.is_empty() {
                    chosen.push(fallback(task)?);
                }
                Ok(chosen)
            }
        }
    }

    /// Create the next child work item of a running multi-instance task
    pub fn add_child(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &Task,
        data: DataPacket,
        fx: &mut Effects,
    ) -> Result<WorkItemId, CoreError> {
        let instance = state.net_mut(net)?;
        let thread = instance.next_child_identifier();
        let progress = instance.multi_instance.get_mut(&task.id).ok_or_else(|| {
            CoreError::StructuralError(format!("Task {} is not running multiple instances", task.id))
        })?;
        progress.launched += 1;
        let ordinal = progress.launched;
        *instance.active.entry(task.id.clone()).or_insert(0) += 1;

        let (id, serial) = state.allocate_work_item_id(&task.id);
        let mut item = WorkItem::new(
            id.clone(),
            state.case_id.clone(),
            task.id.clone(),
            net.clone(),
            thread,
            serial,
            data,
            fx.at,
        );
        item.mi_ordinal = Some(ordinal);
        state.work_items.insert(id.clone(), item);

        fx.push(Announcement::WorkItemEnabled {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
            task: task.id.clone(),
        });
        self.arm_timer(state, task, &id, TimerTrigger::OnEnabled, fx)?;
        Ok(id)
    }

    /// Cancel outstanding children and exit a multi-instance task with the
    /// aggregated outputs of the completed ones
    pub fn finish_multi_instance(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &TaskId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        for id in state.live_items_for(net, task) {
            state.work_item_mut(&id)?.cancel(fx.at)?;
            fx.push(Announcement::WorkItemCancelled {
                case_id: state.case_id.clone(),
                work_item: id,
            });
        }

        let outputs: Vec<Value> = state
            .net(net)?
            .multi_instance
            .get(task)
            .map(|p| p.outputs.values().map(|d| d.as_value().clone()).collect())
            .unwrap_or_default();
        debug!(case_id = %state.case_id, task_id = %task, completed = outputs.len(), "Multi-instance task satisfied");

        let aggregate = DataPacket::singleton(task.as_str(), Value::Array(outputs));
        self.exit_task(state, net, task, aggregate, fx)
    }

    /// Arm the timer of `task` for a work item when `trigger` matches
    pub fn arm_timer(
        &self,
        state: &mut CaseState,
        task: &Task,
        work_item: &WorkItemId,
        trigger: TimerTrigger,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let Some(timer) = &task.timer else {
            return Ok(());
        };
        if timer.trigger != trigger {
            return Ok(());
        }

        let millis = i64::try_from(timer.duration_ms).map_err(|_| {
            CoreError::ConfigurationError(format!("Timer of task {} is too long", task.id))
        })?;
        let deadline = fx
            .at
            .checked_add_signed(Duration::milliseconds(millis))
            .ok_or_else(|| {
                CoreError::ConfigurationError(format!("Timer of task {} is too long", task.id))
            })?;
        state.timers.insert(
            work_item.clone(),
            TimerRecord {
                work_item: work_item.clone(),
                task: task.id.clone(),
                deadline,
            },
        );
        fx.push(Announcement::TimerStarted {
            case_id: state.case_id.clone(),
            work_item: work_item.clone(),
            deadline,
        });
        Ok(())
    }

    /// Drop a pending timer, announcing the cancellation
    pub fn disarm_timer(&self, state: &mut CaseState, work_item: &WorkItemId, fx: &mut Effects) {
        if state.timers.remove(work_item).is_some() {
            fx.push(Announcement::TimerCancelled {
                case_id: state.case_id.clone(),
                work_item: work_item.clone(),
            });
        }
    }

    /// Cancel the case: empty every condition and cancel all live work
    pub fn cancel_case(&self, state: &mut CaseState, fx: &mut Effects) -> Result<(), CoreError> {
        state.ensure_not_terminal()?;

        for id in live_ids(state) {
            state.work_item_mut(&id)?.cancel(fx.at)?;
            fx.push(Announcement::WorkItemCancelled {
                case_id: state.case_id.clone(),
                work_item: id,
            });
        }
        let root = Identifier::root(&state.case_id);
        state.nets.retain(|id, _| *id == root);
        for instance in state.nets.values_mut() {
            instance.marking = Marking::new();
            instance.active.clear();
            instance.consumed.clear();
            instance.multi_instance.clear();
        }

        state.status = CaseStatus::Cancelled;
        info!(case_id = %state.case_id, "Case cancelled");
        fx.push(Announcement::CaseCancelled {
            case_id: state.case_id.clone(),
        });
        self.sync_timers(state, fx);
        Ok(())
    }

    /// Park a running case
    pub fn suspend_case(&self, state: &mut CaseState, fx: &mut Effects) -> Result<(), CoreError> {
        if state.status != CaseStatus::Running {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot suspend case {} in state: {:?}",
                state.case_id, state.status
            )));
        }
        state.status = CaseStatus::Suspended(SuspendReason::Operator);
        info!(case_id = %state.case_id, "Case suspended");
        fx.push(Announcement::CaseSuspended {
            case_id: state.case_id.clone(),
        });
        Ok(())
    }

    /// Resume a suspended case and cascade
    pub fn resume_case(&self, state: &mut CaseState, fx: &mut Effects) -> Result<(), CoreError> {
        if !matches!(state.status, CaseStatus::Suspended(_)) {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot resume case {} in state: {:?}",
                state.case_id, state.status
            )));
        }
        state.status = CaseStatus::Running;
        info!(case_id = %state.case_id, "Case resumed");
        fx.push(Announcement::CaseResumed {
            case_id: state.case_id.clone(),
        });
        self.continue_if_possible(state, fx)
    }

    fn resolver(&self, net: &'a Net) -> JoinResolver<'a> {
        JoinResolver::new(net, self.config.max_or_join_rounds, self.abort)
    }

    fn check_abort(&self) -> Result<(), CoreError> {
        match self.abort {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(CoreError::Aborted(
                "Cascade interrupted by case cancellation".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Count a loop-back traversal, failing the case past the bound
    fn count_edge(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        source: &str,
        target: &str,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        match self.loops.record_traversal(state, net, source, target) {
            Some(reason) => self.fail_case(state, reason, fx),
            None => Ok(()),
        }
    }

    fn fail_case(
        &self,
        state: &mut CaseState,
        reason: FailureReason,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        for id in live_ids(state) {
            state.work_item_mut(&id)?.fail(fx.at)?;
            fx.push(Announcement::WorkItemFailed {
                case_id: state.case_id.clone(),
                work_item: id,
            });
        }
        warn!(case_id = %state.case_id, reason = ?reason, "Case failed");
        state.status = CaseStatus::Failed(reason.clone());
        fx.push(Announcement::CaseFailed {
            case_id: state.case_id.clone(),
            reason,
        });
        self.sync_timers(state, fx);
        Ok(())
    }

    /// Fire one automatic, composite or multi-instance task if any is enabled
    fn fire_next_automatic(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        fx: &mut Effects,
    ) -> Result<bool, CoreError> {
        let definition = self.net_of(state, net)?;
        let enablement = self.resolver(definition).evaluate(state.net(net)?)?;

        for task_id in &enablement.enabled {
            let task = definition.task(task_id)?;
            let eager = match task.kind {
                TaskKind::Automatic | TaskKind::Composite { .. } => true,
                TaskKind::Atomic { .. } => task.is_multi_instance(),
            };
            if !eager {
                continue;
            }

            self.fire_task(state, net, task)?;
            match task.kind {
                TaskKind::Automatic => {
                    self.exit_task(state, net, task_id, DataPacket::empty(), fx)?
                }
                TaskKind::Composite { .. } => self.start_subnet(state, net, task, fx)?,
                TaskKind::Atomic { .. } => self.launch_children(state, net, task, fx)?,
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn start_subnet(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &Task,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let subnet = self.spec.subnet_of(task)?;
        let parent = state.net_mut(net)?;
        let identifier = parent.next_child_identifier();
        let child = NetInstance::start(
            identifier.clone(),
            subnet.id.clone(),
            &subnet.input_condition,
            Some(ParentLink {
                net: net.clone(),
                task: task.id.clone(),
            }),
            parent.data.clone(),
        );
        state.nets.insert(identifier.clone(), child);

        info!(case_id = %state.case_id, net = %identifier, task_id = %task.id, "Sub-net started");
        fx.push(Announcement::SubnetStarted {
            case_id: state.case_id.clone(),
            net: identifier,
            task: task.id.clone(),
        });
        Ok(())
    }

    fn launch_children(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &Task,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let mi = task.multi_instance.as_ref().ok_or_else(|| {
            CoreError::StructuralError(format!("Task {} is not multi-instance", task.id))
        })?;

        let instance = state.net_mut(net)?;
        let base = instance.data.clone();
        let elements: Vec<Value> = mi
            .splitter
            .as_ref()
            .and_then(|key| base.get(key))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let requested = if mi.splitter.is_some() {
            u32::try_from(elements.len()).unwrap_or(u32::MAX)
        } else {
            mi.min
        };
        let count = requested.clamp(mi.min, mi.max);

        instance.active.insert(task.id.clone(), 0);
        instance.multi_instance.insert(
            task.id.clone(),
            MultiInstanceProgress {
                launched: 0,
                completed: 0,
                cancelled: 0,
                threshold: mi.threshold,
                max: mi.max,
                dynamic: mi.creation == CreationMode::Dynamic,
                outputs: Default::default(),
            },
        );
        info!(case_id = %state.case_id, task_id = %task.id, instances = count, "Multi-instance task started");

        if count == 0 {
            return self.finish_multi_instance(state, net, &task.id, fx);
        }
        for ordinal in 0..count as usize {
            let data = match elements.get(ordinal) {
                Some(element) => base.merged(&DataPacket::singleton("item", element.clone())),
                None => base.clone(),
            };
            self.add_child(state, net, task, data, fx)?;
        }
        Ok(())
    }

    fn complete_net_if_done(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        fx: &mut Effects,
    ) -> Result<bool, CoreError> {
        let definition = self.net_of(state, net)?;
        let instance = state.net(net)?;
        if !instance.marking.is_marked(&definition.output_condition) {
            return Ok(false);
        }

        let leftover = instance.marking.total() - instance.marking.count(&definition.output_condition);
        if leftover > 0 {
            warn!(case_id = %state.case_id, net = %net, tokens = leftover, "Net completed with tokens left behind");
        }

        match instance.parent.clone() {
            None => self.complete_case(state, net, &definition.output_condition, fx)?,
            Some(link) => {
                let data = instance.data.clone();
                LoopCancelTracker::tear_down(state, net, fx.at, &mut fx.announcements)?;
                info!(case_id = %state.case_id, net = %net, task_id = %link.task, "Sub-net completed");
                fx.push(Announcement::SubnetCompleted {
                    case_id: state.case_id.clone(),
                    net: net.clone(),
                    task: link.task.clone(),
                });
                self.exit_task(state, &link.net, &link.task, data, fx)?;
            }
        }
        Ok(true)
    }

    fn complete_case(
        &self,
        state: &mut CaseState,
        root: &Identifier,
        output: &ConditionId,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let children: Vec<Identifier> = state
            .nets
            .keys()
            .filter(|id| root.is_ancestor_of(id))
            .cloned()
            .collect();
        for child in children {
            if state.nets.contains_key(&child) {
                LoopCancelTracker::tear_down(state, &child, fx.at, &mut fx.announcements)?;
            }
        }
        for id in live_ids(state) {
            state.work_item_mut(&id)?.cancel(fx.at)?;
            fx.push(Announcement::WorkItemCancelled {
                case_id: state.case_id.clone(),
                work_item: id,
            });
        }

        let instance = state.net_mut(root)?;
        let kept = instance.marking.count(output);
        instance.marking = Marking::new();
        instance.marking.add(output, root, kept);
        instance.active.clear();
        instance.consumed.clear();
        instance.multi_instance.clear();
        let data = instance.data.clone();

        state.status = CaseStatus::Completed;
        info!(case_id = %state.case_id, "Case completed");
        fx.push(Announcement::CaseCompleted {
            case_id: state.case_id.clone(),
            data,
        });
        Ok(())
    }

    /// Offer enabled single-instance atomic tasks, withdraw stale offers
    fn refresh_offers(&self, state: &mut CaseState, fx: &mut Effects) -> Result<(), CoreError> {
        let identifiers: Vec<Identifier> = state.nets.keys().cloned().collect();
        for net in identifiers {
            let definition = self.net_of(state, &net)?;
            let enablement = self.resolver(definition).evaluate(state.net(&net)?)?;

            for task in definition
                .tasks
                .values()
                .filter(|t| t.is_atomic() && !t.is_multi_instance())
            {
                if state.net(&net)?.is_busy(&task.id) {
                    continue;
                }
                let live = state.live_items_for(&net, &task.id);
                if enablement.is_enabled(&task.id) {
                    if live.is_empty() {
                        self.offer(state, &net, task, fx)?;
                    }
                    continue;
                }
                for id in live {
                    state.work_item_mut(&id)?.cancel(fx.at)?;
                    debug!(case_id = %state.case_id, work_item = %id, "Work item withdrawn");
                    fx.push(Announcement::WorkItemCancelled {
                        case_id: state.case_id.clone(),
                        work_item: id,
                    });
                }
            }
        }
        Ok(())
    }

    fn offer(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        task: &Task,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let data = state.net(net)?.data.clone();
        let (id, serial) = state.allocate_work_item_id(&task.id);
        let item = WorkItem::new(
            id.clone(),
            state.case_id.clone(),
            task.id.clone(),
            net.clone(),
            net.clone(),
            serial,
            data,
            fx.at,
        );
        state.work_items.insert(id.clone(), item);
        debug!(case_id = %state.case_id, work_item = %id, "Work item enabled");
        fx.push(Announcement::WorkItemEnabled {
            case_id: state.case_id.clone(),
            work_item: id.clone(),
            task: task.id.clone(),
        });
        self.arm_timer(state, task, &id, TimerTrigger::OnEnabled, fx)
    }

    /// Suspend the case when nothing can fire and no work is outstanding
    fn detect_deadlock(&self, state: &mut CaseState, fx: &mut Effects) -> Result<(), CoreError> {
        if state.status != CaseStatus::Running || !state.live_work_items().is_empty() {
            return Ok(());
        }

        let mut waiting: Vec<TaskId> = Vec::new();
        for instance in state.nets.values() {
            let definition = self.spec.net(&instance.net_id)?;
            for task in definition.tasks.values() {
                if task.preset.iter().any(|c| instance.marking.is_marked(c))
                    || instance.is_busy(&task.id)
                {
                    waiting.push(task.id.clone());
                }
            }
        }
        waiting.sort();
        waiting.dedup();

        warn!(case_id = %state.case_id, tasks = ?waiting, "Deadlock detected");
        state.status = CaseStatus::Suspended(SuspendReason::Deadlocked);
        fx.push(Announcement::CaseDeadlocked {
            case_id: state.case_id.clone(),
            tasks: waiting,
        });
        Ok(())
    }

    /// Drop timers whose work item is no longer live
    fn sync_timers(&self, state: &mut CaseState, fx: &mut Effects) {
        let stale: Vec<WorkItemId> = state
            .timers
            .keys()
            .filter(|id| !state.work_items.get(*id).is_some_and(WorkItem::is_live))
            .cloned()
            .collect();
        for id in stale {
            self.disarm_timer(state, &id, fx);
        }
    }
}

fn fallback(task: &Task) -> Result<ConditionId, CoreError> {
    task.postset
        .iter()
        .find(|f| f.is_default)
        .or_else(|| task.postset.last())
        .map(|f| f.target.clone())
        .ok_or_else(|| CoreError::StructuralError(format!("Task {} has no outgoing flow", task.id)))
}

fn live_ids(state: &CaseState) -> Vec<WorkItemId> {
    state
        .live_work_items()
        .into_iter()
        .map(|wi| wi.id.clone())
        .collect()
}
