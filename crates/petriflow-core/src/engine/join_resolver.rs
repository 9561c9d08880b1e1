//! Join evaluation
//!
//! AND and XOR joins are decided from the local marking. OR-joins are not:
//! an OR-join may fire only when none of its empty input conditions can
//! still receive a token. That is answered by a backward search over the
//! net graph for live locations (marked conditions and busy tasks). When the
//! search runs into another OR-join that is itself waiting for a decision,
//! the dependency is recorded instead of searching through it, and all such
//! joins are settled together by a bounded fixed-point iteration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

use crate::domain::case_state::NetInstance;
use crate::domain::identifier::{ConditionId, Identifier, TaskId};
use crate::domain::marking::Marking;
use crate::domain::specification::{JoinKind, Net, Task};
use crate::CoreError;

/// Outcome of evaluating one OR-join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrJoinDecision {
    /// No empty input can receive a token
    Fire,
    /// A token may still arrive
    Wait,
    /// Waits only on other undecided OR-joins
    Undecided,
}

/// What the backward search found for one OR-join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    /// A live location can still put a token on an empty input
    pub live: bool,
    /// Deferred OR-joins that lie on a path to an empty input
    pub depends_on: BTreeSet<TaskId>,
}

/// Tasks whose joins hold in a net instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enablement {
    /// Tasks that may fire, in id order
    pub enabled: Vec<TaskId>,
    /// OR-joins left undecided by the fixed point
    pub undecided: Vec<TaskId>,
}

impl Enablement {
    /// Whether `task` may fire
    pub fn is_enabled(&self, task: &TaskId) -> bool {
        self.enabled.binary_search(task).is_ok()
    }
}

/// Evaluates join predicates for the tasks of one net
pub struct JoinResolver<'a> {
    net: &'a Net,
    max_rounds: u32,
    abort: Option<&'a AtomicBool>,
}

impl<'a> JoinResolver<'a> {
    /// Create a resolver for `net`
    pub fn new(net: &'a Net, max_rounds: u32, abort: Option<&'a AtomicBool>) -> Self {
        Self {
            net,
            max_rounds,
            abort,
        }
    }

    /// Every task of the instance whose join currently holds
    ///
    /// Busy tasks are never enabled.
    pub fn evaluate(&self, instance: &NetInstance) -> Result<Enablement, CoreError> {
        let mut enabled = Vec::new();
        let mut or_candidates = Vec::new();

        for task in self.net.tasks.values() {
            if instance.is_busy(&task.id) {
                continue;
            }
            match task.join {
                JoinKind::And | JoinKind::Xor => {
                    if self.local_join_holds(task, &instance.marking) {
                        enabled.push(task.id.clone());
                    }
                }
                JoinKind::Or => {
                    if task.preset.iter().any(|c| instance.marking.is_marked(c)) {
                        or_candidates.push(task.id.clone());
                    }
                }
            }
        }

        let mut undecided = Vec::new();
        if !or_candidates.is_empty() {
            for (task, decision) in self.resolve_or_joins(instance, &or_candidates)? {
                match decision {
                    OrJoinDecision::Fire => enabled.push(task),
                    OrJoinDecision::Undecided => undecided.push(task),
                    OrJoinDecision::Wait => {}
                }
            }
        }

        enabled.sort();
        Ok(Enablement { enabled, undecided })
    }

    /// AND and XOR joins
    pub fn local_join_holds(&self, task: &Task, marking: &Marking) -> bool {
        match task.join {
            JoinKind::And => and_identifier(task, marking).is_some(),
            JoinKind::Xor => task.preset.iter().any(|c| marking.is_marked(c)),
            // OR-joins need the net-wide analysis
            JoinKind::Or => false,
        }
    }

    /// Tokens a firing of `task` removes, one entry per token
    pub fn consumption(
        &self,
        task: &Task,
        marking: &Marking,
    ) -> Result<Vec<(ConditionId, Identifier)>, CoreError> {
        let not_enabled = || {
            CoreError::StructuralError(format!("Task {} fired without an enabling marking", task.id))
        };

        match task.join {
            JoinKind::And => {
                let identifier = and_identifier(task, marking).ok_or_else(not_enabled)?;
                Ok(task
                    .preset
                    .iter()
                    .map(|c| (c.clone(), identifier.clone()))
                    .collect())
            }
            JoinKind::Xor => task
                .preset
                .iter()
                .find_map(|c| marking.identifiers(c).next().map(|i| (c.clone(), i.clone())))
                .map(|token| vec![token])
                .ok_or_else(not_enabled),
            JoinKind::Or => {
                let tokens: Vec<_> = task
                    .preset
                    .iter()
                    .filter_map(|c| marking.identifiers(c).next().map(|i| (c.clone(), i.clone())))
                    .collect();
                if tokens.is_empty() {
                    return Err(not_enabled());
                }
                Ok(tokens)
            }
        }
    }

    /// Decide every candidate OR-join of the instance together
    pub fn resolve_or_joins(
        &self,
        instance: &NetInstance,
        candidates: &[TaskId],
    ) -> Result<BTreeMap<TaskId, OrJoinDecision>, CoreError> {
        let deferred: BTreeSet<TaskId> = candidates.iter().cloned().collect();
        let mut analyses = BTreeMap::new();
        let mut decisions = BTreeMap::new();

        for id in candidates {
            let join = self.net.task(id)?;
            let reach = self.backward_search(instance, join, &deferred);
            let initial = if reach.live {
                OrJoinDecision::Wait
            } else if reach.depends_on.is_empty() {
                OrJoinDecision::Fire
            } else {
                OrJoinDecision::Undecided
            };
            trace!(task_id = %id, live = reach.live, deps = ?reach.depends_on, "OR-join analysed");
            decisions.insert(id.clone(), initial);
            analyses.insert(id.clone(), reach);
        }

        // each productive round settles at least one join
        let bound = self.max_rounds.min(candidates.len() as u32 + 1);
        let mut rounds = 0;
        loop {
            self.check_abort()?;
            if rounds >= bound {
                break;
            }
            rounds += 1;

            let mut changed = false;
            for (id, reach) in &analyses {
                if decisions.get(id) != Some(&OrJoinDecision::Undecided) {
                    continue;
                }
                let settled_dependency = reach.depends_on.iter().any(|dep| {
                    matches!(
                        decisions.get(dep),
                        Some(OrJoinDecision::Fire) | Some(OrJoinDecision::Wait)
                    )
                });
                if settled_dependency {
                    decisions.insert(id.clone(), OrJoinDecision::Wait);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        debug!(
            net_id = %self.net.id,
            identifier = %instance.identifier,
            rounds,
            decisions = ?decisions,
            "OR-join fixed point reached"
        );
        Ok(decisions)
    }

    /// Search backwards from each empty input of `join` for live locations
    pub fn backward_search(
        &self,
        instance: &NetInstance,
        join: &Task,
        deferred: &BTreeSet<TaskId>,
    ) -> Reachability {
        let mut result = Reachability::default();
        let mut seen_conditions: BTreeSet<&ConditionId> = BTreeSet::new();
        let mut seen_tasks: BTreeSet<&TaskId> = BTreeSet::new();

        for empty in join
            .preset
            .iter()
            .filter(|c| !instance.marking.is_marked(c))
        {
            let mut stack: Vec<&ConditionId> = vec![empty];
            while let Some(condition) = stack.pop() {
                if !seen_conditions.insert(condition) {
                    continue;
                }
                if instance.marking.is_marked(condition) {
                    result.live = true;
                    return result;
                }
                for producer in self.net.producers(condition) {
                    if producer == &join.id || !seen_tasks.insert(producer) {
                        continue;
                    }
                    if instance.is_busy(producer) {
                        result.live = true;
                        return result;
                    }
                    if deferred.contains(producer) {
                        result.depends_on.insert(producer.clone());
                        continue;
                    }
                    if let Some(task) = self.net.tasks.get(producer) {
                        stack.extend(task.preset.iter());
                    }
                }
            }
        }
        result
    }

    fn check_abort(&self) -> Result<(), CoreError> {
        match self.abort {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(CoreError::Aborted(
                "OR-join evaluation interrupted by case cancellation".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// First identifier holding a token on every preset condition
fn and_identifier(task: &Task, marking: &Marking) -> Option<Identifier> {
    let (first, rest) = task.preset.split_first()?;
    marking
        .identifiers(first)
        .find(|id| rest.iter().all(|c| marking.count_for(c, id) > 0))
        .cloned()
}
