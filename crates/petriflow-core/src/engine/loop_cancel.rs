//! Loop counters and cancellation regions
//!
//! Every traversal of a loop-back edge is counted per net instance; once an
//! edge is taken more often than the configured bound the case has to fail.
//! Cancellation regions are cleared here as well, in one step, before the
//! cancelling task produces its output tokens.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::case_state::{CaseState, FailureReason};
use crate::domain::events::Announcement;
use crate::domain::identifier::{Identifier, TaskId};
use crate::domain::specification::CancellationSet;
use crate::CoreError;

/// Counts loop-back traversals and clears cancellation regions
#[derive(Debug, Clone, Copy)]
pub struct LoopCancelTracker {
    bound: u32,
}

impl LoopCancelTracker {
    /// Tracker failing cases after `bound` traversals of one edge
    pub fn new(bound: u32) -> Self {
        Self { bound }
    }

    /// Counter key for an edge inside a net instance
    pub fn edge_key(net: &Identifier, source: &str, target: &str) -> String {
        format!("{}/{}->{}", net, source, target)
    }

    /// Record one traversal of `source -> target`
    ///
    /// Returns the failure reason once the edge exceeds the bound.
    pub fn record_traversal(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        source: &str,
        target: &str,
    ) -> Option<FailureReason> {
        let key = Self::edge_key(net, source, target);
        let counter = state.loop_counters.entry(key.clone()).or_insert(0);
        *counter += 1;
        debug!(case_id = %state.case_id, edge = %key, count = *counter, "Loop-back edge traversed");

        if *counter > self.bound {
            warn!(case_id = %state.case_id, edge = %key, bound = self.bound, "Loop bound exceeded");
            return Some(FailureReason::LoopBoundExceeded {
                edge: key,
                bound: self.bound,
            });
        }
        None
    }

    /// Traversals of an edge so far
    pub fn count(state: &CaseState, net: &Identifier, source: &str, target: &str) -> u32 {
        state
            .loop_counters
            .get(&Self::edge_key(net, source, target))
            .copied()
            .unwrap_or(0)
    }

    /// Clear the cancellation region of `owner` in net instance `net`
    ///
    /// Conditions are emptied, live work items of the listed tasks are
    /// cancelled, their busy state is reset and any sub-net they run is torn
    /// down. The owning task is never cancelled by its own region.
    pub fn clear_region(
        &self,
        state: &mut CaseState,
        net: &Identifier,
        owner: &TaskId,
        region: &CancellationSet,
        at: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<(), CoreError> {
        if region.is_empty() {
            return Ok(());
        }

        let instance = state.net_mut(net)?;
        let mut removed = 0;
        for condition in &region.conditions {
            removed += instance.marking.clear(condition);
        }
        for task in region.tasks.iter().filter(|t| *t != owner) {
            instance.active.remove(task);
            instance.consumed.remove(task);
            instance.multi_instance.remove(task);
        }

        for task in region.tasks.iter().filter(|t| *t != owner) {
            for id in state.live_items_for(net, task) {
                state.work_item_mut(&id)?.cancel(at)?;
                announcements.push(Announcement::WorkItemCancelled {
                    case_id: state.case_id.clone(),
                    work_item: id,
                });
            }

            let subnets: Vec<Identifier> = state
                .nets
                .values()
                .filter(|ni| {
                    ni.parent
                        .as_ref()
                        .is_some_and(|link| &link.net == net && &link.task == task)
                })
                .map(|ni| ni.identifier.clone())
                .collect();
            for subnet in subnets {
                Self::tear_down(state, &subnet, at, announcements)?;
            }
        }

        debug!(
            case_id = %state.case_id,
            net = %net,
            task_id = %owner,
            tokens_removed = removed,
            "Cancellation region cleared"
        );
        Ok(())
    }

    /// Remove a net instance and all its descendants, cancelling their live work
    pub fn tear_down(
        state: &mut CaseState,
        root: &Identifier,
        at: DateTime<Utc>,
        announcements: &mut Vec<Announcement>,
    ) -> Result<(), CoreError> {
        let doomed: Vec<Identifier> = state
            .nets
            .keys()
            .filter(|id| *id == root || root.is_ancestor_of(id))
            .cloned()
            .collect();

        let items: Vec<_> = state
            .live_work_items()
            .into_iter()
            .filter(|wi| doomed.contains(&wi.net))
            .map(|wi| wi.id.clone())
            .collect();
        for id in items {
            state.work_item_mut(&id)?.cancel(at)?;
            announcements.push(Announcement::WorkItemCancelled {
                case_id: state.case_id.clone(),
                work_item: id,
            });
        }

        for id in &doomed {
            state.nets.remove(id);
        }
        Ok(())
    }
}
