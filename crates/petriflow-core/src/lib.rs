//!
//! Petriflow Core - Petri-net workflow engine
//!
//! This crate holds the specification model, the per-case token store, join
//! resolution, the net runner, work item handling and the stateless engine
//! facade that rebuilds every case from its event log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - specifications, case state, events and repository traits
pub mod domain;

/// Engine components - joins, loops, cascade and work items
pub mod engine;

/// Application services - command application and the engine facade
pub mod application;

/// Engine configuration
pub mod config;

/// Core types
pub mod types;

/// Error types
pub mod error;

pub use config::EngineConfig;
pub use error::CoreError;
pub use types::DataPacket;

pub use application::case_processor::{Applied, ApplyMode, CaseProcessor};
pub use application::stateless_engine::{CaseOutcome, StatelessEngine};
pub use domain::case_state::{
    CaseState, CaseStatus, FailureReason, MultiInstanceProgress, NetInstance, SuspendReason,
    TimerRecord,
};
pub use domain::events::{Announcement, AnnouncementCategory, CaseCommand, CaseEvent};
pub use domain::identifier::{
    CaseId, ConditionId, DecompositionId, Identifier, NetId, SpecificationId, SpecificationKey,
    TaskId, WorkItemId,
};
pub use domain::marking::Marking;
pub use domain::predicate::{DataValidator, JmesPathEvaluator, PredicateEvaluator, SchemaValidator};
pub use domain::repository::{CaseSnapshot, EventStore, SnapshotStore, SpecificationLoader};
pub use domain::specification::{
    CreationMode, Decomposition, DecompositionKind, Flow, JoinKind, MultiInstance, NetDefinition,
    OutputParam, ParamType, SpecificationDefinition, SpecificationModel, SplitKind,
    TaskDefinition, TaskKind, TimerParams, TimerTrigger,
};
pub use domain::work_item::{WorkItem, WorkItemStatus};
pub use engine::announcer::{EventAnnouncer, EventListener, ListenerId};
pub use engine::join_resolver::{Enablement, JoinResolver, OrJoinDecision};
pub use engine::loop_cancel::LoopCancelTracker;
pub use engine::net_runner::{Effects, NetRunner};
pub use engine::spec_cache::SpecificationCache;
pub use engine::work_item_manager::WorkItemManager;
