/// Join evaluation, including the OR-join analysis
pub mod join_resolver;

/// Loop bounds and cancellation regions
pub mod loop_cancel;

/// Token flow and the firing cascade
pub mod net_runner;

/// Work item lifecycle
pub mod work_item_manager;

/// Listener fan-out
pub mod announcer;

/// Specification cache
pub mod spec_cache;
