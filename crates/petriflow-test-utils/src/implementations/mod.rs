//! Test implementations (fakes) of engine interfaces.
//!
//! These implementations record or perturb what the engine does so tests can
//! observe announcements and provoke concurrency conflicts deterministically.

pub mod contended_event_store;
pub mod recording_listener;

// Re-export all implementations for easy access
pub use contended_event_store::*;
pub use recording_listener::*;
