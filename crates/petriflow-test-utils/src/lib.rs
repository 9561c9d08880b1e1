//! Testing utilities for the Petriflow engine.
//!
//! This crate provides specification fixtures for the workflow patterns the
//! engine supports, test implementations (a recording listener and an event
//! store that injects a competing writer), a builder for engines wired to the
//! in-memory stores, and assertion helpers for case state.

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod implementations;
pub mod util;

pub use builders::{TestEngine, TestEngineBuilder};
pub use implementations::{ContendedEventStore, RecordingListener};
pub use util::init_tracing;
