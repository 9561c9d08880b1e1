//! Assertion utilities for validating case state.
//!
//! This module provides helper functions for validating and asserting
//! properties of case state, making tests more concise and readable.

mod case_state;

// Re-export all assertion helpers for easy access
pub use case_state::*;
