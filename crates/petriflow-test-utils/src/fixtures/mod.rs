//! Specification fixtures for the Petriflow engine.
//!
//! Each fixture builds one small specification exercising a single workflow
//! pattern. Every fixture uses version "1" so tests can address it with
//! [`key`].

mod documents;
mod nets;

pub use documents::*;
pub use nets::*;

use petriflow_core::{CoreError, SpecificationKey, SpecificationModel};

/// Key of a fixture specification
pub fn key(id: &str) -> SpecificationKey {
    SpecificationKey::new(id, "1")
}

/// Every fixture, compiled
pub fn all() -> Result<Vec<SpecificationModel>, CoreError> {
    Ok(vec![
        and_split_join()?,
        xor_then_or_join()?,
        rework_loop()?,
        threshold_review()?,
        dynamic_review()?,
        cancellation_region()?,
        deferred_choice()?,
        nested_subnet()?,
        or_join_vicious_circle()?,
        timed_approval()?,
        validated_approval()?,
    ])
}
