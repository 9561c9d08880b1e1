/// Identifiers and value objects
pub mod identifier;

/// Specification model
pub mod specification;

/// Token markings
pub mod marking;

/// Case state aggregate
pub mod case_state;

/// Work items
pub mod work_item;

/// Event log commands and announcements
pub mod events;

/// Repository interfaces
pub mod repository;

/// Split predicates and output validation
pub mod predicate;
