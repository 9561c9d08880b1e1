//! Builders for test environments.

mod test_engine;

pub use test_engine::*;
