/// Command application shared by live execution and replay
pub mod case_processor;

/// Stateless engine facade
pub mod stateless_engine;
