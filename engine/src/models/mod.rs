//! Domain models

pub mod change;
pub mod environment;
pub mod job;
pub mod log;
pub mod overrides;
