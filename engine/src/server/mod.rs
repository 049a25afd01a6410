//! Local HTTP API: job submission, status, logs, cancellation and settings

pub mod errors;
pub mod handlers;
pub mod serve;
pub mod state;
