//! Deploy endpoint models
//!
//! The archive upload contract between jarsmith and an application server.

pub mod models;

pub use models::*;
