//! Job API models
//!
//! Request and response bodies served by the jarsmith HTTP interface.

pub mod models;

pub use models::*;
