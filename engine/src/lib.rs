//! Jarsmith engine library
//!
//! Turns a commit range into a deployable archive and ships it to an
//! application server, tracking every job through a persisted state machine.

pub mod app;
pub mod catalog;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
