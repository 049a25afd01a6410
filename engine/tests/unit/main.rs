//! Integration tests for the jarsmith engine

mod support;
mod test_api;
mod test_fsm;
mod test_orchestrator;
mod test_persistence;
