//! Build-and-deploy pipeline: stage components, the job state machine and
//! the orchestrator that sequences them.

pub mod archive;
pub mod deployer;
pub mod diff;
pub mod fsm;
pub mod git;
pub mod orchestrator;
pub mod overrides;
pub mod transport;
