//! Finite State Machine for build-and-deploy jobs

use serde::{Deserialize, Serialize};

use crate::models::log::LogStage;

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Persisted, not yet picked up by a worker
    Queued,

    /// Diff resolver running
    Resolving,

    /// Override applier running
    Overriding,

    /// Archive builder running
    Building,

    /// Deployer running
    Deploying,

    /// Finished successfully
    Succeeded,

    /// Finished with an error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Resolving => "resolving",
            JobState::Overriding => "overriding",
            JobState::Building => "building",
            JobState::Deploying => "deploying",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// Coarse progress percentage; `Failed` keeps whatever was reached
    pub fn progress(&self) -> Option<u8> {
        match self {
            JobState::Queued => Some(0),
            JobState::Resolving => Some(20),
            JobState::Overriding => Some(40),
            JobState::Building => Some(60),
            JobState::Deploying => Some(80),
            JobState::Succeeded => Some(100),
            JobState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Stage whose work runs while the job sits in this state
    pub fn stage(&self) -> LogStage {
        match self {
            JobState::Resolving => LogStage::Diff,
            JobState::Overriding => LogStage::Override,
            JobState::Building => LogStage::Build,
            JobState::Deploying => LogStage::Deploy,
            JobState::Queued | JobState::Succeeded | JobState::Failed => LogStage::Orchestrator,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker picked the job up
    Start,

    /// Change set resolved
    Resolved { apply_overrides: bool },

    /// Overrides merged into the change set
    OverridesApplied,

    /// Archive packaged; `deploy` is false for build-only jobs
    Built { deploy: bool },

    /// Archive activated on the target
    Deployed,

    /// Any stage failed or the job was cancelled
    Fail,
}

/// Job FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    progress: u8,
}

impl JobFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: JobState::Queued,
            progress: 0,
        }
    }

    /// Rebuild the FSM from a stored state
    pub fn resume(state: JobState, progress: u8) -> Self {
        Self { state, progress }
    }

    /// Get current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Get current progress
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<JobState, String> {
        let new_state = match (self.state, &event) {
            // From Queued
            (JobState::Queued, JobEvent::Start) => JobState::Resolving,

            // From Resolving
            (JobState::Resolving, JobEvent::Resolved { apply_overrides: true }) => {
                JobState::Overriding
            }
            (JobState::Resolving, JobEvent::Resolved { apply_overrides: false }) => {
                JobState::Building
            }

            // From Overriding
            (JobState::Overriding, JobEvent::OverridesApplied) => JobState::Building,

            // From Building
            (JobState::Building, JobEvent::Built { deploy: true }) => JobState::Deploying,
            (JobState::Building, JobEvent::Built { deploy: false }) => JobState::Succeeded,

            // From Deploying
            (JobState::Deploying, JobEvent::Deployed) => JobState::Succeeded,

            // Any non-terminal state can fail
            (state, JobEvent::Fail) if !state.is_terminal() => JobState::Failed,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        if let Some(progress) = new_state.progress() {
            self.progress = self.progress.max(progress);
        }
        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
