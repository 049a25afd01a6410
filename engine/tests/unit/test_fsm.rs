//! FSM unit tests

use jarsmith::pipeline::fsm::{JobEvent, JobFsm, JobState};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobState::Queued);
    assert_eq!(fsm.progress(), 0);
}

#[test]
fn test_fsm_build_only_flow() {
    let mut fsm = JobFsm::new();

    // Queued -> Resolving
    fsm.process(JobEvent::Start).unwrap();
    assert_eq!(fsm.state(), JobState::Resolving);

    // Resolving -> Building, overriding skipped
    fsm.process(JobEvent::Resolved { apply_overrides: false }).unwrap();
    assert_eq!(fsm.state(), JobState::Building);

    // Building -> Succeeded, no deploy
    fsm.process(JobEvent::Built { deploy: false }).unwrap();
    assert_eq!(fsm.state(), JobState::Succeeded);
    assert_eq!(fsm.progress(), 100);
}

#[test]
fn test_fsm_deploy_failure_flow() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Start).unwrap();
    fsm.process(JobEvent::Resolved { apply_overrides: true }).unwrap();
    fsm.process(JobEvent::OverridesApplied).unwrap();
    fsm.process(JobEvent::Built { deploy: true }).unwrap();
    assert_eq!(fsm.state(), JobState::Deploying);

    fsm.process(JobEvent::Fail).unwrap();
    assert_eq!(fsm.state(), JobState::Failed);
    assert_eq!(fsm.progress(), 80);
}

#[test]
fn test_fsm_cancel_from_queue() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Fail).unwrap();
    assert_eq!(fsm.state(), JobState::Failed);
    assert_eq!(fsm.progress(), 0);
}

#[test]
fn test_fsm_resume_from_stored_state() {
    let mut fsm = JobFsm::resume(JobState::Overriding, 40);
    fsm.process(JobEvent::OverridesApplied).unwrap();
    assert_eq!(fsm.state(), JobState::Building);
    assert_eq!(fsm.progress(), 60);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = JobFsm::new();

    // Cannot skip stages
    assert_err!(fsm.process(JobEvent::Deployed));
    assert_err!(fsm.process(JobEvent::OverridesApplied));
    assert_eq!(fsm.state(), JobState::Queued);

    // Overriding only follows a resolve that asked for it
    assert_ok!(fsm.process(JobEvent::Start));
    assert_ok!(fsm.process(JobEvent::Resolved { apply_overrides: false }));
    assert_err!(fsm.process(JobEvent::OverridesApplied));
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = JobFsm::resume(JobState::Succeeded, 100);
    assert_err!(fsm.process(JobEvent::Fail));
    assert_err!(fsm.process(JobEvent::Start));
    assert_eq!(fsm.state(), JobState::Succeeded);
}
