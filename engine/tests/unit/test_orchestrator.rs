//! End-to-end job runs through the orchestrator

use std::time::Duration;

use futures::future::join_all;

use jarsmith::errors::ErrorKind;
use jarsmith::models::change::ContentSource;
use jarsmith::models::job::{ProductionConfirmation, Strategy};
use jarsmith::models::log::LogStage;
use jarsmith::pipeline::archive::{read_archive_file, ArchiveManifest};
use jarsmith::pipeline::fsm::JobState;
use jarsmith::store::{CancelOutcome, JobStore};

use crate::support::{
    proxy_override, request, Engine, MemoryRepository, RecordingTransport, TransportMode,
};

fn accepting() -> RecordingTransport {
    RecordingTransport::new(TransportMode::Accept, Duration::ZERO)
}

async fn archive_bytes(location: &str) -> Vec<u8> {
    tokio::fs::read(location).await.unwrap()
}

#[tokio::test]
async fn test_identical_commits_build_only_succeeds_empty() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let id = engine.submit(request("a1", "a1", None)).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.progress, 100);
    assert_eq!(job.built_archive.as_ref().unwrap().file_count, 0);
    assert!(job.warnings[0].starts_with("EmptyChangeSet"));

    let bytes = archive_bytes(job.archive_location.as_ref().unwrap()).await;
    let manifest = ArchiveManifest::from_archive(&bytes).unwrap();
    assert!(manifest.entries.is_empty());
    assert!(engine.transport.calls().is_empty());
}

#[tokio::test]
async fn test_identical_commits_full_strategy_packages_tree() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let mut req = request("a1", "a1", None);
    req.strategy = Strategy::Full;
    let id = engine.submit(req).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.built_archive.as_ref().unwrap().file_count, 4);
    assert!(job.warnings.is_empty());
}

#[tokio::test]
async fn test_override_replaces_one_of_three_changes() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;
    engine
        .overrides
        .upsert(proxy_override("staging", "src/Pay.java", "class Pay { staging }"))
        .await;

    let mut req = request("a1", "b2", Some("staging"));
    req.apply_overrides = true;
    let id = engine.submit(req).await;
    let job = engine.wait_terminal(&id).await;
    assert_eq!(job.state, JobState::Succeeded, "{:?}", job.error);

    let bytes = archive_bytes(job.archive_location.as_ref().unwrap()).await;
    let manifest = ArchiveManifest::from_archive(&bytes).unwrap();
    let paths: Vec<&str> = manifest.packaged_paths().collect();
    assert_eq!(paths, vec!["src/Cart.java", "src/Order.java", "src/Pay.java"]);

    assert_eq!(
        read_archive_file(&bytes, "src/Pay.java").unwrap(),
        b"class Pay { staging }"
    );
    assert_eq!(
        read_archive_file(&bytes, "src/Cart.java").unwrap(),
        b"class Cart { v2 }"
    );
    assert_eq!(
        read_archive_file(&bytes, "src/Order.java").unwrap(),
        b"class Order { v2 }"
    );
    let pay = manifest.entries.iter().find(|e| e.path == "src/Pay.java").unwrap();
    assert_eq!(pay.source, ContentSource::Override);

    let calls = engine.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].environment.id, "staging");
    assert_eq!(calls[0].archive.digest, job.built_archive.unwrap().digest);
}

#[tokio::test]
async fn test_production_guard_fails_without_network_call() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let id = engine.submit(request("a1", "b2", Some("prod"))).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ProductionGuardViolation);
    assert_eq!(error.stage, LogStage::Deploy);
    assert_eq!(job.progress, 80);
    assert!(engine.transport.calls().is_empty());
}

#[tokio::test]
async fn test_confirmed_production_deploy_succeeds() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let mut req = request("a1", "b2", Some("prod"));
    req.production_confirmation = Some(ProductionConfirmation {
        confirmed_by: "release-manager".to_string(),
        strategy: Strategy::Diff,
        apply_overrides: false,
    });
    let id = engine.submit(req).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(engine.transport.calls().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_deploy_has_no_effect() {
    let transport = RecordingTransport::new(TransportMode::Accept, Duration::from_millis(200));
    let engine = Engine::running(MemoryRepository::shop(), transport).await;

    let id = engine.submit(request("a1", "b2", Some("staging"))).await;
    engine
        .wait_until(&id, |job| job.state == JobState::Deploying)
        .await;

    let (outcome, _) = engine.orchestrator.cancel(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Ignored);

    let job = engine.wait_terminal(&id).await;
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.error.is_none());
    assert!(job.archive_location.is_some());
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let mut engine = Engine::new(MemoryRepository::shop(), accepting()).await;

    let id = engine.submit(request("a1", "b2", None)).await;
    let (outcome, job) = engine.orchestrator.cancel(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);

    // The dispatcher skips it once it starts
    engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = engine.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn test_cancel_while_resolving_stops_at_checkpoint() {
    let repository = MemoryRepository::shop().with_delay(Duration::from_millis(150));
    let engine = Engine::running(repository, accepting()).await;

    let id = engine.submit(request("a1", "b2", Some("staging"))).await;
    engine
        .wait_until(&id, |job| job.state == JobState::Resolving)
        .await;

    let (outcome, _) = engine.orchestrator.cancel(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Pending);

    let job = engine.wait_terminal(&id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(job.built_archive.is_none());
    assert!(engine.transport.calls().is_empty());
}

#[tokio::test]
async fn test_same_environment_deploys_never_overlap() {
    let transport = RecordingTransport::new(TransportMode::Accept, Duration::from_millis(60));
    let engine = Engine::running(MemoryRepository::shop(), transport).await;

    let ids = join_all((0..3).map(|_| engine.submit(request("a1", "b2", Some("staging"))))).await;
    let jobs = join_all(ids.iter().map(|id| engine.wait_terminal(id))).await;

    assert!(jobs.iter().all(|job| job.state == JobState::Succeeded));
    assert_eq!(engine.transport.calls().len(), 3);
    assert_eq!(engine.transport.max_in_flight(), 1);
}

#[tokio::test]
async fn test_identical_jobs_share_one_archive() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let first = engine.submit(request("a1", "b2", None)).await;
    let first = engine.wait_terminal(&first).await;
    let second = engine.submit(request("a1", "b2", None)).await;
    let second = engine.wait_terminal(&second).await;

    assert_eq!(first.archive_location, second.archive_location);
    assert_eq!(
        first.built_archive.unwrap().digest,
        second.built_archive.unwrap().digest
    );
}

#[tokio::test]
async fn test_stage_failure_is_recorded() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let id = engine.submit(request("a1", "zz", None)).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::InvalidReference);
    assert_eq!(error.stage, LogStage::Diff);
    assert!(!error.retryable);

    let logs = engine.orchestrator.logs(&id, 0).await.unwrap();
    assert!(logs.iter().any(|l| l.text.starts_with("diff stage failed")));
}

#[tokio::test]
async fn test_rejected_deploy_keeps_built_archive() {
    let transport = RecordingTransport::new(TransportMode::Reject, Duration::ZERO);
    let engine = Engine::running(MemoryRepository::shop(), transport).await;

    let id = engine.submit(request("a1", "b2", Some("staging"))).await;
    let job = engine.wait_terminal(&id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::DeployRejected);
    assert!(job.archive_location.is_none());
    let built = job.built_archive.unwrap();
    assert!(tokio::fs::metadata(&built.location).await.is_ok());

    // Rejections are terminal on first occurrence
    assert_eq!(engine.transport.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_environment_fails_override_stage() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let mut req = request("a1", "b2", Some("nowhere"));
    req.apply_overrides = true;
    let id = engine.submit(req).await;
    let job = engine.wait_terminal(&id).await;

    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::EnvironmentNotFound);
    assert_eq!(error.stage, LogStage::Override);
}

#[tokio::test]
async fn test_logs_poll_incrementally() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let id = engine.submit(request("a1", "b2", Some("staging"))).await;
    engine.wait_terminal(&id).await;

    let all = engine.orchestrator.logs(&id, 0).await.unwrap();
    assert!(all.len() > 3);
    assert!(all.windows(2).all(|w| w[1].seq == w[0].seq + 1));
    assert!(all[0].text.starts_with("Job accepted"));

    let tail = engine.orchestrator.logs(&id, all[2].seq).await.unwrap();
    assert_eq!(tail, all[3..].to_vec());
    let last = all.last().unwrap().seq;
    assert!(engine.orchestrator.logs(&id, last).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_at_submit() {
    let engine = Engine::running(MemoryRepository::shop(), accepting()).await;

    let mut req = request("a1", "b2", None);
    req.version = String::new();
    assert!(engine.orchestrator.submit(req).await.is_err());
    assert!(engine.store.list().await.unwrap().is_empty());
}
