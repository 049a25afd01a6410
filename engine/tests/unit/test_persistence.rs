//! Engine wiring over a real storage layout

use std::sync::Arc;
use std::time::Duration;

use jarsmith::app::state::AppState;
use jarsmith::errors::ErrorKind;
use jarsmith::filesys::dir::Dir;
use jarsmith::models::log::LogStage;
use jarsmith::pipeline::fsm::JobState;
use jarsmith::storage::layout::StorageLayout;
use jarsmith::storage::settings::SettingsStore;
use jarsmith::store::{JobStore, PersistentJobStore};
use jarsmith::workers::dispatcher;

use crate::support::request;

#[tokio::test]
async fn test_failed_job_survives_restart() {
    let base = Dir::create_temp_dir("jarsmith-layout").await.unwrap();
    let layout = StorageLayout::new(base.path());
    let settings = Arc::new(
        SettingsStore::load_or_init(layout.settings_file())
            .await
            .unwrap(),
    );
    assert!(layout.settings_file().exists().await);

    let (state, queue) = AppState::init(&layout, settings).await.unwrap();
    assert!(layout.archives_dir().exists().await);

    let orchestrator = state.orchestrator.clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        dispatcher::run(
            &dispatcher::Options::default(),
            orchestrator,
            queue,
            Box::pin(async move {
                let _ = stop_rx.await;
            }),
        )
        .await;
    });

    // No repository is configured for the project
    let id = state
        .orchestrator
        .submit(request("a1", "b2", None))
        .await
        .unwrap()
        .id;
    let job = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = state.store.get(&id).await.unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let error = job.error.clone().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(error.kind, ErrorKind::RepositoryUnavailable);
    assert_eq!(error.stage, LogStage::Diff);

    let _ = stop_tx.send(());
    worker.await.unwrap();

    // Terminal records come back unchanged
    let reopened = PersistentJobStore::open(layout.jobs_dir()).await.unwrap();
    let restored = reopened.get(&id).await.unwrap();
    assert_eq!(restored.state, JobState::Failed);
    assert_eq!(restored.error, job.error);
    assert_eq!(
        reopened.logs_since(&id, 0).await.unwrap(),
        job.logs_since(0)
    );

    base.delete().await.unwrap();
}
