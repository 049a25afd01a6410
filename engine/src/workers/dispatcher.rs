//! Dispatcher worker: hands queued jobs to a bounded pool

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::pipeline::orchestrator::{JobOrchestrator, JobQueue};

/// Dispatcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Jobs allowed to run at once
    pub pool_size: usize,

    /// How long shutdown waits for running jobs
    pub drain_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_size: 4,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Run the dispatcher worker
pub async fn run(
    options: &Options,
    orchestrator: Arc<JobOrchestrator>,
    mut queue: JobQueue,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    let pool_size = options.pool_size.max(1);
    info!("Dispatcher worker starting with {} slot(s)...", pool_size);

    let semaphore = Arc::new(Semaphore::new(pool_size));

    loop {
        let job_id = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down...");
                break;
            }
            next = queue.next() => match next {
                Some(job_id) => job_id,
                None => {
                    info!("Job queue closed, dispatcher worker stopping...");
                    break;
                }
            },
        };

        // Jobs stay queued until a slot frees up
        let permit = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down, job {} stays queued", job_id);
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        debug!("Dispatching job {}", job_id);
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let _permit = permit;
            orchestrator.execute(&job_id).await;
        });
    }

    info!("Dispatcher waiting for in-flight jobs to complete...");
    let drained = tokio::time::timeout(
        options.drain_timeout,
        semaphore.acquire_many(pool_size as u32),
    )
    .await;
    match drained {
        Ok(Ok(_)) => info!("Dispatcher worker stopped"),
        _ => warn!(
            "Jobs still running after {:?}, leaving them to be marked interrupted",
            options.drain_timeout
        ),
    }
}
