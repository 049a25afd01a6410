//! Deployer
//!
//! Pushes a built archive to an environment through an [`ArchiveTransport`].
//! Deployments to one environment are serialized by [`EnvironmentLocks`];
//! the caller holds the lock for exactly the deploying stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::catalog::EnvironmentDirectory;
use crate::errors::PipelineError;
use crate::models::environment::Environment;
use crate::models::job::{ArchiveInfo, JobRequest};
use crate::storage::settings::PipelineSettings;
use crate::store::StageLogger;
use crate::utils::RetryBackoff;

/// Everything a transport needs for one deploy attempt
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub job_id: String,
    pub version: String,
    pub archive: ArchiveInfo,
    pub environment: Arc<Environment>,
}

/// Outcome of a successful deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    /// Status lines streamed back by the server
    pub status_lines: usize,

    /// Final message from the server
    pub message: String,
}

/// Moves archive bytes to an application server
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Transfer and activate the archive, streaming status lines to `log`
    async fn deploy(
        &self,
        request: &DeployRequest,
        log: &StageLogger,
    ) -> Result<DeployReceipt, PipelineError>;
}

/// Mutual exclusion keyed by environment id
#[derive(Default)]
pub struct EnvironmentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EnvironmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `environment_id`
    pub async fn acquire(&self, environment_id: &str, log: &StageLogger) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(environment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                log.line(format!(
                    "Another deployment to {} is running, waiting for it to finish",
                    environment_id
                ))
                .await;
                lock.lock_owned().await
            }
        }
    }
}

/// Deploy-stage limits taken from the settings snapshot of the job
#[derive(Debug, Clone)]
pub struct DeployPolicy {
    pub timeout: Duration,
    pub retry_count: u32,
    pub backoff: RetryBackoff,
}

impl From<&PipelineSettings> for DeployPolicy {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            timeout: settings.deploy_timeout(),
            retry_count: settings.retry_count,
            backoff: settings.retry_backoff(),
        }
    }
}

pub struct Deployer {
    transport: Arc<dyn ArchiveTransport>,
    environments: Arc<dyn EnvironmentDirectory>,
    locks: EnvironmentLocks,
}

impl Deployer {
    pub fn new(
        transport: Arc<dyn ArchiveTransport>,
        environments: Arc<dyn EnvironmentDirectory>,
    ) -> Self {
        Self {
            transport,
            environments,
            locks: EnvironmentLocks::new(),
        }
    }

    pub fn locks(&self) -> &EnvironmentLocks {
        &self.locks
    }

    /// Deploy `archive` to the job's environment.
    ///
    /// The production guard runs before any network call. Each attempt is
    /// bounded by the policy timeout; only connection failures are retried.
    pub async fn deploy(
        &self,
        job_id: &str,
        request: &JobRequest,
        archive: &ArchiveInfo,
        policy: &DeployPolicy,
        log: &StageLogger,
    ) -> Result<DeployReceipt, PipelineError> {
        let environment_id = request.environment_id.as_deref().ok_or_else(|| {
            PipelineError::ValidationError("Job has no target environment".to_string())
        })?;
        let environment = self
            .environments
            .get(environment_id)
            .await?
            .ok_or_else(|| PipelineError::EnvironmentNotFound(environment_id.to_string()))?;

        check_production_guard(&environment, request)?;
        if environment.production {
            if let Some(confirmation) = &request.production_confirmation {
                log.line(format!(
                    "Production deployment confirmed by {}",
                    confirmation.confirmed_by
                ))
                .await;
            }
        }

        let deploy_request = DeployRequest {
            job_id: job_id.to_string(),
            version: request.version.clone(),
            archive: archive.clone(),
            environment: environment.clone(),
        };

        log.line(format!(
            "Deploying {} ({}) to {} at {}:{}",
            request.version,
            archive.digest,
            environment.id,
            environment.host,
            environment.port
        ))
        .await;

        let mut attempt = 0;
        loop {
            let result =
                tokio::time::timeout(policy.timeout, self.transport.deploy(&deploy_request, log))
                    .await;

            match result {
                Err(_) => return Err(PipelineError::DeployTimeout(policy.timeout)),
                Ok(Ok(receipt)) => {
                    log.line(format!("Deployment finished: {}", receipt.message))
                        .await;
                    return Ok(receipt);
                }
                Ok(Err(e)) if e.is_retryable() && attempt < policy.retry_count => {
                    let delay = policy.backoff.delay_for(attempt);
                    attempt += 1;
                    warn!(job_id = %job_id, "Deploy attempt {} failed: {}", attempt, e);
                    log.line(format!(
                        "Attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    ))
                    .await;
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}

/// Production-flagged environments require a confirmation matching the
/// job's strategy and override flag
pub fn check_production_guard(
    environment: &Environment,
    request: &JobRequest,
) -> Result<(), PipelineError> {
    if !environment.production {
        return Ok(());
    }

    let confirmation = request.production_confirmation.as_ref().ok_or_else(|| {
        PipelineError::ProductionGuardViolation(format!(
            "{} is a production environment and the job carries no confirmation",
            environment.id
        ))
    })?;

    if confirmation.confirmed_by.trim().is_empty() {
        return Err(PipelineError::ProductionGuardViolation(
            "Confirmation does not name who confirmed it".to_string(),
        ));
    }
    if confirmation.strategy != request.strategy {
        return Err(PipelineError::ProductionGuardViolation(format!(
            "Confirmed strategy {} does not match job strategy {}",
            confirmation.strategy.as_str(),
            request.strategy.as_str()
        )));
    }
    if confirmation.apply_overrides != request.apply_overrides {
        return Err(PipelineError::ProductionGuardViolation(format!(
            "Confirmed apply_overrides={} does not match the job",
            confirmation.apply_overrides
        )));
    }
    Ok(())
}
