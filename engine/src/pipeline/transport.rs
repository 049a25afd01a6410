//! HTTP archive transport
//!
//! Uploads the archive to `<scheme>://<host>:<port>/deploy` and follows the
//! newline-delimited status stream the application server sends back.

use async_trait::async_trait;
use deploy_api::{DeployRejection, DeployStatusLine};
use reqwest::{header, Client, Response, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, error};
use url::Url;

use crate::errors::PipelineError;
use crate::models::environment::Environment;
use crate::pipeline::deployer::{ArchiveTransport, DeployReceipt, DeployRequest};
use crate::store::StageLogger;

pub struct HttpArchiveTransport {
    client: Client,
}

impl HttpArchiveTransport {
    pub fn new() -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                PipelineError::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

/// Deploy endpoint for an environment
pub fn deploy_url(environment: &Environment) -> Result<Url, PipelineError> {
    let base = format!(
        "{}://{}:{}",
        environment.channel.scheme(),
        environment.host,
        environment.port
    );
    Url::parse(&base)
        .and_then(|url| url.join(deploy_api::DEPLOY_PATH))
        .map_err(|e| {
            PipelineError::ConfigError(format!(
                "Invalid address for environment {}: {}",
                environment.id, e
            ))
        })
}

fn connection_failed(err: reqwest::Error) -> PipelineError {
    PipelineError::ConnectionFailed(err.to_string())
}

#[async_trait]
impl ArchiveTransport for HttpArchiveTransport {
    async fn deploy(
        &self,
        request: &DeployRequest,
        log: &StageLogger,
    ) -> Result<DeployReceipt, PipelineError> {
        let url = deploy_url(&request.environment)?;
        let body = tokio::fs::read(&request.archive.location).await?;
        debug!("POST {} ({} bytes)", url, body.len());

        let mut builder = self
            .client
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/zip")
            .header(deploy_api::VERSION_HEADER, &request.version)
            .header(deploy_api::JOB_HEADER, &request.job_id)
            .header(deploy_api::DIGEST_HEADER, &request.archive.digest)
            .body(body);
        if let Some(credentials) = &request.environment.credentials {
            builder = builder.basic_auth(
                &credentials.username,
                Some(credentials.password.expose_secret()),
            );
        }

        let response = builder.send().await.map_err(connection_failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(refusal(status, response).await);
        }

        follow_status_stream(response, log).await
    }
}

/// Map a non-success response to a retryable or terminal error
async fn refusal(status: StatusCode, response: Response) -> PipelineError {
    let body = response.text().await.unwrap_or_default();
    error!("Deploy request failed: {} - {}", status, body);

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            PipelineError::ConnectionFailed(format!("{}: {}", status, body.trim()))
        }
        _ => {
            let reason = serde_json::from_str::<DeployRejection>(&body)
                .map(|r| r.reason)
                .unwrap_or_else(|_| body.trim().to_string());
            PipelineError::DeployRejected(format!("{}: {}", status, reason))
        }
    }
}

async fn follow_status_stream(
    mut response: Response,
    log: &StageLogger,
) -> Result<DeployReceipt, PipelineError> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut lines = 0;
    let mut last: Option<DeployStatusLine> = None;

    while let Some(chunk) = response.chunk().await.map_err(connection_failed)? {
        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=pos).collect();
            if let Some(line) = status_line(&raw) {
                lines += 1;
                log.line(describe(&line)).await;
                last = Some(line);
            }
        }
    }
    if let Some(line) = status_line(&buffer) {
        lines += 1;
        log.line(describe(&line)).await;
        last = Some(line);
    }

    match last {
        Some(line) if line.done && line.success == Some(false) => {
            Err(PipelineError::DeployRejected(line.message))
        }
        Some(line) if line.done => Ok(DeployReceipt {
            status_lines: lines,
            message: line.message,
        }),
        _ => {
            log.line("Server closed the status stream without a final verdict")
                .await;
            Ok(DeployReceipt {
                status_lines: lines,
                message: "accepted".to_string(),
            })
        }
    }
}

fn status_line(raw: &[u8]) -> Option<DeployStatusLine> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(DeployStatusLine::parse(text))
}

fn describe(line: &DeployStatusLine) -> String {
    if line.phase.is_empty() {
        line.message.clone()
    } else {
        format!("[{}] {}", line.phase, line.message)
    }
}
