//! Job log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage a log line originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStage {
    Orchestrator,
    Diff,
    Override,
    Build,
    Deploy,
}

impl LogStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStage::Orchestrator => "orchestrator",
            LogStage::Diff => "diff",
            LogStage::Override => "override",
            LogStage::Build => "build",
            LogStage::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for LogStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended job log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence number, starts at 1 and increases by one per line
    pub seq: u64,

    pub timestamp: DateTime<Utc>,

    pub stage: LogStage,

    pub text: String,
}

impl From<&LogEntry> for jobs_api::LogLine {
    fn from(entry: &LogEntry) -> Self {
        jobs_api::LogLine {
            seq: entry.seq,
            timestamp: entry.timestamp,
            stage: entry.stage.as_str().to_string(),
            text: entry.text.clone(),
        }
    }
}
