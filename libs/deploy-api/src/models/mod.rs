//! Deploy endpoint models

use serde::{Deserialize, Serialize};

/// Path the archive is uploaded to on the application server
pub const DEPLOY_PATH: &str = "/deploy";

/// Header carrying the archive version
pub const VERSION_HEADER: &str = "X-Jarsmith-Version";

/// Header carrying the job id
pub const JOB_HEADER: &str = "X-Jarsmith-Job";

/// Header carrying the archive digest
pub const DIGEST_HEADER: &str = "X-Jarsmith-Digest";

/// One newline-delimited status line streamed back by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStatusLine {
    /// Server-side phase, e.g. `upload`, `unpack`, `activate`
    #[serde(default)]
    pub phase: String,

    pub message: String,

    /// Last line of the stream
    #[serde(default)]
    pub done: bool,

    /// Final verdict, present when `done` is set
    #[serde(default)]
    pub success: Option<bool>,
}

impl DeployStatusLine {
    /// Parse a line, falling back to a plain-text message
    pub fn parse(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| Self {
            phase: String::new(),
            message: line.to_string(),
            done: false,
            success: None,
        })
    }
}

/// Body returned when the server refuses an archive outright
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRejection {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_line() {
        let line = DeployStatusLine::parse(
            r#"{"phase":"activate","message":"ok","done":true,"success":true}"#,
        );
        assert_eq!(line.phase, "activate");
        assert!(line.done);
        assert_eq!(line.success, Some(true));
    }

    #[test]
    fn test_parse_plain_line() {
        let line = DeployStatusLine::parse("unpacking 12 files");
        assert_eq!(line.message, "unpacking 12 files");
        assert!(!line.done);
    }
}
