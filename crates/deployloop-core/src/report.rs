use crate::error::Result;
use crate::io;
use crate::run_dir::RunDir;
use crate::types::{DeploymentKind, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one stage, persisted as `reports/<stage>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeploymentKind>,
    pub timestamp: DateTime<Utc>,
}

impl StageReport {
    pub fn passed(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, true, message.into())
    }

    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, false, message.into())
    }

    fn new(stage: Stage, success: bool, message: String) -> Self {
        Self {
            stage,
            success,
            message,
            artifacts: Vec::new(),
            kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_artifact(mut self, path: &Path) -> Self {
        self.artifacts.push(path.display().to_string());
        self
    }

    pub fn with_kind(mut self, kind: DeploymentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn write(&self, run: &RunDir) -> Result<PathBuf> {
        let path = run.report(self.stage.as_str());
        io::write_json(&path, self)?;
        Ok(path)
    }

    /// One line for the tracking hand-off, e.g.
    /// `✓ deploy [sam]: stack orders deployed (deploy.log)`.
    pub fn line(&self) -> String {
        let mark = if self.success { '✓' } else { '✗' };
        let mut out = format!("{mark} {}", self.stage);
        if let Some(kind) = self.kind {
            out.push_str(&format!(" [{kind}]"));
        }
        out.push_str(": ");
        out.push_str(first_line(&self.message));
        if !self.artifacts.is_empty() {
            let names: Vec<&str> = self.artifacts.iter().map(|a| short_name(a)).collect();
            out.push_str(&format!(" ({})", names.join(", ")));
        }
        out
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("").trim()
}

fn short_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
