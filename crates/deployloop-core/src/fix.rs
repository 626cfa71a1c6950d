use crate::config::Config;
use crate::context::{truncate_chars, CodeContext};
use crate::error::{LoopError, Result};
use crate::paths;
use crate::run_dir::RunDir;
use crate::types::FailureStage;
use ai_gateway::{extract_patch, GenerateRequest, TextGenerator};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Most recent log lines are the informative ones; keep the tail.
const MAX_LOG_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are a senior engineer fixing a failed deployment pipeline. \
You answer with a minimal unified diff (git format) and nothing else.";

#[derive(Debug, Clone, Serialize)]
pub struct FixPatch {
    pub stage: FailureStage,
    /// Short SHA-256 of `diff`.
    pub id: String,
    pub diff: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FixOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&Config> for FixOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_tokens: cfg.ai.max_tokens,
            temperature: cfg.ai.temperature,
        }
    }
}

pub fn log_artifact(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Deploy => paths::DEPLOY_LOG,
        FailureStage::Test => paths::TEST_LOG,
    }
}

/// The failing stage's log. Missing or blank is `NoLogs`.
pub fn read_failure_log(run: &RunDir, stage: FailureStage) -> Result<String> {
    let name = log_artifact(stage);
    match run.read_text(name)? {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LoopError::NoLogs(run.file(name).display().to_string())),
    }
}

pub struct FixGenerator<'a, G> {
    generator: &'a G,
    options: FixOptions,
}

impl<'a, G: TextGenerator> FixGenerator<'a, G> {
    pub fn new(generator: &'a G, options: FixOptions) -> Self {
        Self { generator, options }
    }

    pub async fn generate_fix(
        &self,
        error_logs: &str,
        context: &CodeContext,
        stage: FailureStage,
    ) -> Result<FixPatch> {
        if error_logs.trim().is_empty() {
            return Err(LoopError::NoLogs(format!("{stage} log is empty")));
        }
        let req = GenerateRequest::new(build_prompt(error_logs, context, stage))
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.options.max_tokens)
            .with_temperature(self.options.temperature);

        tracing::info!(stage = %stage, generator = %self.generator.describe(), "generating fix");
        let text = self.generator.generate(req).await?;
        let diff = extract_patch(&text)?;
        let patch = FixPatch {
            stage,
            id: patch_identity(&diff),
            files: patched_files(&diff),
            diff,
        };
        tracing::info!(stage = %stage, patch = %patch.id, files = patch.files.len(), "fix generated");
        Ok(patch)
    }
}

pub fn build_prompt(error_logs: &str, context: &CodeContext, stage: FailureStage) -> String {
    let log_tail = log_tail(error_logs, MAX_LOG_CHARS);
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "The {stage} stage of this project's pipeline failed. Produce the smallest change that fixes \
         the observed error.\n"
    );
    prompt.push_str(
        "Rules:\n\
         - Output a unified diff only (`diff --git a/... b/...` headers, `---`/`+++` lines, `@@` hunks).\n\
         - Touch only what is needed to address the error in the log. No refactors, no formatting changes.\n\
         - Paths are relative to the project root.\n\
         - Do not add explanations before or after the diff.\n\n",
    );
    let _ = writeln!(prompt, "## {stage} log (tail)\n```\n{}\n```\n", log_tail.trim_end());
    prompt.push_str("## Project files\n\n");
    prompt.push_str(&context.render());
    prompt
}

fn log_tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[start..]
}

/// First 12 hex chars of the SHA-256 of the patch text.
pub fn patch_identity(diff: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    truncate_chars(&hex, 12).0.to_string()
}

/// Files named in `+++ b/<path>` headers, in order.
pub fn patched_files(diff: &str) -> Vec<String> {
    diff.lines()
        .filter_map(|l| l.strip_prefix("+++ "))
        .map(|p| p.trim())
        .filter(|p| *p != "/dev/null")
        .map(|p| p.strip_prefix("b/").unwrap_or(p).to_string())
        .collect()
}
