use crate::error::{LoopError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DEPLOYLOOP_DIR: &str = ".deployloop";
pub const CONFIG_FILE: &str = ".deployloop/config.yaml";
pub const RUNS_DIR: &str = ".deployloop/runs";
pub const LATEST_FILE: &str = "LATEST";

// ---------------------------------------------------------------------------
// Artifact names inside a run directory
// ---------------------------------------------------------------------------

pub const DETECTION_JSON: &str = "detection.json";
pub const DEPLOY_LOG: &str = "deploy.log";
pub const RAW_DIR: &str = "raw";
pub const CDK_OUTPUTS_JSON: &str = "cdk-outputs.json";
pub const TFPLAN: &str = "tfplan";
pub const LAMBDA_TEMPLATE: &str = "lambda-template.yaml";
pub const OUTPUTS_JSON: &str = "outputs.json";
pub const TEST_PLAN_JSON: &str = "test-plan.json";
pub const TEST_RESULTS_JSON: &str = "test-results.json";
pub const TEST_LOG: &str = "test.log";
pub const FIX_PATCH: &str = "fix.patch";
pub const REPORTS_DIR: &str = "reports";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn deployloop_dir(root: &Path) -> PathBuf {
    root.join(DEPLOYLOOP_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn run_path(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(run_id)
}

pub fn latest_pointer(root: &Path) -> PathBuf {
    runs_dir(root).join(LATEST_FILE)
}

// ---------------------------------------------------------------------------
// Run id validation
// ---------------------------------------------------------------------------

static RUN_ID_RE: OnceLock<Regex> = OnceLock::new();

fn run_id_re() -> &'static Regex {
    RUN_ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("run id pattern is valid")
    })
}

/// Run ids become directory names; reject anything that could escape `runs/`.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || id.contains("..") || !run_id_re().is_match(id) {
        return Err(LoopError::InvalidRunId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_run_ids() {
        for id in ["20250101-120000-ab12cd34", "a", "manual_1", "v1.2"] {
            validate_run_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_run_ids() {
        for id in ["", "../etc", "a/b", ".hidden", "has space", "x..y"] {
            assert!(validate_run_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.deployloop/config.yaml")
        );
        assert_eq!(
            run_path(root, "r1"),
            PathBuf::from("/tmp/proj/.deployloop/runs/r1")
        );
        assert_eq!(
            latest_pointer(root),
            PathBuf::from("/tmp/proj/.deployloop/runs/LATEST")
        );
    }
}
