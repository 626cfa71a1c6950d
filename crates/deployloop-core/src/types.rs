use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DeploymentKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    Sam,
    Cdk,
    Terraform,
    Serverless,
    Cloudformation,
    Lambda,
    Unknown,
}

impl DeploymentKind {
    pub fn all() -> &'static [DeploymentKind] {
        &[
            DeploymentKind::Sam,
            DeploymentKind::Cdk,
            DeploymentKind::Terraform,
            DeploymentKind::Serverless,
            DeploymentKind::Cloudformation,
            DeploymentKind::Lambda,
            DeploymentKind::Unknown,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentKind::Sam => "sam",
            DeploymentKind::Cdk => "cdk",
            DeploymentKind::Terraform => "terraform",
            DeploymentKind::Serverless => "serverless",
            DeploymentKind::Cloudformation => "cloudformation",
            DeploymentKind::Lambda => "lambda",
            DeploymentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown deployment kind '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Deploy,
    Outputs,
    Plan,
    Test,
    Fix,
    Scaffold,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Deploy => "deploy",
            Stage::Outputs => "outputs",
            Stage::Plan => "plan",
            Stage::Test => "test",
            Stage::Fix => "fix",
            Stage::Scaffold => "scaffold",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FailureStage
// ---------------------------------------------------------------------------

/// The stage whose failure the fix generator is asked to remediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Deploy,
    Test,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStage::Deploy => "deploy",
            FailureStage::Test => "test",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(FailureStage::Deploy),
            "test" => Ok(FailureStage::Test),
            _ => Err(format!("unknown failure stage '{s}' (expected deploy or test)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_string_roundtrip() {
        for kind in DeploymentKind::all() {
            let parsed: DeploymentKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
        assert!("pulumi".parse::<DeploymentKind>().is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&DeploymentKind::Cloudformation).unwrap();
        assert_eq!(json, "\"cloudformation\"");
    }

    #[test]
    fn failure_stage_parses() {
        assert_eq!("deploy".parse::<FailureStage>().unwrap(), FailureStage::Deploy);
        assert!("plan".parse::<FailureStage>().is_err());
    }
}
