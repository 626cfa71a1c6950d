use crate::error::{LoopError, Result};
use crate::types::DeploymentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const SAM_TRANSFORM_MARKER: &str = "AWS::Serverless";

// ---------------------------------------------------------------------------
// ProjectListing
// ---------------------------------------------------------------------------

/// Top-level file names of a project checkout plus on-demand content reads.
pub struct ProjectListing {
    root: PathBuf,
    files: BTreeSet<String>,
}

impl ProjectListing {
    pub fn scan(root: &Path) -> Result<Self> {
        let mut files = BTreeSet::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    pub fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has(n))
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        let suffix = format!(".{ext}");
        self.files.iter().any(|f| f.ends_with(&suffix))
    }

    /// First of `names` that exists, in the given order.
    pub fn first_of<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        names.iter().copied().find(|n| self.has(n))
    }

    pub fn contains_text(&self, name: &str, needle: &str) -> bool {
        self.has(name)
            && std::fs::read_to_string(self.root.join(name))
                .map(|c| c.contains(needle))
                .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub const TEMPLATE_FILES: &[&str] = &["template.yaml", "template.yml"];

/// One detection rule: a pure predicate over the listing.
pub struct DetectionRule {
    pub id: &'static str,
    pub condition: fn(&ProjectListing) -> bool,
    pub kind: DeploymentKind,
}

/// The ordered rule chain. First match wins; order encodes priority when
/// several marker files coexist.
pub fn default_rules() -> Vec<DetectionRule> {
    vec![
        DetectionRule {
            id: "sam_template",
            condition: |l| {
                TEMPLATE_FILES
                    .iter()
                    .any(|t| l.contains_text(t, SAM_TRANSFORM_MARKER))
            },
            kind: DeploymentKind::Sam,
        },
        DetectionRule {
            id: "cdk_json",
            condition: |l| l.has("cdk.json"),
            kind: DeploymentKind::Cdk,
        },
        DetectionRule {
            id: "serverless_yml",
            condition: |l| l.has_any(&["serverless.yml", "serverless.yaml"]),
            kind: DeploymentKind::Serverless,
        },
        DetectionRule {
            id: "terraform_files",
            condition: |l| l.has_extension("tf"),
            kind: DeploymentKind::Terraform,
        },
        DetectionRule {
            id: "cloudformation_template",
            condition: |l| {
                l.has_any(&[
                    "cloudformation.yaml",
                    "cloudformation.yml",
                    "stack.yaml",
                    "stack.yml",
                ])
            },
            kind: DeploymentKind::Cloudformation,
        },
        DetectionRule {
            id: "bare_lambda",
            condition: |l| {
                l.has_any(&["index.js", "index.ts"]) && l.has("package.json") && !l.has("cdk.json")
            },
            kind: DeploymentKind::Lambda,
        },
        // Reached only when no earlier marker exists; a plain template.yaml
        // without the SAM transform.
        DetectionRule {
            id: "plain_template",
            condition: |l| l.has_any(TEMPLATE_FILES),
            kind: DeploymentKind::Cloudformation,
        },
    ]
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub kind: DeploymentKind,
    pub rule: String,
    pub root: String,
}

pub struct Detector {
    rules: Vec<DetectionRule>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Detector {
    pub fn new(rules: Vec<DetectionRule>) -> Self {
        Self { rules }
    }

    pub fn detect(&self, listing: &ProjectListing) -> Result<Detection> {
        for rule in &self.rules {
            if (rule.condition)(listing) {
                tracing::debug!(rule = rule.id, kind = %rule.kind, "detection rule matched");
                return Ok(Detection {
                    kind: rule.kind,
                    rule: rule.id.to_string(),
                    root: listing.root().display().to_string(),
                });
            }
        }
        Err(LoopError::Detection(listing.root().display().to_string()))
    }
}

/// Scan `root` and classify it with the default rule chain.
pub fn detect(root: &Path) -> Result<DeploymentKind> {
    let listing = ProjectListing::scan(root)?;
    Detector::default().detect(&listing).map(|d| d.kind)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    const SAM_TEMPLATE: &str =
        "AWSTemplateFormatVersion: '2010-09-09'\nTransform: AWS::Serverless-2016-10-31\n";
    const PLAIN_TEMPLATE: &str = "AWSTemplateFormatVersion: '2010-09-09'\nResources: {}\n";

    #[test]
    fn sam_transform_wins_over_cloudformation() {
        let dir = project(&[("template.yaml", SAM_TEMPLATE), ("stack.yaml", "")]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Sam);
    }

    #[test]
    fn sam_yml_extension() {
        let dir = project(&[("template.yml", SAM_TEMPLATE)]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Sam);
    }

    #[test]
    fn cdk_checked_before_terraform() {
        let dir = project(&[("cdk.json", "{}"), ("main.tf", "")]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Cdk);
    }

    #[test]
    fn serverless_before_terraform() {
        let dir = project(&[("serverless.yml", "service: x"), ("main.tf", "")]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Serverless);
    }

    #[test]
    fn terraform_by_extension() {
        let dir = project(&[("variables.tf", ""), ("README.md", "")]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Terraform);
    }

    #[test]
    fn cloudformation_named_templates() {
        for name in ["cloudformation.yaml", "cloudformation.yml", "stack.yaml", "stack.yml"] {
            let dir = project(&[(name, PLAIN_TEMPLATE)]);
            assert_eq!(
                detect(dir.path()).unwrap(),
                DeploymentKind::Cloudformation,
                "{name}"
            );
        }
    }

    #[test]
    fn bare_lambda_needs_package_json() {
        let dir = project(&[("index.js", ""), ("package.json", "{}")]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Lambda);

        let dir = project(&[("index.ts", "")]);
        assert!(matches!(detect(dir.path()), Err(LoopError::Detection(_))));
    }

    #[test]
    fn bare_lambda_beats_plain_template() {
        let dir = project(&[
            ("index.js", ""),
            ("package.json", "{}"),
            ("template.yaml", PLAIN_TEMPLATE),
        ]);
        assert_eq!(detect(dir.path()).unwrap(), DeploymentKind::Lambda);
    }

    #[test]
    fn plain_template_is_cloudformation() {
        let dir = project(&[("template.yaml", PLAIN_TEMPLATE)]);
        let listing = ProjectListing::scan(dir.path()).unwrap();
        let detection = Detector::default().detect(&listing).unwrap();
        assert_eq!(detection.kind, DeploymentKind::Cloudformation);
        assert_eq!(detection.rule, "plain_template");
    }

    #[test]
    fn empty_directory_is_unknown() {
        let dir = project(&[("README.md", "# hi")]);
        let err = detect(dir.path()).unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn subdirectories_are_ignored() {
        let dir = project(&[]);
        std::fs::create_dir_all(dir.path().join("infra")).unwrap();
        std::fs::write(dir.path().join("infra/main.tf"), "").unwrap();
        assert!(detect(dir.path()).is_err());
    }

    #[test]
    fn detection_is_stable() {
        let dir = project(&[("cdk.json", "{}"), ("main.tf", ""), ("index.js", "")]);
        let first = detect(dir.path()).unwrap();
        let second = detect(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
