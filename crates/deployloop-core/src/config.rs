use crate::error::Result;
use crate::paths;
use ai_gateway::{GatewayConfig, ModelId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Falls back to the project name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Serverless Framework stage.
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_stage() -> String {
    "dev".to_string()
}

fn default_timeout_minutes() -> u64 {
    30
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            stack_name: None,
            region: default_region(),
            stage: default_stage(),
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

// ---------------------------------------------------------------------------
// AiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model() -> String {
    ai_gateway::config::DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_ai_timeout_secs() -> u64 {
    ai_gateway::config::DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    ai_gateway::config::DEFAULT_MAX_RETRIES
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_ai_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// TestingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_suites")]
    pub max_suites: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps_per_suite: usize,
}

fn default_step_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_suites() -> usize {
    5
}

fn default_max_steps() -> usize {
    5
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: default_step_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_suites: default_max_suites(),
            max_steps_per_suite: default_max_steps(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,
}

fn default_max_file_chars() -> usize {
    4_000
}

fn default_max_total_chars() -> usize {
    30_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_file_chars: default_max_file_chars(),
            max_total_chars: default_max_total_chars(),
        }
    }
}

// ---------------------------------------------------------------------------
// FixConfig / ScaffoldConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FixConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaffoldConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_files() -> usize {
    25
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub testing: TestingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub fix: FixConfig,
    #[serde(default)]
    pub scaffold: ScaffoldConfig,
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            ..Default::default()
        }
    }

    /// Load `.deployloop/config.yaml`, or defaults when the file is absent.
    /// An empty project name is filled from the directory name.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        let mut cfg: Config = match crate::io::read_optional(&path)? {
            Some(data) if !data.trim().is_empty() => serde_yaml::from_str(&data)?,
            _ => Config::default(),
        };
        if cfg.project.name.trim().is_empty() {
            cfg.project.name = dir_name(root);
        }
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Explicit stack name, else the sanitized project name.
    pub fn stack_name(&self) -> String {
        match &self.deploy.stack_name {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => sanitize_stack_name(&self.project.name),
        }
    }

    /// Build the gateway config. `AI_MODEL` in `lookup` overrides `ai.model`;
    /// credentials come from `lookup` too.
    pub fn gateway_config(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ai_gateway::Result<GatewayConfig> {
        let model = lookup("AI_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.ai.model.clone());
        let mut gw = GatewayConfig::from_lookup(model, lookup)?;
        gw.timeout = Duration::from_secs(self.ai.timeout_secs);
        gw.max_retries = self.ai.max_retries;
        Ok(gw)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Err(e) = self.ai.model.parse::<ModelId>() {
            warnings.push(ConfigWarning::error(format!("ai.model: {e}")));
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            warnings.push(ConfigWarning::warning(format!(
                "ai.temperature={} is outside 0.0..=2.0",
                self.ai.temperature
            )));
        }

        if self.ai.max_tokens == 0 {
            warnings.push(ConfigWarning::error("ai.max_tokens must be greater than 0"));
        }

        for (name, value) in [
            ("ai.timeout_secs", self.ai.timeout_secs),
            ("deploy.timeout_minutes", self.deploy.timeout_minutes),
            ("testing.request_timeout_secs", self.testing.request_timeout_secs),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning::error(format!("{name} must be greater than 0")));
            }
        }

        if self.ai.max_retries > 10 {
            warnings.push(ConfigWarning::warning(format!(
                "ai.max_retries={} (>10 is unusual)",
                self.ai.max_retries
            )));
        }

        if self.testing.max_suites == 0 || self.testing.max_steps_per_suite == 0 {
            warnings.push(ConfigWarning::error(
                "testing.max_suites and testing.max_steps_per_suite must be at least 1",
            ));
        }

        if self.context.max_file_chars > self.context.max_total_chars {
            warnings.push(ConfigWarning::warning(format!(
                "context.max_file_chars ({}) exceeds context.max_total_chars ({})",
                self.context.max_file_chars, self.context.max_total_chars
            )));
        }

        if self.deploy.region.trim().is_empty() {
            warnings.push(ConfigWarning::error("deploy.region is empty"));
        }

        if self.stack_name().is_empty() {
            warnings.push(ConfigWarning::warning(
                "no stack name: set deploy.stack_name or project.name",
            ));
        }

        warnings
    }
}

fn dir_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// CloudFormation stack names: letters, digits and hyphens, starting with a
/// letter.
pub fn sanitize_stack_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    let trimmed = trimmed.trim_start_matches(|c: char| c.is_ascii_digit() || c == '-');
    trimmed.chars().take(128).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("orders-api");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "orders-api");
        assert_eq!(parsed.deploy.region, "us-east-1");
        assert_eq!(parsed.testing.step_delay_ms, 1000);
        assert!(parsed.fix.enabled);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "deploy:\n  region: eu-west-1\nai:\n  model: openai/gpt-4o\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.deploy.region, "eu-west-1");
        assert_eq!(cfg.deploy.timeout_minutes, 30);
        assert_eq!(cfg.ai.model, "openai/gpt-4o");
        assert_eq!(cfg.ai.max_tokens, 4096);
        assert_eq!(cfg.context.max_file_chars, 4000);
        assert_eq!(cfg.scaffold.max_files, 25);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert!(!cfg.project.name.is_empty());
        assert_eq!(cfg.testing.request_timeout_secs, 30);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("svc");
        cfg.deploy.stack_name = Some("svc-prod".into());
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.stack_name(), "svc-prod");
    }

    #[test]
    fn stack_name_sanitized_from_project() {
        let cfg = Config::new("My Cool_API v2");
        assert_eq!(cfg.stack_name(), "My-Cool-API-v2");
        assert_eq!(sanitize_stack_name("123-abc"), "abc");
        assert_eq!(sanitize_stack_name("--"), "");
    }

    #[test]
    fn validate_default_no_warnings() {
        assert!(Config::new("x").validate().is_empty());
    }

    #[test]
    fn validate_unknown_provider() {
        let mut cfg = Config::new("x");
        cfg.ai.model = "mistral/large".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Error);
        assert!(warnings[0].message.contains("ai.model"));
    }

    #[test]
    fn validate_zero_timeouts_and_temperature() {
        let mut cfg = Config::new("x");
        cfg.ai.timeout_secs = 0;
        cfg.testing.request_timeout_secs = 0;
        cfg.ai.temperature = 3.5;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("ai.timeout_secs")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("testing.request_timeout_secs")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("temperature")));
    }

    #[test]
    fn gateway_config_env_model_override() {
        let cfg = Config::new("x");
        let gw = cfg
            .gateway_config(|k| match k {
                "AI_MODEL" => Some("openai/gpt-4o-mini".into()),
                "OPENAI_API_KEY" => Some("sk-test".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(gw.model, "openai/gpt-4o-mini");
        assert_eq!(gw.api_key.as_deref(), Some("sk-test"));
        assert_eq!(gw.timeout, Duration::from_secs(120));
    }
}
