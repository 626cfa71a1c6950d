pub mod config;
pub mod deploy;
pub mod detect;
pub mod fix;
pub mod init;
pub mod outputs;
pub mod plan;
pub mod run;
pub mod scaffold;

use ai_gateway::Gateway;
use anyhow::Context;
use clap::Args;
use deployloop_core::config::Config;
use deployloop_core::RunDir;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Global flags every command sees.
pub struct Ctx {
    pub root: PathBuf,
    pub run_dir: Option<PathBuf>,
    pub json: bool,
}

impl Ctx {
    /// Config from `.deployloop/config.yaml` with this invocation's flags applied.
    pub fn config(&self, overrides: &Overrides) -> anyhow::Result<Config> {
        let mut config = Config::load(&self.root).context("failed to load config")?;
        overrides.apply(&mut config);
        Ok(config)
    }

    /// The run named by `--run-dir`, else the latest run.
    pub fn existing_run(&self) -> anyhow::Result<RunDir> {
        RunDir::resolve(&self.root, self.run_dir.as_deref()).context("failed to open run directory")
    }

    /// The run named by `--run-dir`, else a fresh one.
    pub fn new_run(&self) -> anyhow::Result<RunDir> {
        RunDir::resolve_or_create(&self.root, self.run_dir.as_deref())
            .context("failed to create run directory")
    }
}

/// Per-invocation overrides of the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Stack name (default: deploy.stack_name, else the project name)
    #[arg(long)]
    pub stack_name: Option<String>,

    /// Cloud region
    #[arg(long)]
    pub region: Option<String>,

    /// AI model as provider/model, e.g. anthropic/claude-sonnet-4-5
    #[arg(long)]
    pub model: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.stack_name {
            config.deploy.stack_name = Some(name.clone());
        }
        if let Some(region) = &self.region {
            config.deploy.region = region.clone();
        }
        if let Some(model) = &self.model {
            config.ai.model = model.clone();
        }
    }
}

/// Build the AI gateway. Precedence for the model: `--model`, then
/// `AI_MODEL`, then `ai.model`.
pub fn gateway(config: &Config, overrides: &Overrides) -> anyhow::Result<Gateway> {
    let flag = overrides.model.clone();
    let lookup = |key: &str| match (key, &flag) {
        ("AI_MODEL", Some(model)) => Some(model.clone()),
        _ => std::env::var(key).ok(),
    };
    let gw_config = config
        .gateway_config(lookup)
        .context("failed to configure AI gateway")?;
    let gateway = Gateway::new(gw_config).context("failed to create AI gateway")?;
    tracing::debug!(model = %gateway.model(), "AI gateway ready");
    Ok(gateway)
}

/// Drive an async stage from the synchronous command layer.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    Ok(rt.block_on(fut))
}

pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::new("orders");
        let overrides = Overrides {
            stack_name: Some("orders-staging".into()),
            region: Some("eu-west-1".into()),
            model: None,
        };
        overrides.apply(&mut config);
        assert_eq!(config.stack_name(), "orders-staging");
        assert_eq!(config.deploy.region, "eu-west-1");
        assert_eq!(config.ai.model, ai_gateway::config::DEFAULT_MODEL);
    }
}
