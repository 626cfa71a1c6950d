use crate::detect::{ProjectListing, TEMPLATE_FILES};
use crate::error::{LoopError, Result};
use crate::paths;
use crate::run_dir::RunDir;
use crate::runner::{tail, CommandOutput, CommandRunner, ToolCommand};
use crate::strategy;
use crate::types::DeploymentKind;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Largest log excerpt carried inside a `Deployment` error.
const MAX_ERROR_LOG: usize = 10 * 1024;

pub const SAM_CAPABILITIES: [&str; 2] = ["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"];

pub const CLOUDFORMATION_TEMPLATES: &[&str] = &[
    "cloudformation.yaml",
    "cloudformation.yml",
    "stack.yaml",
    "stack.yml",
    "template.yaml",
    "template.yml",
];

// ---------------------------------------------------------------------------
// DeployContext / DeployStep
// ---------------------------------------------------------------------------

/// Everything a strategy needs to plan a deployment.
pub struct DeployContext<'a> {
    pub project_dir: &'a Path,
    pub listing: &'a ProjectListing,
    pub run: &'a RunDir,
    pub stack_name: &'a str,
    pub region: &'a str,
    pub stage: &'a str,
}

#[derive(Debug, Clone)]
pub enum StepAction {
    Run(ToolCommand),
    WriteFile { path: PathBuf, contents: String },
}

#[derive(Debug, Clone)]
pub struct DeployStep {
    pub name: String,
    pub action: StepAction,
}

impl DeployStep {
    fn run(name: impl Into<String>, cmd: ToolCommand) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Run(cmd),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub kind: DeploymentKind,
    pub log_path: PathBuf,
    /// Tool-native outputs file (cdk) when the strategy produces one.
    pub raw_outputs: Option<PathBuf>,
    pub steps: usize,
}

// ---------------------------------------------------------------------------
// Per-kind plans
// ---------------------------------------------------------------------------

/// Dependency install steps for whichever manifests are present.
pub fn install_steps(ctx: &DeployContext) -> Vec<DeployStep> {
    let mut steps = Vec::new();
    if ctx.listing.has("package.json") {
        let cmd = ToolCommand::new("npm", ctx.project_dir);
        let cmd = if ctx.listing.has("package-lock.json") {
            cmd.arg("ci")
        } else {
            cmd.arg("install")
        };
        steps.push(DeployStep::run("install", cmd));
    }
    if ctx.listing.has("requirements.txt") {
        steps.push(DeployStep::run(
            "install",
            ToolCommand::new("pip", ctx.project_dir).args(["install", "-r", "requirements.txt"]),
        ));
    }
    steps
}

fn sam_steps(ctx: &DeployContext, template: &str) -> Vec<DeployStep> {
    vec![
        DeployStep::run(
            "build",
            ToolCommand::new("sam", ctx.project_dir).args(["build", "--template-file", template]),
        ),
        DeployStep::run(
            "deploy",
            ToolCommand::new("sam", ctx.project_dir)
                .args(["deploy", "--stack-name", ctx.stack_name, "--region", ctx.region])
                .arg("--capabilities")
                .args(SAM_CAPABILITIES)
                .args([
                    "--no-fail-on-empty-changeset",
                    "--no-confirm-changeset",
                    "--resolve-s3",
                ]),
        ),
    ]
}

pub fn plan_sam(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let template = ctx
        .listing
        .first_of(TEMPLATE_FILES)
        .ok_or_else(|| plan_error(DeploymentKind::Sam, "no template.yaml or template.yml"))?;
    Ok(sam_steps(ctx, template))
}

/// `npx <tool>` when the project carries a package.json, else the global tool.
fn node_tool(ctx: &DeployContext, tool: &str) -> ToolCommand {
    if ctx.listing.has("package.json") {
        ToolCommand::new("npx", ctx.project_dir).arg(tool)
    } else {
        ToolCommand::new(tool, ctx.project_dir)
    }
}

pub fn plan_cdk(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let outputs_file = ctx.run.raw(paths::CDK_OUTPUTS_JSON);
    let mut steps = install_steps(ctx);
    steps.push(DeployStep::run(
        "synth",
        with_region(node_tool(ctx, "cdk").arg("synth"), ctx.region),
    ));
    steps.push(DeployStep::run(
        "deploy",
        with_region(
            node_tool(ctx, "cdk")
                .args(["deploy", "--all", "--require-approval", "never"])
                .arg("--outputs-file")
                .arg(outputs_file.display().to_string()),
            ctx.region,
        ),
    ));
    Ok(steps)
}

fn with_region(cmd: ToolCommand, region: &str) -> ToolCommand {
    cmd.env("AWS_REGION", region).env("CDK_DEFAULT_REGION", region)
}

pub fn plan_terraform(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let plan_file = ctx.run.raw(paths::TFPLAN).display().to_string();
    let tf = |args: &[&str]| {
        ToolCommand::new("terraform", ctx.project_dir)
            .args(args.iter().copied())
            .env("TF_VAR_stack_name", ctx.stack_name)
            .env("TF_VAR_region", ctx.region)
            .env("AWS_REGION", ctx.region)
    };
    let out_arg = format!("-out={plan_file}");
    Ok(vec![
        DeployStep::run("init", tf(&["init", "-input=false"])),
        DeployStep::run("plan", tf(&["plan", "-input=false", out_arg.as_str()])),
        DeployStep::run(
            "apply",
            tf(&["apply", "-input=false", "-auto-approve", plan_file.as_str()]),
        ),
    ])
}

pub fn plan_serverless(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let mut steps = install_steps(ctx);
    steps.push(DeployStep::run(
        "deploy",
        ToolCommand::new("npx", ctx.project_dir).args([
            "serverless",
            "deploy",
            "--stage",
            ctx.stage,
            "--region",
            ctx.region,
        ]),
    ));
    Ok(steps)
}

pub fn plan_cloudformation(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let template = ctx.listing.first_of(CLOUDFORMATION_TEMPLATES).ok_or_else(|| {
        plan_error(
            DeploymentKind::Cloudformation,
            "no CloudFormation template found",
        )
    })?;
    Ok(vec![DeployStep::run(
        "deploy",
        ToolCommand::new("aws", ctx.project_dir)
            .args(["cloudformation", "deploy", "--template-file", template])
            .args(["--stack-name", ctx.stack_name, "--region", ctx.region])
            .arg("--capabilities")
            .args(SAM_CAPABILITIES)
            .arg("--no-fail-on-empty-changeset"),
    )])
}

pub fn plan_lambda(ctx: &DeployContext) -> Result<Vec<DeployStep>> {
    let template_path = ctx.run.raw(paths::LAMBDA_TEMPLATE);
    let mut steps = install_steps(ctx);
    steps.push(DeployStep {
        name: "template".to_string(),
        action: StepAction::WriteFile {
            path: template_path.clone(),
            contents: lambda_template(ctx.project_dir, ctx.stack_name),
        },
    });
    steps.extend(sam_steps(ctx, &template_path.display().to_string()));
    Ok(steps)
}

/// SAM template wrapping a bare `index.handler` behind a catch-all HTTP API.
pub fn lambda_template(code_dir: &Path, stack_name: &str) -> String {
    format!(
        r#"AWSTemplateFormatVersion: '2010-09-09'
Transform: AWS::Serverless-2016-10-31
Description: {stack_name} (generated by deployloop)

Resources:
  ApiFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: {code}
      Handler: index.handler
      Runtime: nodejs20.x
      MemorySize: 256
      Timeout: 30
      Events:
        Root:
          Type: HttpApi
          Properties:
            Path: /
            Method: ANY
        Proxy:
          Type: HttpApi
          Properties:
            Path: /{{proxy+}}
            Method: ANY

Outputs:
  ApiUrl:
    Description: HTTP API endpoint
    Value: !Sub "https://${{ServerlessHttpApi}}.execute-api.${{AWS::Region}}.amazonaws.com"
"#,
        code = code_dir.display()
    )
}

fn plan_error(kind: DeploymentKind, message: &str) -> LoopError {
    LoopError::Deployment {
        kind,
        step: "plan".to_string(),
        log: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct DeployExecutor<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> DeployExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Plan and run the sequence for `kind`, failing fast. `deploy.log` is
    /// rewritten after every step so it survives a failure midway.
    pub fn deploy(&self, kind: DeploymentKind, ctx: &DeployContext) -> Result<DeployOutcome> {
        let log_path = ctx.run.file(paths::DEPLOY_LOG);
        let mut log = String::new();
        let _ = writeln!(
            log,
            "# deployloop deploy: kind={kind} stack={} region={}",
            ctx.stack_name, ctx.region
        );

        let fail = |log: &mut String, step: &str, message: &str| -> LoopError {
            let _ = writeln!(log, "!! {message}");
            if let Err(e) = ctx.run.write_text(paths::DEPLOY_LOG, log) {
                tracing::warn!(path = %log_path.display(), error = %e, "could not write deploy log");
            }
            LoopError::Deployment {
                kind,
                step: step.to_string(),
                log: tail(log, MAX_ERROR_LOG).to_string(),
            }
        };

        let Some(strategy) = strategy::strategy_for(kind) else {
            return Err(fail(&mut log, "detect", "deployment kind is unknown; nothing to deploy"));
        };
        if ctx.stack_name.trim().is_empty() {
            return Err(fail(&mut log, "plan", "stack name is empty"));
        }

        let steps = match (strategy.plan)(ctx) {
            Ok(s) => s,
            Err(LoopError::Deployment { step, log: msg, .. }) => {
                return Err(fail(&mut log, &step, &msg));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(kind = %kind, stack = ctx.stack_name, steps = steps.len(), "deploying");
        for step in &steps {
            match &step.action {
                StepAction::WriteFile { path, contents } => {
                    if let Err(e) = crate::io::atomic_write(path, contents.as_bytes()) {
                        let message = format!("failed to write {}: {e}", path.display());
                        return Err(fail(&mut log, &step.name, &message));
                    }
                    let _ = writeln!(log, "\n==> [{}] wrote {}", step.name, path.display());
                }
                StepAction::Run(cmd) => {
                    let _ = writeln!(log, "\n==> [{}] {cmd}", step.name);
                    let started = Instant::now();
                    let output = match self.runner.run(cmd, self.timeout) {
                        Ok(o) => o,
                        Err(e) => return Err(fail(&mut log, &step.name, &e.to_string())),
                    };
                    append_output(&mut log, &output, started.elapsed());
                    ctx.run.write_text(paths::DEPLOY_LOG, &log)?;

                    if !output.success() {
                        tracing::warn!(kind = %kind, step = %step.name, exit = ?output.exit_code, "deploy step failed");
                        let reason = if output.timed_out {
                            format!("step '{}' timed out", step.name)
                        } else {
                            format!("step '{}' exited with {:?}", step.name, output.exit_code)
                        };
                        return Err(fail(&mut log, &step.name, &reason));
                    }
                    tracing::debug!(kind = %kind, step = %step.name, "deploy step ok");
                }
            }
        }

        let _ = writeln!(log, "\n# deploy succeeded");
        ctx.run.write_text(paths::DEPLOY_LOG, &log)?;

        let raw_outputs = (kind == DeploymentKind::Cdk)
            .then(|| ctx.run.raw(paths::CDK_OUTPUTS_JSON))
            .filter(|p| p.exists());

        tracing::info!(kind = %kind, stack = ctx.stack_name, "deploy succeeded");
        Ok(DeployOutcome {
            kind,
            log_path,
            raw_outputs,
            steps: steps.len(),
        })
    }
}

fn append_output(log: &mut String, output: &CommandOutput, elapsed: Duration) {
    let exit = match (output.timed_out, output.exit_code) {
        (true, _) => "timeout".to_string(),
        (false, Some(code)) => code.to_string(),
        (false, None) => "signal".to_string(),
    };
    let _ = writeln!(log, "exit: {exit} ({:.1}s)", elapsed.as_secs_f64());
    if !output.stdout.trim().is_empty() {
        let _ = writeln!(log, "--- stdout ---\n{}", output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        let _ = writeln!(log, "--- stderr ---\n{}", output.stderr.trim_end());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
