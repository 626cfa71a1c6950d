//! Stage drivers and the deploy→test→fix loop.
//!
//! Each stage reads its predecessor's artifact from the [`RunDir`], writes
//! its own, and records a [`StageReport`] whether it succeeds or fails. The
//! loop in [`run_loop`] is only a sequence of those stage calls:
//!
//! ```text
//! detect ─► deploy ─► outputs ─► plan ─► test
//!              │                          │
//!              └── failure ──► fix ◄── failing steps
//! ```

use crate::config::Config;
use crate::context::{api_context, fix_context};
use crate::deploy::{DeployContext, DeployExecutor, DeployOutcome};
use crate::detect::{Detection, Detector, ProjectListing};
use crate::engine::{EngineOptions, RunSummary, TestEngine};
use crate::error::{LoopError, Result};
use crate::fix::{read_failure_log, FixGenerator, FixOptions, FixPatch};
use crate::outputs::{extract_outputs, resolve_api_url, OutputsContext, StackOutputs};
use crate::paths;
use crate::plan::TestPlan;
use crate::report::StageReport;
use crate::run_dir::RunDir;
use crate::runner::CommandRunner;
use crate::synth::{SynthesisOptions, Synthesizer};
use crate::types::{DeploymentKind, FailureStage, Stage};
use ai_gateway::TextGenerator;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Budget for the stack-output query subprocess.
const OUTPUTS_TIMEOUT: Duration = Duration::from_secs(120);

/// What every stage needs: the project, its effective config, the run
/// directory, and a sink for stage reports.
pub struct StageEnv<'a> {
    pub root: &'a Path,
    pub config: &'a Config,
    pub run: &'a RunDir,
    reporter: &'a dyn Fn(&StageReport),
}

impl<'a> StageEnv<'a> {
    pub fn new(root: &'a Path, config: &'a Config, run: &'a RunDir) -> Self {
        Self {
            root,
            config,
            run,
            reporter: &ignore_report,
        }
    }

    /// Called with every report after it is written.
    pub fn with_reporter(mut self, reporter: &'a dyn Fn(&StageReport)) -> Self {
        self.reporter = reporter;
        self
    }

    fn record(&self, report: StageReport) {
        if let Err(e) = report.write(self.run) {
            tracing::warn!(stage = %report.stage, error = %e, "failed to write stage report");
        }
        (self.reporter)(&report);
    }

    /// Record a failure report for `err` and hand the error back.
    fn fail(&self, stage: Stage, kind: Option<DeploymentKind>, err: LoopError) -> LoopError {
        let mut report = StageReport::failed(stage, err.to_string());
        if let Some(kind) = kind {
            report = report.with_kind(kind);
        }
        if matches!(err, LoopError::Deployment { .. }) {
            report = report.with_artifact(&self.run.file(paths::DEPLOY_LOG));
        }
        self.record(report);
        err
    }

    fn detection(&self) -> Result<Detection> {
        self.run.read_json(paths::DETECTION_JSON)
    }
}

fn ignore_report(_: &StageReport) {}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

pub fn detect_stage(env: &StageEnv) -> Result<Detection> {
    let detection = ProjectListing::scan(env.root).and_then(|l| Detector::default().detect(&l));
    let detection = match detection {
        Ok(d) => d,
        Err(e) => return Err(env.fail(Stage::Detect, Some(DeploymentKind::Unknown), e)),
    };
    let path = env.run.write_json(paths::DETECTION_JSON, &detection)?;
    tracing::info!(kind = %detection.kind, rule = %detection.rule, "deployment kind detected");
    env.record(
        StageReport::passed(Stage::Detect, format!("matched rule {}", detection.rule))
            .with_kind(detection.kind)
            .with_artifact(&path),
    );
    Ok(detection)
}

pub fn deploy_stage(env: &StageEnv, runner: &dyn CommandRunner) -> Result<DeployOutcome> {
    let detection = env.detection()?;
    let kind = detection.kind;
    let listing = ProjectListing::scan(env.root)?;
    let stack_name = env.config.stack_name();
    let ctx = DeployContext {
        project_dir: env.root,
        listing: &listing,
        run: env.run,
        stack_name: &stack_name,
        region: &env.config.deploy.region,
        stage: &env.config.deploy.stage,
    };
    let outcome = DeployExecutor::new(runner, env.config.deploy.timeout())
        .deploy(kind, &ctx)
        .map_err(|e| env.fail(Stage::Deploy, Some(kind), e))?;

    let mut report = StageReport::passed(
        Stage::Deploy,
        format!("stack {stack_name} deployed ({} steps)", outcome.steps),
    )
    .with_kind(kind)
    .with_artifact(&outcome.log_path);
    if let Some(raw) = &outcome.raw_outputs {
        report = report.with_artifact(raw);
    }
    env.record(report);
    Ok(outcome)
}

pub fn outputs_stage(env: &StageEnv, runner: &dyn CommandRunner) -> Result<StackOutputs> {
    let kind = env.detection()?.kind;
    let stack_name = env.config.stack_name();
    let ctx = OutputsContext {
        kind,
        project_dir: env.root,
        run: env.run,
        stack_name: &stack_name,
        region: &env.config.deploy.region,
        stage: &env.config.deploy.stage,
        runner,
        timeout: OUTPUTS_TIMEOUT,
    };
    let outputs = extract_outputs(&ctx).map_err(|e| env.fail(Stage::Outputs, Some(kind), e))?;
    // outputs.json stays on disk even when no endpoint resolves.
    let api_url =
        resolve_api_url(&outputs).map_err(|e| env.fail(Stage::Outputs, Some(kind), e))?;
    env.record(
        StageReport::passed(
            Stage::Outputs,
            format!("{} outputs, endpoint {api_url}", outputs.len()),
        )
            .with_kind(kind)
            .with_artifact(&env.run.file(paths::OUTPUTS_JSON)),
    );
    Ok(outputs)
}

pub async fn plan_stage<G: TextGenerator>(env: &StageEnv<'_>, generator: &G) -> Result<TestPlan> {
    let outputs: StackOutputs = env.run.read_json(paths::OUTPUTS_JSON)?;
    let plan = async {
        let api_url = resolve_api_url(&outputs)?;
        let context = api_context(env.root, &env.config.context)?;
        Synthesizer::new(generator, SynthesisOptions::from(env.config))
            .synthesize(&api_url, &context)
            .await
    }
    .await
    .map_err(|e| env.fail(Stage::Plan, None, e))?;

    let path = env.run.write_json(paths::TEST_PLAN_JSON, &plan)?;
    env.record(
        StageReport::passed(
            Stage::Plan,
            format!("{} suites, {} steps", plan.suites.len(), plan.step_count()),
        )
        .with_artifact(&path),
    );
    Ok(plan)
}

/// Execute the stored plan. Failing steps are data: the report records them
/// and the summary is still returned.
pub async fn test_stage(env: &StageEnv<'_>, options: EngineOptions) -> Result<RunSummary> {
    let plan: TestPlan = env.run.read_json(paths::TEST_PLAN_JSON)?;
    let outputs: StackOutputs = env.run.read_json(paths::OUTPUTS_JSON)?;
    let summary = async { TestEngine::new(options)?.execute(&plan, &outputs).await }
        .await
        .map_err(|e| env.fail(Stage::Test, None, e))?;

    let results = env.run.write_json(paths::TEST_RESULTS_JSON, &summary)?;
    let log = env.run.write_text(paths::TEST_LOG, &summary.render_log())?;
    let message = format!(
        "{}/{} steps passed, {} failed, {} skipped",
        summary.passed, summary.total, summary.failed, summary.skipped
    );
    let report = if summary.success() {
        StageReport::passed(Stage::Test, message)
    } else {
        StageReport::failed(Stage::Test, message)
    };
    env.record(report.with_artifact(&results).with_artifact(&log));
    Ok(summary)
}

pub async fn fix_stage<G: TextGenerator>(
    env: &StageEnv<'_>,
    generator: &G,
    failed: FailureStage,
) -> Result<FixPatch> {
    let patch = async {
        let logs = read_failure_log(env.run, failed)?;
        let context = fix_context(env.root, &env.config.context)?;
        FixGenerator::new(generator, FixOptions::from(env.config))
            .generate_fix(&logs, &context, failed)
            .await
    }
    .await
    .map_err(|e| env.fail(Stage::Fix, None, e))?;

    let path = env.run.write_text(paths::FIX_PATCH, &patch.diff)?;
    env.record(
        StageReport::passed(
            Stage::Fix,
            format!(
                "patch {} for {failed} failure touching {} file(s)",
                patch.id,
                patch.files.len()
            ),
        )
        .with_artifact(&path),
    );
    Ok(patch)
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub run_id: String,
    pub kind: DeploymentKind,
    pub api_url: String,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixPatch>,
}

impl LoopOutcome {
    pub fn success(&self) -> bool {
        self.summary.success()
    }
}

/// detect → deploy → outputs → plan → test, with a fix attempt after a
/// deploy failure or failing tests when `fix.enabled`. A deploy failure is
/// still returned as the error once the fix stage has run.
pub async fn run_loop<G: TextGenerator>(
    env: &StageEnv<'_>,
    runner: &dyn CommandRunner,
    generator: &G,
    engine: EngineOptions,
) -> Result<LoopOutcome> {
    tracing::info!(run = %env.run.id(), root = %env.root.display(), "starting deploy loop");
    let detection = detect_stage(env)?;

    if let Err(e) = deploy_stage(env, runner) {
        try_fix(env, generator, FailureStage::Deploy).await;
        return Err(e);
    }

    let outputs = outputs_stage(env, runner)?;
    let api_url = resolve_api_url(&outputs)?;
    plan_stage(env, generator).await?;
    let summary = test_stage(env, engine).await?;

    let fix = if summary.success() {
        None
    } else {
        try_fix(env, generator, FailureStage::Test).await
    };
    Ok(LoopOutcome {
        run_id: env.run.id().to_string(),
        kind: detection.kind,
        api_url,
        summary,
        fix,
    })
}

/// A fix is best effort: its own failure is reported but never replaces the
/// failure that triggered it.
async fn try_fix<G: TextGenerator>(
    env: &StageEnv<'_>,
    generator: &G,
    failed: FailureStage,
) -> Option<FixPatch> {
    if !env.config.fix.enabled {
        tracing::info!(stage = %failed, "fix generation disabled");
        return None;
    }
    match fix_stage(env, generator, failed).await {
        Ok(patch) => Some(patch),
        Err(e) => {
            tracing::warn!(stage = %failed, error = %e, "fix generation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, FakeRunner};
    use crate::synth::tests::CannedGenerator;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const SAM_TEMPLATE: &str = "Transform: AWS::Serverless-2016-10-31\nResources: {}\n";

    const PLAN: &str = r#"{"suites":[{"name":"Health","description":"service is up",
        "steps":[{"action":"ping","endpoint":"/health","method":"GET","expectedStatus":200}]}]}"#;

    const DIFF: &str = "--- a/template.yaml\n+++ b/template.yaml\n@@ -1 +1 @@\n-x\n+y\n";

    struct Project {
        dir: TempDir,
        run: RunDir,
        config: Config,
    }

    fn sam_project() -> Project {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("template.yaml"), SAM_TEMPLATE).unwrap();
        std::fs::write(
            dir.path().join("app.js"),
            "app.get('/health', (req, res) => res.json({ ok: true }));\n",
        )
        .unwrap();
        let run = RunDir::create(dir.path()).unwrap();
        let mut config = Config::new("orders");
        config.testing.step_delay_ms = 0;
        Project { dir, run, config }
    }

    fn describe_stacks(url: &str) -> CommandOutput {
        CommandOutput::ok(format!(
            r#"[{{"OutputKey":"ApiUrl","OutputValue":"{url}"}},{{"OutputKey":"Region","OutputValue":"us-east-1"}}]"#
        ))
    }

    #[tokio::test]
    async fn sam_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let p = sam_project();
        let runner = FakeRunner::new()
            .respond("aws cloudformation describe-stacks", describe_stacks(&server.url()));
        let gen = CannedGenerator::new(&[PLAN]);
        let lines = RefCell::new(Vec::new());
        let reporter = |r: &StageReport| lines.borrow_mut().push(r.line());
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run).with_reporter(&reporter);

        let outcome = run_loop(&env, &runner, &gen, EngineOptions::from(&p.config))
            .await
            .unwrap();

        health.assert_async().await;
        assert_eq!(outcome.kind, DeploymentKind::Sam);
        assert_eq!(
            (outcome.summary.total, outcome.summary.passed, outcome.summary.failed),
            (1, 1, 0)
        );
        assert!(outcome.success());
        assert!(outcome.fix.is_none());

        assert_eq!(
            runner.lines()[..2],
            [
                "sam build --template-file template.yaml".to_string(),
                "sam deploy --stack-name orders --region us-east-1 --capabilities CAPABILITY_IAM CAPABILITY_NAMED_IAM --no-fail-on-empty-changeset --no-confirm-changeset --resolve-s3".to_string(),
            ]
        );
        for name in [
            paths::DETECTION_JSON,
            paths::DEPLOY_LOG,
            paths::OUTPUTS_JSON,
            paths::TEST_PLAN_JSON,
            paths::TEST_RESULTS_JSON,
            paths::TEST_LOG,
        ] {
            assert!(p.run.file(name).exists(), "{name}");
        }
        assert!(!p.run.file(paths::FIX_PATCH).exists());
        let lines = lines.borrow();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.starts_with('✓')));
        assert!(lines[0].starts_with("✓ detect [sam]"));
    }

    #[tokio::test]
    async fn deploy_failure_triggers_fix() {
        let p = sam_project();
        let runner = FakeRunner::new()
            .respond("sam deploy", CommandOutput::failed(1, "Error: Template format error"));
        let gen = CannedGenerator::new(&[DIFF]);
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run);

        let err = run_loop(&env, &runner, &gen, EngineOptions::from(&p.config))
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Deployment { ref step, .. } if step == "deploy"));
        assert_eq!(p.run.read_text(paths::FIX_PATCH).unwrap().unwrap(), DIFF);

        let prompt = &gen.prompts.lock().unwrap()[0].prompt;
        assert!(prompt.contains("Template format error"));

        let deploy: StageReport = p.run.read_json("reports/deploy.json").unwrap();
        assert!(!deploy.success);
        let fix: StageReport = p.run.read_json("reports/fix.json").unwrap();
        assert!(fix.success);
        assert!(fix.message.contains(&crate::fix::patch_identity(DIFF)));
    }

    #[tokio::test]
    async fn fix_disabled_skips_generation() {
        let mut p = sam_project();
        p.config.fix.enabled = false;
        let runner = FakeRunner::new().respond("sam build", CommandOutput::failed(2, "boom"));
        let gen = CannedGenerator::new(&[]);
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run);

        assert!(run_loop(&env, &runner, &gen, EngineOptions::from(&p.config))
            .await
            .is_err());
        assert!(gen.prompts.lock().unwrap().is_empty());
        assert!(!p.run.file(paths::FIX_PATCH).exists());
    }

    #[tokio::test]
    async fn failing_tests_produce_fix() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(500)
            .create_async()
            .await;

        let p = sam_project();
        let runner = FakeRunner::new()
            .respond("aws cloudformation describe-stacks", describe_stacks(&server.url()));
        let gen = CannedGenerator::new(&[PLAN, DIFF]);
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run);

        let outcome = run_loop(&env, &runner, &gen, EngineOptions::from(&p.config))
            .await
            .unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.summary.failed, 1);
        assert!(outcome.fix.is_some());

        let prompt = &gen.prompts.lock().unwrap()[1].prompt;
        assert!(prompt.contains("The test stage"));
        assert!(prompt.contains("-> 500"));
    }

    #[tokio::test]
    async fn no_endpoint_halts_before_planning() {
        let p = sam_project();
        let runner = FakeRunner::new().respond(
            "aws cloudformation describe-stacks",
            CommandOutput::ok(r#"[{"OutputKey":"Region","OutputValue":"us-east-1"}]"#),
        );
        let gen = CannedGenerator::new(&[]);
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run);

        let err = run_loop(&env, &runner, &gen, EngineOptions::from(&p.config))
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::NoEndpointFound { .. }));
        assert!(p.run.file(paths::OUTPUTS_JSON).exists());
        let report: StageReport = p.run.read_json("reports/outputs.json").unwrap();
        assert!(!report.success);
        assert!(gen.prompts.lock().unwrap().is_empty());
        assert!(!p.run.file(paths::TEST_PLAN_JSON).exists());
    }

    #[test]
    fn deploy_without_detection_is_missing_artifact() {
        let p = sam_project();
        let env = StageEnv::new(p.dir.path(), &p.config, &p.run);
        let err = deploy_stage(&env, &FakeRunner::new()).unwrap_err();
        assert!(matches!(err, LoopError::ArtifactMissing(_)));
    }

    #[test]
    fn undetectable_project_reports_unknown() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        let run = RunDir::create(dir.path()).unwrap();
        let config = Config::new("x");
        let env = StageEnv::new(dir.path(), &config, &run);

        assert!(matches!(detect_stage(&env), Err(LoopError::Detection(_))));
        let report: StageReport = run.read_json("reports/detect.json").unwrap();
        assert_eq!(report.kind, Some(DeploymentKind::Unknown));
        assert!(!report.success);
    }
}
