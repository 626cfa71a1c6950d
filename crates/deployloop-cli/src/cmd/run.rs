use crate::cmd::test::print_summary;
use crate::cmd::{block_on, gateway, Ctx, Overrides};
use crate::output::{print_json, print_report};
use deployloop_core::engine::EngineOptions;
use deployloop_core::pipeline::{run_loop, StageEnv};
use deployloop_core::runner::SystemRunner;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exits that are not errors in the loop itself
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    TestsFailed { failed: usize, total: usize },
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::TestsFailed { .. } => 1,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::TestsFailed { failed, total } => {
                write!(f, "{failed} of {total} executed test step(s) failed")
            }
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let gateway = gateway(&config, overrides)?;
    let run = ctx.new_run()?;
    eprintln!("run: {}", run.path().display());

    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let outcome = block_on(run_loop(
        &env,
        &SystemRunner,
        &gateway,
        EngineOptions::from(&config),
    ))??;

    if ctx.json {
        print_json(&outcome)?;
    } else {
        print_summary(&outcome.summary);
        if let Some(fix) = &outcome.fix {
            println!("fix: patch {} ({} file(s))", fix.id, fix.files.len());
        }
    }
    if !outcome.success() {
        return Err(RunExit::TestsFailed {
            failed: outcome.summary.failed,
            total: outcome.summary.total,
        }
        .into());
    }
    Ok(())
}
