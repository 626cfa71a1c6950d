use crate::cmd::{Ctx, Overrides};
use crate::output::{print_json, print_report};
use deployloop_core::pipeline::{detect_stage, StageEnv};

/// Starts a new run (unless `--run-dir` is given) and records the kind.
pub fn run(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let run = ctx.new_run()?;
    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let detection = detect_stage(&env)?;

    if ctx.json {
        print_json(&detection)?;
    } else {
        println!("kind: {}", detection.kind);
        println!("rule: {}", detection.rule);
        println!("run:  {}", run.path().display());
    }
    Ok(())
}
