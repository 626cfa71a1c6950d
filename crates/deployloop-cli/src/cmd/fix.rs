use crate::cmd::{block_on, display_path, gateway, Ctx, Overrides};
use crate::output::{print_json, print_report};
use deployloop_core::paths;
use deployloop_core::pipeline::{fix_stage, StageEnv};
use deployloop_core::FailureStage;

pub fn run(ctx: &Ctx, stage: FailureStage, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let run = ctx.existing_run()?;
    let gateway = gateway(&config, overrides)?;
    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let patch = block_on(fix_stage(&env, &gateway, stage))??;

    if ctx.json {
        return print_json(&patch);
    }
    print!("{}", patch.diff);
    let path = display_path(&ctx.root, &run.file(paths::FIX_PATCH));
    eprintln!("\npatch {} written; apply with: git apply {path}", patch.id);
    Ok(())
}
