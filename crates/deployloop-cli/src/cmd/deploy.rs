use crate::cmd::{display_path, Ctx, Overrides};
use crate::output::{print_json, print_report};
use deployloop_core::pipeline::{deploy_stage, StageEnv};
use deployloop_core::runner::SystemRunner;

pub fn run(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let run = ctx.existing_run()?;
    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let outcome = deploy_stage(&env, &SystemRunner)?;

    if ctx.json {
        print_json(&outcome)?;
    } else {
        println!("stack: {}", config.stack_name());
        println!("log:   {}", display_path(&ctx.root, &outcome.log_path));
        if let Some(raw) = &outcome.raw_outputs {
            println!("raw:   {}", display_path(&ctx.root, raw));
        }
    }
    Ok(())
}
