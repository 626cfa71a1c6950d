use crate::cmd::{Ctx, Overrides};
use crate::output::{print_json, print_report, print_table};
use deployloop_core::pipeline::{outputs_stage, StageEnv};
use deployloop_core::runner::SystemRunner;

pub fn run(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let run = ctx.existing_run()?;
    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let outputs = outputs_stage(&env, &SystemRunner)?;

    if ctx.json {
        return print_json(&outputs);
    }
    let rows = outputs
        .iter()
        .map(|(k, v)| vec![k.clone(), v.clone()])
        .collect();
    print_table(&["KEY", "VALUE"], rows);
    Ok(())
}
