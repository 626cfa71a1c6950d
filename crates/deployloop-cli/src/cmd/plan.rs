use crate::cmd::{block_on, gateway, Ctx, Overrides};
use crate::output::{print_json, print_report, print_table};
use deployloop_core::pipeline::{plan_stage, StageEnv};

pub fn run(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    let run = ctx.existing_run()?;
    let gateway = gateway(&config, overrides)?;
    let env = StageEnv::new(&ctx.root, &config, &run).with_reporter(&print_report);
    let plan = block_on(plan_stage(&env, &gateway))??;

    if ctx.json {
        return print_json(&plan);
    }
    let rows = plan
        .suites
        .iter()
        .flat_map(|suite| {
            suite.steps.iter().enumerate().map(move |(i, step)| {
                vec![
                    suite.name.clone(),
                    (i + 1).to_string(),
                    step.method.clone(),
                    step.endpoint.clone(),
                    step.expected_status.to_string(),
                ]
            })
        })
        .collect();
    print_table(&["SUITE", "#", "METHOD", "ENDPOINT", "EXPECT"], rows);
    Ok(())
}
