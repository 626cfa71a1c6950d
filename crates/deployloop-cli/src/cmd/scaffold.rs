use crate::cmd::{block_on, gateway, Ctx, Overrides};
use crate::output::{print_json, print_report};
use anyhow::Context;
use deployloop_core::report::StageReport;
use deployloop_core::scaffold::{ScaffoldOptions, Scaffolder};
use deployloop_core::Stage;
use std::path::Path;

pub fn run(
    ctx: &Ctx,
    spec: &Path,
    out: &Path,
    force: bool,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(spec)
        .with_context(|| format!("failed to read spec {}", spec.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("spec {} is empty", spec.display());
    }
    let config = ctx.config(overrides)?;
    let gateway = gateway(&config, overrides)?;
    let scaffolder = Scaffolder::new(&gateway, ScaffoldOptions::from(&config));

    let outcome = block_on(scaffolder.scaffold(&text, out, force))?
        .with_context(|| format!("failed to scaffold into {}", out.display()))?;
    print_report(&StageReport::passed(
        Stage::Scaffold,
        format!(
            "{}: {} written, {} skipped",
            outcome.project_name,
            outcome.written.len(),
            outcome.skipped.len()
        ),
    ));

    if ctx.json {
        return print_json(&outcome);
    }
    for path in &outcome.written {
        println!("  created: {path}");
    }
    for path in &outcome.skipped {
        println!("  exists:  {path} (use --force to overwrite)");
    }
    Ok(())
}
