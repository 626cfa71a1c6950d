use crate::cmd::{Ctx, Overrides};
use crate::output::print_json;
use clap::Subcommand;
use deployloop_core::config::WarnLevel;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file plus flags)
    Show {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(ctx: &Ctx, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show { overrides } => show(ctx, &overrides),
        ConfigSubcommand::Validate => validate(ctx),
    }
}

fn show(ctx: &Ctx, overrides: &Overrides) -> anyhow::Result<()> {
    let config = ctx.config(overrides)?;
    if ctx.json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    println!("# effective stack name: {}", config.stack_name());
    Ok(())
}

fn validate(ctx: &Ctx) -> anyhow::Result<()> {
    let config = ctx.config(&Overrides::default())?;
    let warnings = config.validate();

    if ctx.json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
