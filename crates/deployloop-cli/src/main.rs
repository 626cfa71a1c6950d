mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunExit, Ctx, Overrides};
use deployloop_core::FailureStage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "deployloop",
    about = "Detect, deploy, test and fix cloud projects with AI-generated test plans and patches",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest ancestor with .deployloop/, else cwd)
    #[arg(long, global = true, env = "DEPLOYLOOP_ROOT")]
    root: Option<PathBuf>,

    /// Run directory to read and write artifacts (default: latest run)
    #[arg(long, global = true)]
    run_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .deployloop/ with a default config
    Init,

    /// Show or validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Classify the project's deployment kind (starts a new run)
    Detect {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Build and deploy using the detected kind's toolchain
    Deploy {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Read the deployed stack's outputs
    Outputs {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Generate an HTTP test plan for the deployed API
    Plan {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Execute the test plan against the deployed API
    Test {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Generate a patch for a failed deploy or test stage
    Fix {
        /// Failing stage whose log to diagnose: deploy or test
        #[arg(long, default_value = "test")]
        stage: FailureStage,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// detect → deploy → outputs → plan → test, fixing on failure
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Generate a new project from a natural-language spec
    Scaffold {
        /// Spec file (markdown or plain text)
        #[arg(long)]
        spec: PathBuf,

        /// Target directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Overwrite files that already exist
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        overrides: Overrides,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Scaffold { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Ctx {
        root: root::resolve_root(cli.root.as_deref()),
        run_dir: cli.run_dir,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&ctx.root),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
        Commands::Detect { overrides } => cmd::detect::run(&ctx, &overrides),
        Commands::Deploy { overrides } => cmd::deploy::run(&ctx, &overrides),
        Commands::Outputs { overrides } => cmd::outputs::run(&ctx, &overrides),
        Commands::Plan { overrides } => cmd::plan::run(&ctx, &overrides),
        Commands::Test { overrides } => cmd::test::run(&ctx, &overrides),
        Commands::Fix { stage, overrides } => cmd::fix::run(&ctx, stage, &overrides),
        Commands::Run { overrides } => cmd::run::run(&ctx, &overrides),
        Commands::Scaffold {
            spec,
            out,
            force,
            overrides,
        } => cmd::scaffold::run(&ctx, &spec, &out, force, &overrides),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e.downcast_ref::<RunExit>().map_or(1, RunExit::exit_code);
        std::process::exit(code);
    }
}
