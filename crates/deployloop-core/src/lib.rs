//! `deployloop-core`: the stages of the deploy→test→fix loop.
//!
//! Every stage reads its input from a [`run_dir::RunDir`] artifact and
//! writes its own, so any stage can be re-run on its own:
//!
//! | stage   | module            | artifact               |
//! |---------|-------------------|------------------------|
//! | detect  | [`detect`]        | `detection.json`       |
//! | deploy  | [`deploy`]        | `deploy.log`, `raw/`   |
//! | outputs | [`outputs`]       | `outputs.json`         |
//! | plan    | [`synth`]         | `test-plan.json`       |
//! | test    | [`engine`]        | `test-results.json`, `test.log` |
//! | fix     | [`fix`]           | `fix.patch`            |
//!
//! [`pipeline`] sequences them; [`scaffold`] is the separate
//! spec-to-project path.

pub mod config;
pub mod context;
pub mod deploy;
pub mod detect;
pub mod engine;
pub mod error;
pub mod fix;
pub mod io;
pub mod outputs;
pub mod paths;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod run_dir;
pub mod runner;
pub mod scaffold;
pub mod strategy;
pub mod synth;
pub mod types;

pub use error::{LoopError, Result};
pub use run_dir::RunDir;
pub use types::{DeploymentKind, FailureStage, Stage};
