//! Command implementations for the tooltune CLI.

pub mod generate;
pub mod progress;
pub mod run;
pub mod types;

pub use types::{GenerateDataArgs, RunArgs};

use anyhow::{Context, Result};
use tooltune_pipeline::{ConfigOverrides, PipelineConfig};

/// Discovered or explicit config file, with CLI overrides applied and validated.
pub(crate) fn load_config(explicit: Option<&std::path::Path>, overrides: &ConfigOverrides) -> Result<PipelineConfig> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let mut config = PipelineConfig::discover(explicit, &cwd).context("Failed to load configuration")?;
    config.merge(overrides);
    config.validate()?;
    Ok(config)
}
