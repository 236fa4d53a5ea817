//! `tooltune generate-data`: build the training dataset only.

use super::load_config;
use super::types::GenerateDataArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use tooltune_dataset::{DatasetBuilder, TRAIN_FILE, VALID_FILE};
use tooltune_pipeline::PipelineLayout;

pub fn execute(args: &GenerateDataArgs) -> Result<()> {
    let config = load_config(args.inputs.config.as_deref(), &args.overrides())?;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| PipelineLayout::new(config.output_dir.clone()).data_dir());

    println!();
    println!("{}", "Generating training data".bold().cyan());
    println!("  Tools:    {}", config.tools_path.display().to_string().dimmed());
    println!("  Examples: {}", config.examples_path.display().to_string().dimmed());
    println!();

    let split = DatasetBuilder::from_sources(&config.tools_path, &config.examples_path)
        .with_options(config.dataset.split_options())
        .build_and_write(&output_dir)
        .context("Failed to generate training data")?;
    let id = split.id()?;

    println!("{}", "Dataset written".bold().green());
    println!("  {:<12} {}", TRAIN_FILE, format!("{} samples", split.train.len()).cyan());
    println!("  {:<12} {}", VALID_FILE, format!("{} samples", split.valid.len()).cyan());
    println!("  Directory:   {}", output_dir.display());
    println!("  Dataset id:  {}", id.to_string().dimmed());
    if split.valid.is_empty() || split.train.is_empty() {
        println!();
        println!("  {}", "Warning: one partition is empty; add more examples for a useful split.".yellow());
    }
    println!();
    Ok(())
}
