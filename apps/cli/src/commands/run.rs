//! `tooltune run`: the full fine-tuning pipeline.

use super::load_config;
use super::progress::ConsoleProgressSink;
use super::types::RunArgs;
use anyhow::{Result, bail};
use colored::Colorize;
use tooltune_pipeline::{
    Pipeline, PipelineConfig, PipelineLayout, PipelineReport, StageContext, StageStatus, StdFileSystem,
    TokioCommandRunner,
};

pub async fn execute(args: &RunArgs) -> Result<()> {
    let config = load_config(args.inputs.config.as_deref(), &args.overrides())?;
    print_plan(&config);

    let layout = PipelineLayout::new(config.output_dir.clone());
    let runner = TokioCommandRunner;
    let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

    let report = Pipeline::from_config(&config).run(&ctx, &ConsoleProgressSink).await?;
    print_summary(&report);

    if let Some(failed) = report.failed_stage() {
        bail!("pipeline failed at stage {}", failed.stage);
    }
    Ok(())
}

fn print_plan(config: &PipelineConfig) {
    println!();
    println!("{}", "Fine-tuning pipeline".bold().cyan());
    println!("  Base model: {}", config.base_model);
    println!(
        "  Training:   {} iters, batch {}, lr {}",
        config.training.iters, config.training.batch_size, config.training.learning_rate
    );
    println!(
        "  LoRA:       rank {}, alpha {}, max seq {}",
        config.training.lora_rank, config.training.lora_alpha, config.training.max_seq_length
    );
    println!("  Output:     {}", config.output_dir.display());
    if config.export.quantize {
        println!("  Quantize:   {}", config.export.quantize_type);
    }
    println!("  MLC quant:  {}", config.mlc.quantization);
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("{:<18} {}", "Stage", "Status");
    println!("{}", "─".repeat(40));
    for result in &report.results {
        let status = match result.status {
            StageStatus::Succeeded => "succeeded".green(),
            StageStatus::Skipped => "skipped".dimmed(),
            StageStatus::Failed if result.tolerated => "warning".yellow(),
            StageStatus::Failed => "failed".red(),
            StageStatus::Pending | StageStatus::Running => "incomplete".normal(),
        };
        println!("{:<18} {}", result.stage.to_string(), status);
    }

    let warnings = report.warnings().count();
    if warnings > 0 {
        println!();
        println!("  {}", format!("{warnings} advisory check(s) failed; see output above").yellow());
    }
    println!();
    println!("  Manifest: {}", report.manifest_path.display().to_string().dimmed());
    println!();
}
