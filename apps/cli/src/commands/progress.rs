//! Human-readable pipeline progress.

use colored::Colorize;
use tooltune_pipeline::{PipelineEvent, ProgressSink};

#[derive(Debug, Default)]
pub struct ConsoleProgressSink;

impl ProgressSink for ConsoleProgressSink {
    fn on_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { run_id, stages } => {
                println!();
                println!("{} {}", "Pipeline run".bold().cyan(), run_id.to_string().dimmed());
                println!("  {stages} stages");
            }
            PipelineEvent::StageSkipped { stage } => {
                println!("  {} {}", "-".dimmed(), format!("{stage} (skipped)").dimmed());
            }
            PipelineEvent::StageStarted { stage, index, total } => {
                println!();
                println!("{} {}", format!("[{index}/{total}]").cyan(), stage.to_string().bold());
            }
            PipelineEvent::StageSucceeded { stage, artifacts } => {
                println!("  {} {stage}", "✓".green());
                for artifact in artifacts {
                    println!("    {}", artifact.path.display().to_string().dimmed());
                }
            }
            PipelineEvent::StageFailed { stage, diagnostic, tolerated } => {
                if tolerated {
                    println!("  {} {stage}: {}", "!".yellow(), diagnostic.message.yellow());
                } else {
                    println!("  {} {stage}: {}", "✗".red(), diagnostic.message.red());
                }
                if let Some(tail) = diagnostic.output_tail {
                    for line in tail.lines() {
                        println!("    {}", line.dimmed());
                    }
                }
            }
            PipelineEvent::RunFinished { succeeded, .. } => {
                println!();
                if succeeded {
                    println!("{}", "Pipeline complete".bold().green());
                } else {
                    println!("{}", "Pipeline failed".bold().red());
                }
            }
        }
    }
}
