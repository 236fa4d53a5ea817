//! Tooltune CLI - fine-tune a small model for tool calling
//!
//! Provides the `tooltune` command: `generate-data` builds the training set from
//! tool schemas and examples, `run` drives the whole train/fuse/export pipeline.

mod commands;

use clap::{Parser, Subcommand};
use commands::{GenerateDataArgs, RunArgs};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Tooltune - function-calling fine-tuning pipeline
#[derive(Parser, Debug)]
#[command(
    name = "tooltune",
    author,
    version,
    about = "Tooltune - fine-tune a small model to emit tool calls",
    long_about = "Tooltune turns tool schemas and example conversations into training data, then trains,\nfuses, exports and validates a LoRA fine-tune for browser and native runtimes."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate train/valid JSONL from tool schemas and examples
    GenerateData(GenerateDataArgs),

    /// Run the full pipeline: data, training, fusion, export and validation
    ///
    /// Stages can be skipped to resume from artifacts a previous run left in the
    /// output directory.
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::GenerateData(ref cmd) => commands::generate::execute(cmd),
        Command::Run(ref cmd) => commands::run::execute(cmd).await,
    }
}
