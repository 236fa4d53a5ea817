//! Command type definitions shared between main.rs and the command modules.

use clap::Args;
use std::path::PathBuf;
use tooltune_pipeline::{ConfigOverrides, QuantizationMode, SkipFlags};

#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Tool definitions: a JSON file or a directory of JSON files
    #[arg(long)]
    pub tools_file: Option<PathBuf>,

    /// Training examples JSON file
    #[arg(long)]
    pub examples_file: Option<PathBuf>,

    /// Config file (defaults to ./tooltune.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateDataArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Directory for train.jsonl and valid.jsonl (defaults to <output_dir>/training-data)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Fraction of samples used for training, between 0 and 1
    #[arg(long)]
    pub train_split: Option<f64>,

    /// Shuffle seed
    #[arg(long)]
    pub seed: Option<u64>,
}

impl GenerateDataArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            tools_path: self.inputs.tools_file.clone(),
            examples_path: self.inputs.examples_file.clone(),
            train_split: self.train_split,
            seed: self.seed,
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Base model to fine-tune
    #[arg(long)]
    pub base_model: Option<String>,

    /// Training iterations
    #[arg(long)]
    pub iters: Option<u32>,

    /// Training batch size
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Optimizer learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// AdamW weight decay
    #[arg(long)]
    pub weight_decay: Option<f64>,

    /// LoRA rank (r)
    #[arg(long)]
    pub lora_rank: Option<u32>,

    /// LoRA alpha; the adapter scale is alpha / rank
    #[arg(long)]
    pub lora_alpha: Option<u32>,

    /// Number of layers to adapt (default: trainer default)
    #[arg(long)]
    pub lora_layers: Option<u32>,

    /// Maximum training sequence length in tokens
    #[arg(long)]
    pub max_seq_length: Option<u32>,

    /// Trade compute for memory with gradient checkpointing
    #[arg(long)]
    pub grad_checkpoint: bool,

    /// Base directory for every pipeline artifact
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Quantize the exported ONNX model
    #[arg(long)]
    pub quantize: bool,

    /// Quantization mode (int8, fp16, q4, q4-webgpu)
    #[arg(long)]
    pub quantize_type: Option<QuantizationMode>,

    /// MLC weight quantization (e.g. q0f16, q4f16_1)
    #[arg(long)]
    pub mlc_quant: Option<String>,

    /// Compile the MLC WebGPU library (needs emcc)
    #[arg(long)]
    pub compile_mlc: bool,

    /// Rearrange the ONNX export for browser runtimes
    #[arg(long, overrides_with = "no_prepare_browser")]
    pub prepare_browser: bool,

    /// Leave the ONNX export as produced
    #[arg(long, overrides_with = "prepare_browser")]
    pub no_prepare_browser: bool,

    /// Reuse existing training data
    #[arg(long)]
    pub skip_data: bool,

    /// Reuse existing adapter and fused model
    #[arg(long)]
    pub skip_training: bool,

    /// Skip smoke-test gates
    #[arg(long)]
    pub skip_tests: bool,

    /// Skip ONNX export and its gate
    #[arg(long)]
    pub skip_onnx: bool,

    /// Skip MLC export
    #[arg(long)]
    pub skip_mlc: bool,

    /// Python interpreter for external tools
    #[arg(long)]
    pub python: Option<String>,
}

impl RunArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        let prepare_browser = if self.no_prepare_browser {
            Some(false)
        } else if self.prepare_browser {
            Some(true)
        } else {
            None
        };

        ConfigOverrides {
            tools_path: self.inputs.tools_file.clone(),
            examples_path: self.inputs.examples_file.clone(),
            output_dir: self.output_dir.clone(),
            base_model: self.base_model.clone(),
            python: self.python.clone(),
            iters: self.iters,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            lora_rank: self.lora_rank,
            lora_alpha: self.lora_alpha,
            lora_layers: self.lora_layers,
            max_seq_length: self.max_seq_length,
            grad_checkpoint: self.grad_checkpoint.then_some(true),
            quantize: self.quantize.then_some(true),
            quantize_type: self.quantize_type,
            prepare_browser,
            mlc_quantization: self.mlc_quant.clone(),
            compile_mlc: self.compile_mlc.then_some(true),
            skip: SkipFlags {
                data: self.skip_data,
                training: self.skip_training,
                tests: self.skip_tests,
                onnx: self.skip_onnx,
                mlc: self.skip_mlc,
            },
            ..ConfigOverrides::default()
        }
    }
}
