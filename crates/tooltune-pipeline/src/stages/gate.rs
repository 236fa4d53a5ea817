//! Smoke-test gates: run the fixed prompt through a model and look for protocol markers.

use crate::artifacts::PipelineArtifact;
use crate::fs::resolve_model_file;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use crate::stages::fuse::ADAPTER_WEIGHTS_FILE;
use async_trait::async_trait;
use tooltune_dataset::sample::first_call_offset;
use tooltune_dataset::{has_protocol_markers, smoke_prompt, PROTOCOL_MARKERS};
use tracing::{info, warn};

// argv: model path, adapter path ("" for none), max tokens, prompt
const MLX_SCRIPT: &str = r#"import sys
from mlx_lm import load, generate
model_path, adapter_path, max_tokens, prompt = sys.argv[1:5]
model, tokenizer = load(model_path, adapter_path=adapter_path or None)
print(generate(model, tokenizer, prompt=prompt, max_tokens=int(max_tokens), verbose=False))
"#;

// argv: export dir, model file relative to it, max tokens, prompt
const ONNX_SCRIPT: &str = r#"import os, sys
from optimum.onnxruntime import ORTModelForCausalLM
from transformers import AutoTokenizer
model_dir, model_file, max_tokens, prompt = sys.argv[1:5]
subfolder, file_name = os.path.split(model_file)
tokenizer = AutoTokenizer.from_pretrained(model_dir)
model = ORTModelForCausalLM.from_pretrained(model_dir, subfolder=subfolder, file_name=file_name)
inputs = tokenizer(prompt, return_tensors="pt", add_special_tokens=False)
output = model.generate(**inputs, max_new_tokens=int(max_tokens))
print(tokenizer.decode(output[0][inputs["input_ids"].shape[-1]:], skip_special_tokens=False))
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBackend {
    /// Base model with the trained adapter, through MLX.
    Adapter,
    /// Fused model, through MLX.
    Fused,
    /// Final ONNX export, through onnxruntime.
    Onnx,
}

#[derive(Debug, Clone, Copy)]
pub struct SmokeGate {
    backend: GateBackend,
}

impl SmokeGate {
    #[must_use]
    pub fn new(backend: GateBackend) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> GateBackend {
        self.backend
    }

    fn command(&self, ctx: &StageContext<'_>) -> Result<CommandSpec, Diagnostic> {
        let config = ctx.config;
        let layout = ctx.layout;
        let max_tokens = config.gates.max_tokens.to_string();

        let command = match self.backend {
            GateBackend::Adapter => {
                let adapter_dir = layout.adapter_dir();
                ctx.require_file(&adapter_dir.join(ADAPTER_WEIGHTS_FILE), "adapter weights")?;
                CommandSpec::python_inline(&config.python, MLX_SCRIPT)
                    .arg(config.base_model.as_str())
                    .path_arg(&adapter_dir)
            }
            GateBackend::Fused => {
                let fused_dir = layout.fused_dir();
                ctx.require_dir(&fused_dir, "fused model")?;
                CommandSpec::python_inline(&config.python, MLX_SCRIPT).path_arg(&fused_dir).arg("")
            }
            GateBackend::Onnx => {
                let quantize = config.export.quantize.then_some(config.export.quantize_type);
                let dir = layout.exported_onnx_dir(quantize);
                let model = resolve_model_file(ctx.fs, &dir)?;
                let relative = model
                    .strip_prefix(&dir)
                    .map_err(|_| Diagnostic::new(format!("{} is outside {}", model.display(), dir.display())))?
                    .to_path_buf();
                CommandSpec::python_inline(&config.python, ONNX_SCRIPT).path_arg(&dir).path_arg(&relative)
            }
        };

        Ok(command.arg(max_tokens).arg(smoke_prompt()))
    }
}

/// Gate verdict for a captured completion.
pub fn evaluate_completion(completion: &str) -> Result<(), Diagnostic> {
    if has_protocol_markers(completion) {
        let call = first_call_offset(completion).map_or(completion, |at| &completion[at..]);
        info!(completion = %call.trim(), "model emitted a function call");
        Ok(())
    } else {
        Err(Diagnostic::new(format!("model output is missing protocol markers {PROTOCOL_MARKERS:?}"))
            .with_output_tail(completion))
    }
}

#[async_trait]
impl ExternalOperation for SmokeGate {
    fn kind(&self) -> OperationKind {
        OperationKind::Validate
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let command = self.command(ctx)?;
        let output = run_checked(ctx.runner, &command).await?;
        evaluate_completion(&output.stdout).inspect_err(|diag| {
            warn!(backend = ?self.backend, "{}", diag.message);
        })?;
        Ok(Vec::new())
    }
}
