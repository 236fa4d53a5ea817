//! ONNX weight quantization.

use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::config::QuantizationMode;
use crate::fs::resolve_model_file;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const QUANTIZED_MODEL_FILE: &str = "model.onnx";

// Every script takes argv: input model, output model.
const INT8_SCRIPT: &str = r#"import sys
from onnxruntime.quantization import quantize_dynamic, QuantType
quantize_dynamic(sys.argv[1], sys.argv[2], weight_type=QuantType.QInt8)
"#;

const FP16_SCRIPT: &str = r#"import sys
import onnx
from onnxruntime.transformers import float16
model = onnx.load(sys.argv[1])
onnx.save(float16.convert_float_to_float16(model, keep_io_types=True), sys.argv[2])
"#;

const Q4_SCRIPT: &str = r#"import sys
from onnxruntime.quantization import quantize_dynamic, QuantType
quantize_dynamic(sys.argv[1], sys.argv[2], weight_type=QuantType.QUInt4x2)
"#;

const Q4_WEBGPU_SCRIPT: &str = r#"import sys
import onnx
from onnxruntime.quantization.matmul_4bits_quantizer import MatMul4BitsQuantizer
model = onnx.load(sys.argv[1])
quantizer = MatMul4BitsQuantizer(model, block_size=32, is_symmetric=True)
quantizer.process()
quantizer.model.save_model_to_file(sys.argv[2], use_external_data_format=False)
"#;

fn script(mode: QuantizationMode) -> &'static str {
    match mode {
        QuantizationMode::Int8 => INT8_SCRIPT,
        QuantizationMode::Fp16 => FP16_SCRIPT,
        QuantizationMode::Q4 => Q4_SCRIPT,
        QuantizationMode::Q4Webgpu => Q4_WEBGPU_SCRIPT,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuantizeOperation {
    mode: QuantizationMode,
}

impl QuantizeOperation {
    #[must_use]
    pub fn new(mode: QuantizationMode) -> Self {
        Self { mode }
    }

    /// Quantizes the model in `input_dir` into `output_dir`, returning the mode actually applied.
    pub async fn quantize(
        &self,
        ctx: &StageContext<'_>,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<QuantizationMode, Diagnostic> {
        let input_model = resolve_model_file(ctx.fs, input_dir)?;
        copy_support_files(input_dir, output_dir)?;
        let output_model = output_dir.join(QUANTIZED_MODEL_FILE);

        let applied = match self.run_mode(ctx, self.mode, &input_model, &output_model).await {
            Ok(()) => self.mode,
            Err(diag) => {
                let Some(fallback) = self.mode.fallback() else {
                    return Err(diag);
                };
                warn!(mode = %self.mode, fallback = %fallback, error = %diag, "quantization failed, falling back");
                self.run_mode(ctx, fallback, &input_model, &output_model).await?;
                fallback
            }
        };

        match (file_size_mb(&input_model), file_size_mb(&output_model)) {
            (Some(before), Some(after)) => {
                info!(mode = %applied, before_mb = before, after_mb = after, "quantized model");
            }
            _ => info!(mode = %applied, output = %output_model.display(), "quantized model"),
        }
        Ok(applied)
    }

    async fn run_mode(
        &self,
        ctx: &StageContext<'_>,
        mode: QuantizationMode,
        input: &Path,
        output: &Path,
    ) -> Result<(), Diagnostic> {
        info!(%mode, input = %input.display(), "quantizing");
        let command = CommandSpec::python_inline(&ctx.config.python, script(mode)).path_arg(input).path_arg(output);
        run_checked(ctx.runner, &command).await.map(|_| ())
    }
}

#[async_trait]
impl ExternalOperation for QuantizeOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Quantize
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let output_dir = ctx.layout.quantized_dir(self.mode);
        self.quantize(ctx, &ctx.layout.onnx_dir(), &output_dir).await?;
        Ok(vec![PipelineArtifact::new(ArtifactKind::QuantizedModel, output_dir)])
    }
}

fn is_model_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "onnx" || ext == "onnx_data")
}

/// Copies config, tokenizer and other top-level non-model files into `output_dir`.
fn copy_support_files(input_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, Diagnostic> {
    std::fs::create_dir_all(output_dir)?;
    let mut copied = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || is_model_file(&path) {
            continue;
        }
        let target = output_dir.join(entry.file_name());
        std::fs::copy(&path, &target)?;
        debug!(file = %target.display(), "copied support file");
        copied.push(target);
    }
    Ok(copied)
}

fn file_size_mb(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len() / (1024 * 1024))
}
