//! MLC export: weight conversion, chat config and optional WebGPU compilation.

use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::config::PipelineConfig;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

pub const EMCC: &str = "emcc";
pub const MLC_CHAT_CONFIG: &str = "mlc-chat-config.json";

#[derive(Debug, Default)]
pub struct ExportMlcOperation;

pub fn convert_weight_command(config: &PipelineConfig, fused_dir: &Path, mlc_dir: &Path) -> CommandSpec {
    CommandSpec::python_module(&config.python, "mlc_llm")
        .arg("convert_weight")
        .path_arg(fused_dir)
        .args(["--quantization", config.mlc.quantization.as_str()])
        .arg("--output")
        .path_arg(mlc_dir)
}

pub fn gen_config_command(config: &PipelineConfig, fused_dir: &Path, mlc_dir: &Path) -> CommandSpec {
    CommandSpec::python_module(&config.python, "mlc_llm")
        .arg("gen_config")
        .path_arg(fused_dir)
        .args(["--quantization", config.mlc.quantization.as_str()])
        .arg("--output")
        .path_arg(mlc_dir)
        .args(["--conv-template", config.mlc.conv_template.as_str()])
}

#[async_trait]
impl ExternalOperation for ExportMlcOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::ExportMlc
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let config = ctx.config;
        let fused_dir = ctx.layout.fused_dir();
        let mlc_dir = ctx.layout.mlc_dir();
        ctx.require_dir(&fused_dir, "fused model")?;

        info!(quantization = %config.mlc.quantization, output = %mlc_dir.display(), "converting weights for MLC");
        run_checked(ctx.runner, &convert_weight_command(config, &fused_dir, &mlc_dir)).await?;
        run_checked(ctx.runner, &gen_config_command(config, &fused_dir, &mlc_dir)).await?;

        let mut artifacts = vec![PipelineArtifact::new(ArtifactKind::MlcModel, &mlc_dir)];
        if config.mlc.compile {
            match CompileOperation.invoke(ctx).await {
                Ok(compiled) => artifacts.extend(compiled),
                Err(diag) => warn!(error = %diag, "MLC compile failed, continuing without a compiled library"),
            }
        }
        Ok(artifacts)
    }
}

/// Compiles the MLC model library. Skipped with a warning when Emscripten is unavailable.
#[derive(Debug, Default)]
pub struct CompileOperation;

impl CompileOperation {
    async fn emscripten_available(ctx: &StageContext<'_>) -> bool {
        match ctx.runner.run(&CommandSpec::new(EMCC).arg("--version")).await {
            Ok(output) => output.succeeded(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ExternalOperation for CompileOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Compile
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        if !Self::emscripten_available(ctx).await {
            warn!("emcc not found, skipping MLC compile (install and activate emsdk to build the WebGPU library)");
            return Ok(Vec::new());
        }

        let config = ctx.config;
        let chat_config = ctx.layout.mlc_dir().join(MLC_CHAT_CONFIG);
        ctx.require_file(&chat_config, "MLC chat config")?;
        let library = ctx.layout.mlc_library_path(&config.mlc.device);

        let command = CommandSpec::python_module(&config.python, "mlc_llm")
            .arg("compile")
            .path_arg(&chat_config)
            .args(["--device", config.mlc.device.as_str()])
            .arg("--output")
            .path_arg(&library);
        run_checked(ctx.runner, &command).await?;

        info!(library = %library.display(), "compiled MLC library");
        Ok(vec![PipelineArtifact::new(ArtifactKind::MlcLibrary, library)])
    }
}
