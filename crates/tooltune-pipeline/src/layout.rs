use crate::config::QuantizationMode;
use crate::error::PipelineResult;
use std::path::{Path, PathBuf};

/// Filesystem layout for every artifact a run produces, relative to one output directory.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    root: PathBuf,
}

impl PipelineLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("training-data")
    }

    #[must_use]
    pub fn adapter_dir(&self) -> PathBuf {
        self.root.join("adapters")
    }

    #[must_use]
    pub fn fused_dir(&self) -> PathBuf {
        self.root.join("fused-model")
    }

    #[must_use]
    pub fn onnx_dir(&self) -> PathBuf {
        self.root.join("onnx-model")
    }

    /// `<onnx_dir>-<mode>`
    #[must_use]
    pub fn quantized_dir(&self, mode: QuantizationMode) -> PathBuf {
        self.root.join(format!("onnx-model-{mode}"))
    }

    /// Directory the ONNX gate validates: the quantized copy when quantization is on.
    #[must_use]
    pub fn exported_onnx_dir(&self, quantize: Option<QuantizationMode>) -> PathBuf {
        match quantize {
            Some(mode) => self.quantized_dir(mode),
            None => self.onnx_dir(),
        }
    }

    #[must_use]
    pub fn mlc_dir(&self) -> PathBuf {
        self.root.join("mlc-model")
    }

    #[must_use]
    pub fn mlc_library_path(&self, device: &str) -> PathBuf {
        self.mlc_dir().join(format!("model-{device}.wasm"))
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("pipeline_manifest.json")
    }

    pub fn ensure_root(&self) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
