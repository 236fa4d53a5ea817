//! Pipeline configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then CLI flags.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tooltune_dataset::SplitOptions;
use tracing::debug;

/// Name of the config file discovered in the working directory.
pub const CONFIG_FILE_NAME: &str = "tooltune.toml";

pub const DEFAULT_BASE_MODEL: &str = "google/functiongemma-270m-it";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tools_path: PathBuf,
    pub examples_path: PathBuf,
    pub output_dir: PathBuf,
    pub base_model: String,
    /// Interpreter used for every `python -m ...` invocation.
    pub python: String,
    pub optimum_cli: String,
    pub dataset: DatasetConfig,
    pub training: TrainingHyperParams,
    pub export: ExportConfig,
    pub mlc: MlcConfig,
    pub gates: GatePolicy,
    pub skip: SkipFlags,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tools_path: PathBuf::from("examples/tool-definitions"),
            examples_path: PathBuf::from("examples/training-examples.json"),
            output_dir: PathBuf::from("working"),
            base_model: DEFAULT_BASE_MODEL.to_string(),
            python: "python3".to_string(),
            optimum_cli: "optimum-cli".to_string(),
            dataset: DatasetConfig::default(),
            training: TrainingHyperParams::default(),
            export: ExportConfig::default(),
            mlc: MlcConfig::default(),
            gates: GatePolicy::default(),
            skip: SkipFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub seed: u64,
    pub train_split: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let opts = SplitOptions::default();
        Self { seed: opts.seed, train_split: opts.train_fraction }
    }
}

impl DatasetConfig {
    #[must_use]
    pub fn split_options(&self) -> SplitOptions {
        SplitOptions { seed: self.seed, train_fraction: self.train_split }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingHyperParams {
    pub iters: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub steps_per_report: u32,
    pub steps_per_eval: u32,
    pub seed: u64,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    /// Layers to adapt, counted from the top. `None` leaves the trainer default.
    pub lora_layers: Option<u32>,
    pub max_seq_length: u32,
    pub grad_checkpoint: bool,
    pub weight_decay: f64,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self {
            iters: 100,
            batch_size: 2,
            learning_rate: 1e-5,
            steps_per_report: 30,
            steps_per_eval: 50,
            seed: 42,
            lora_rank: 8,
            lora_alpha: 16,
            lora_layers: None,
            max_seq_length: 512,
            grad_checkpoint: false,
            weight_decay: 0.01,
        }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.iters == 0 {
            return Err(PipelineError::InvalidConfig("iters must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::InvalidConfig("learning_rate must be a finite positive number".to_string()));
        }
        if self.steps_per_report == 0 || self.steps_per_eval == 0 {
            return Err(PipelineError::InvalidConfig("report/eval intervals must be >= 1".to_string()));
        }
        if self.lora_rank == 0 || self.lora_alpha == 0 {
            return Err(PipelineError::InvalidConfig("lora_rank and lora_alpha must be >= 1".to_string()));
        }
        if self.lora_layers == Some(0) {
            return Err(PipelineError::InvalidConfig("lora_layers must be >= 1 when set".to_string()));
        }
        if self.max_seq_length == 0 {
            return Err(PipelineError::InvalidConfig("max_seq_length must be >= 1".to_string()));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(PipelineError::InvalidConfig("weight_decay must be a finite non-negative number".to_string()));
        }
        Ok(())
    }

    /// LoRA scale applied to the adapter output, `alpha / rank`.
    #[must_use]
    pub fn lora_scale(&self) -> f64 {
        f64::from(self.lora_alpha) / f64::from(self.lora_rank)
    }
}

/// ONNX weight quantization modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantizationMode {
    Int8,
    Fp16,
    Q4,
    Q4Webgpu,
}

impl QuantizationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Fp16 => "fp16",
            Self::Q4 => "q4",
            Self::Q4Webgpu => "q4-webgpu",
        }
    }

    /// Mode used when this one fails, if any.
    #[must_use]
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::Q4 | Self::Q4Webgpu => Some(Self::Int8),
            Self::Int8 | Self::Fp16 => None,
        }
    }
}

impl fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int8" => Ok(Self::Int8),
            "fp16" => Ok(Self::Fp16),
            "q4" => Ok(Self::Q4),
            "q4-webgpu" | "q4_webgpu" => Ok(Self::Q4Webgpu),
            other => Err(format!("unknown quantization mode '{other}' (expected int8, fp16, q4 or q4-webgpu)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub quantize: bool,
    pub quantize_type: QuantizationMode,
    pub prepare_browser: bool,
    /// Directory holding tokenizer files copied into browser bundles when missing.
    pub reference_tokenizer_dir: Option<PathBuf>,
    /// Top-level `config.json` key removed for browser runtimes.
    pub strip_config_key: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            quantize: false,
            quantize_type: QuantizationMode::Fp16,
            prepare_browser: true,
            reference_tokenizer_dir: None,
            strip_config_key: "quantization_config".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlcConfig {
    pub quantization: String,
    pub conv_template: String,
    pub compile: bool,
    pub device: String,
}

impl Default for MlcConfig {
    fn default() -> Self {
        Self {
            quantization: "q0f16".to_string(),
            conv_template: "gemma_instruction".to_string(),
            compile: false,
            device: "webgpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSeverity {
    /// Failure is reported and the run continues.
    Advisory,
    /// Failure halts the run.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub adapter: GateSeverity,
    pub fused: GateSeverity,
    pub onnx: GateSeverity,
    pub max_tokens: u32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            adapter: GateSeverity::Advisory,
            fused: GateSeverity::Advisory,
            onnx: GateSeverity::Blocking,
            max_tokens: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipFlags {
    pub data: bool,
    pub training: bool,
    pub tests: bool,
    pub onnx: bool,
    pub mlc: bool,
}

/// Values supplied on the command line. `Some` overrides the config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub tools_path: Option<PathBuf>,
    pub examples_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub base_model: Option<String>,
    pub python: Option<String>,
    pub iters: Option<u32>,
    pub batch_size: Option<u32>,
    pub learning_rate: Option<f64>,
    pub lora_rank: Option<u32>,
    pub lora_alpha: Option<u32>,
    pub lora_layers: Option<u32>,
    pub max_seq_length: Option<u32>,
    pub grad_checkpoint: Option<bool>,
    pub weight_decay: Option<f64>,
    pub train_split: Option<f64>,
    pub seed: Option<u64>,
    pub quantize: Option<bool>,
    pub quantize_type: Option<QuantizationMode>,
    pub prepare_browser: Option<bool>,
    pub mlc_quantization: Option<String>,
    pub compile_mlc: Option<bool>,
    pub skip: SkipFlags,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| PipelineError::ConfigParse { path: path.to_path_buf(), source })
    }

    /// Load `explicit` if given, otherwise `tooltune.toml` in `cwd` when present, otherwise defaults.
    ///
    /// An explicit path that does not exist is an error; a missing discovered file is not.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> PipelineResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        let local = cwd.join(CONFIG_FILE_NAME);
        if local.is_file() {
            debug!(path = %local.display(), "loading discovered config");
            return Self::load_from_file(&local);
        }
        Ok(Self::default())
    }

    /// Apply CLI overrides. Skip flags only ever switch a stage off.
    pub fn merge(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref p) = overrides.tools_path {
            self.tools_path = p.clone();
        }
        if let Some(ref p) = overrides.examples_path {
            self.examples_path = p.clone();
        }
        if let Some(ref p) = overrides.output_dir {
            self.output_dir = p.clone();
        }
        if let Some(ref model) = overrides.base_model {
            self.base_model = model.clone();
        }
        if let Some(ref python) = overrides.python {
            self.python = python.clone();
        }
        if let Some(iters) = overrides.iters {
            self.training.iters = iters;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.training.batch_size = batch_size;
        }
        if let Some(lr) = overrides.learning_rate {
            self.training.learning_rate = lr;
        }
        if let Some(rank) = overrides.lora_rank {
            self.training.lora_rank = rank;
        }
        if let Some(alpha) = overrides.lora_alpha {
            self.training.lora_alpha = alpha;
        }
        if overrides.lora_layers.is_some() {
            self.training.lora_layers = overrides.lora_layers;
        }
        if let Some(len) = overrides.max_seq_length {
            self.training.max_seq_length = len;
        }
        if let Some(checkpoint) = overrides.grad_checkpoint {
            self.training.grad_checkpoint = checkpoint;
        }
        if let Some(decay) = overrides.weight_decay {
            self.training.weight_decay = decay;
        }
        if let Some(split) = overrides.train_split {
            self.dataset.train_split = split;
        }
        if let Some(seed) = overrides.seed {
            self.dataset.seed = seed;
        }
        if let Some(quantize) = overrides.quantize {
            self.export.quantize = quantize;
        }
        if let Some(mode) = overrides.quantize_type {
            self.export.quantize_type = mode;
        }
        if let Some(prepare) = overrides.prepare_browser {
            self.export.prepare_browser = prepare;
        }
        if let Some(ref q) = overrides.mlc_quantization {
            self.mlc.quantization = q.clone();
        }
        if let Some(compile) = overrides.compile_mlc {
            self.mlc.compile = compile;
        }

        self.skip.data |= overrides.skip.data;
        self.skip.training |= overrides.skip.training;
        self.skip.tests |= overrides.skip.tests;
        self.skip.onnx |= overrides.skip.onnx;
        self.skip.mlc |= overrides.skip.mlc;
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.base_model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("base_model must not be empty".to_string()));
        }
        if self.python.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("python must not be empty".to_string()));
        }
        self.training.validate()?;
        self.dataset.split_options().validate().map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        if self.gates.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig("gates.max_tokens must be >= 1".to_string()));
        }
        if self.mlc.quantization.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("mlc.quantization must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.base_model, DEFAULT_BASE_MODEL);
        assert_eq!(config.training.iters, 100);
        assert_eq!(config.training.batch_size, 2);
        assert_eq!(config.mlc.quantization, "q0f16");
        assert_eq!(config.gates.adapter, GateSeverity::Advisory);
        assert_eq!(config.gates.onnx, GateSeverity::Blocking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
base_model = "my/model"

[training]
iters = 250

[export]
quantize = true
quantize_type = "q4-webgpu"

[gates]
fused = "blocking"
"#,
        )
        .unwrap();

        let config = PipelineConfig::discover(None, temp.path()).unwrap();
        assert_eq!(config.base_model, "my/model");
        assert_eq!(config.training.iters, 250);
        assert_eq!(config.training.batch_size, 2);
        assert_eq!(config.export.quantize_type, QuantizationMode::Q4Webgpu);
        assert_eq!(config.gates.fused, GateSeverity::Blocking);
        assert_eq!(config.gates.adapter, GateSeverity::Advisory);
    }

    #[test]
    fn test_discover_without_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        assert_eq!(PipelineConfig::discover(None, temp.path()).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = PipelineConfig::discover(Some(&temp.path().join("nope.toml")), temp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigNotFound(_)));
    }

    #[test]
    fn test_bad_toml_names_the_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "iters = [").unwrap();
        let err = PipelineConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = PipelineConfig::default();
        config.skip.mlc = true;
        let overrides = ConfigOverrides {
            iters: Some(10),
            quantize_type: Some(QuantizationMode::Int8),
            prepare_browser: Some(false),
            skip: SkipFlags { onnx: true, ..SkipFlags::default() },
            ..ConfigOverrides::default()
        };
        config.merge(&overrides);

        assert_eq!(config.training.iters, 10);
        assert_eq!(config.export.quantize_type, QuantizationMode::Int8);
        assert!(!config.export.prepare_browser);
        assert!(config.skip.onnx);
        assert!(config.skip.mlc);
    }

    #[test]
    fn test_validate_rejects_bad_hyperparams() {
        let mut config = PipelineConfig::default();
        config.training.iters = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.learning_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.dataset.train_split = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lora_settings_defaults_and_bounds() {
        let hp = TrainingHyperParams::default();
        assert_eq!((hp.lora_rank, hp.lora_alpha, hp.max_seq_length), (8, 16, 512));
        assert_eq!(hp.lora_layers, None);
        assert!((hp.lora_scale() - 2.0).abs() < f64::EPSILON);

        let invalid: [fn(&mut TrainingHyperParams); 4] = [
            |hp| hp.lora_rank = 0,
            |hp| hp.lora_layers = Some(0),
            |hp| hp.max_seq_length = 0,
            |hp| hp.weight_decay = -0.1,
        ];
        for mutate in invalid {
            let mut hp = TrainingHyperParams::default();
            mutate(&mut hp);
            assert!(hp.validate().is_err());
        }
    }

    #[test]
    fn test_lora_settings_from_toml_and_overrides() {
        let mut config: PipelineConfig =
            toml::from_str("[training]\nlora_rank = 16\nlora_layers = 8\ngrad_checkpoint = true\n").unwrap();
        assert_eq!(config.training.lora_rank, 16);
        assert_eq!(config.training.lora_layers, Some(8));
        assert!(config.training.grad_checkpoint);
        assert_eq!(config.training.lora_alpha, 16);

        config.merge(&ConfigOverrides { lora_alpha: Some(32), weight_decay: Some(0.0), ..ConfigOverrides::default() });
        assert_eq!(config.training.lora_alpha, 32);
        assert!(config.training.weight_decay.abs() < f64::EPSILON);
        assert_eq!(config.training.lora_layers, Some(8));
    }

    #[test]
    fn test_quantization_mode_parsing() {
        assert_eq!("q4-webgpu".parse::<QuantizationMode>().unwrap(), QuantizationMode::Q4Webgpu);
        assert_eq!("FP16".parse::<QuantizationMode>().unwrap(), QuantizationMode::Fp16);
        assert!("int4".parse::<QuantizationMode>().is_err());
        assert_eq!(QuantizationMode::Q4.fallback(), Some(QuantizationMode::Int8));
        assert_eq!(QuantizationMode::Fp16.fallback(), None);
    }
}
