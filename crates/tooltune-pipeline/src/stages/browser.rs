//! Rearranges an ONNX export into the layout browser runtimes load from.

use crate::config::ExportConfig;
use crate::fs::{resolve_model_file, FileSystem};
use crate::stage::Diagnostic;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const BROWSER_MODEL_PATH: &str = "onnx/model.onnx";
pub const TOKENIZER_FILES: [&str; 3] = ["tokenizer.json", "tokenizer_config.json", "special_tokens_map.json"];
pub const REQUIRED_FILES: [&str; 3] = ["config.json", "tokenizer.json", BROWSER_MODEL_PATH];

#[derive(Debug, Clone, Default)]
pub struct BrowserLayoutOptions {
    /// Where tokenizer files are copied from when the export lacks them.
    pub reference_dir: Option<PathBuf>,
    /// Top-level `config.json` key to remove, if any.
    pub strip_config_key: Option<String>,
}

impl From<&ExportConfig> for BrowserLayoutOptions {
    fn from(config: &ExportConfig) -> Self {
        let key = config.strip_config_key.trim();
        Self {
            reference_dir: config.reference_tokenizer_dir.clone(),
            strip_config_key: (!key.is_empty()).then(|| key.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserLayoutReport {
    /// Files moved under `onnx/`.
    pub relocated: Vec<PathBuf>,
    /// Tokenizer files copied from the reference directory.
    pub copied: Vec<String>,
    pub stripped_config_key: bool,
    /// Required files still absent afterwards.
    pub missing: Vec<String>,
}

/// Normalizes `dir` in place. Safe to run more than once.
///
/// Missing required files are reported, not treated as failures.
pub fn normalize_browser_layout(
    fs: &dyn FileSystem,
    dir: &Path,
    options: &BrowserLayoutOptions,
) -> Result<BrowserLayoutReport, Diagnostic> {
    let mut report = BrowserLayoutReport::default();

    relocate_model(fs, dir, &mut report)?;

    if let Some(ref reference) = options.reference_dir {
        for name in TOKENIZER_FILES {
            let target = dir.join(name);
            let source = reference.join(name);
            if !fs.is_file(&target) && fs.is_file(&source) {
                std::fs::copy(&source, &target)?;
                report.copied.push(name.to_string());
            }
        }
    }

    if let Some(ref key) = options.strip_config_key {
        report.stripped_config_key = strip_config_key(fs, &dir.join("config.json"), key)?;
    }

    for name in REQUIRED_FILES {
        if !fs.is_file(&dir.join(name)) {
            warn!(dir = %dir.display(), file = name, "browser bundle is missing a required file");
            report.missing.push(name.to_string());
        }
    }

    info!(
        dir = %dir.display(),
        relocated = report.relocated.len(),
        copied = report.copied.len(),
        stripped = report.stripped_config_key,
        "prepared browser layout"
    );
    Ok(report)
}

fn relocate_model(fs: &dyn FileSystem, dir: &Path, report: &mut BrowserLayoutReport) -> Result<(), Diagnostic> {
    let target = dir.join(BROWSER_MODEL_PATH);
    if fs.is_file(&target) {
        return Ok(());
    }
    let Ok(found) = resolve_model_file(fs, dir) else {
        return Ok(());
    };

    let onnx_dir = dir.join("onnx");
    std::fs::create_dir_all(&onnx_dir)?;
    std::fs::rename(&found, &target)?;
    report.relocated.push(target);

    // External weights keep their name; the graph refers to them by it.
    if let Some(name) = found.file_name() {
        let mut data_name = name.to_os_string();
        data_name.push("_data");
        let data = found.with_file_name(&data_name);
        if fs.is_file(&data) {
            let data_target = onnx_dir.join(&data_name);
            std::fs::rename(&data, &data_target)?;
            report.relocated.push(data_target);
        }
    }
    Ok(())
}

fn strip_config_key(fs: &dyn FileSystem, path: &Path, key: &str) -> Result<bool, Diagnostic> {
    if !fs.is_file(path) {
        return Ok(false);
    }
    let mut config: Value = match serde_json::from_str(&std::fs::read_to_string(path)?) {
        Ok(config) => config,
        Err(e) => {
            warn!(config = %path.display(), error = %e, "config is not valid JSON, leaving it unchanged");
            return Ok(false);
        }
    };
    let removed = config.as_object_mut().and_then(|map| map.remove(key)).is_some();
    if removed {
        std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
        info!(key, config = %path.display(), "removed config key");
    }
    Ok(removed)
}
