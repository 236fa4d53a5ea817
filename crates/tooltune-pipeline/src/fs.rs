//! Filesystem probing used to locate artifacts produced by external tools.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Relative locations an exporter may leave the ONNX graph at, in lookup order.
pub const MODEL_FILE_CANDIDATES: [&str; 3] = ["model.onnx", "onnx/model.onnx", "decoder_model.onnx"];

pub trait FileSystem: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// In-memory file set; parent directories of every added file exist implicitly.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.add_file(path);
        self
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into());
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        self.files.lock().map(|files| files.contains(path)).unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .lock()
            .map(|files| files.iter().any(|f| f != path && f.starts_with(path)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("none of the expected files exist: {}", format_candidates(.searched))]
pub struct NotFound {
    pub searched: Vec<PathBuf>,
}

fn format_candidates(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// First candidate that exists as a file.
pub fn resolve_artifact_path<I, P>(fs: &dyn FileSystem, candidates: I) -> Result<PathBuf, NotFound>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut searched = Vec::new();
    for candidate in candidates {
        let candidate = candidate.into();
        if fs.is_file(&candidate) {
            return Ok(candidate);
        }
        searched.push(candidate);
    }
    Err(NotFound { searched })
}

/// Locates the ONNX graph inside an export directory.
pub fn resolve_model_file(fs: &dyn FileSystem, dir: &Path) -> Result<PathBuf, NotFound> {
    resolve_artifact_path(fs, MODEL_FILE_CANDIDATES.iter().map(|c| dir.join(c)))
}
