//! Loading tool schemas and training examples from disk.

use crate::error::{DatasetError, DatasetResult};
use crate::schema::{ToolSchema, TrainingExample};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A tools file holds either one schema or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolsDocument {
    Many(Vec<ToolSchema>),
    One(ToolSchema),
}

impl ToolsDocument {
    fn into_vec(self) -> Vec<ToolSchema> {
        match self {
            Self::Many(tools) => tools,
            Self::One(tool) => vec![tool],
        }
    }
}

/// Load tool schemas from a JSON file or a directory of `*.json` files.
///
/// Directory entries are read in filename order so the declaration block, and with it
/// every rendered sample, is identical on every platform.
pub fn load_tools(path: &Path) -> DatasetResult<Vec<ToolSchema>> {
    if !path.exists() {
        return Err(DatasetError::MissingInput(path.to_path_buf()));
    }

    let files = if path.is_dir() { tool_files_in(path)? } else { vec![path.to_path_buf()] };

    let mut tools = Vec::new();
    for file in &files {
        let doc: ToolsDocument = read_json(file)?;
        let loaded = doc.into_vec();
        debug!(file = %file.display(), count = loaded.len(), "loaded tool schemas");
        tools.extend(loaded);
    }

    for tool in &tools {
        let undeclared = tool.undeclared_required();
        if !undeclared.is_empty() {
            warn!(tool = %tool.name, missing = ?undeclared, "required parameters not declared in properties");
        }
    }

    Ok(tools)
}

fn tool_files_in(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Load the training examples array.
pub fn load_examples(path: &Path) -> DatasetResult<Vec<TrainingExample>> {
    if !path.exists() {
        return Err(DatasetError::MissingInput(path.to_path_buf()));
    }
    read_json(path)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> DatasetResult<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| DatasetError::Parse { path: path.to_path_buf(), source })
}
