use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("invalid dataset options: {0}")]
    InvalidOptions(String),

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}
