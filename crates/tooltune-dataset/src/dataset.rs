use crate::error::DatasetResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One rendered training conversation, stored as `{"text": ...}` per JSONL line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub text: String,
}

pub type Dataset = Vec<TrainingSample>;

/// Train/validation partitions of a shuffled dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDataset {
    pub train: Dataset,
    pub valid: Dataset,
}

impl SplitDataset {
    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.valid.is_empty()
    }

    /// Identity of the whole dataset in partition order (train, then valid).
    pub fn id(&self) -> DatasetResult<DatasetId> {
        let all: Vec<&TrainingSample> = self.train.iter().chain(&self.valid).collect();
        compute_dataset_id(all)
    }
}

pub fn compute_dataset_id<'a>(samples: impl IntoIterator<Item = &'a TrainingSample>) -> DatasetResult<DatasetId> {
    let mut hasher = Sha256::new();

    for sample in samples {
        let bytes = serde_json::to_vec(sample)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}
