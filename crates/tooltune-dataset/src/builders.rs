use crate::dataset::{Dataset, SplitDataset, TrainingSample};
use crate::encoder::json_text;
use crate::error::{DatasetError, DatasetResult};
use crate::loader::{load_examples, load_tools};
use crate::sample::compose_sample;
use crate::schema::{ToolSchema, TrainingExample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const TRAIN_FILE: &str = "train.jsonl";
pub const VALID_FILE: &str = "valid.jsonl";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    pub seed: u64,
    /// Fraction of samples assigned to the train partition, in `(0, 1)`.
    pub train_fraction: f64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self { seed: 42, train_fraction: 0.85 }
    }
}

impl SplitOptions {
    pub fn validate(&self) -> DatasetResult<()> {
        if !self.train_fraction.is_finite() || self.train_fraction <= 0.0 || self.train_fraction >= 1.0 {
            return Err(DatasetError::InvalidOptions(format!(
                "train fraction must be between 0 and 1 (exclusive), got {}",
                self.train_fraction
            )));
        }
        Ok(())
    }

    /// Number of samples that go to the train partition.
    pub fn split_index(&self, len: usize) -> usize {
        ((len as f64) * self.train_fraction).floor() as usize
    }
}

/// Loads inputs from disk and builds a split dataset.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    tools_path: PathBuf,
    examples_path: PathBuf,
    options: SplitOptions,
}

impl DatasetBuilder {
    #[must_use]
    pub fn from_sources(tools_path: impl Into<PathBuf>, examples_path: impl Into<PathBuf>) -> Self {
        Self { tools_path: tools_path.into(), examples_path: examples_path.into(), options: SplitOptions::default() }
    }

    #[must_use]
    pub fn with_options(mut self, options: SplitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(&self) -> DatasetResult<SplitDataset> {
        self.options.validate()?;
        let tools = load_tools(&self.tools_path)?;
        let examples = load_examples(&self.examples_path)?;
        info!(
            tools = tools.len(),
            examples = examples.len(),
            tools_path = %self.tools_path.display(),
            examples_path = %self.examples_path.display(),
            "loaded dataset inputs"
        );
        build_dataset(&tools, &examples, &self.options)
    }

    /// Builds the dataset and writes both partitions into `output_dir`.
    pub fn build_and_write(&self, output_dir: &Path) -> DatasetResult<SplitDataset> {
        let split = self.build()?;
        write_split(output_dir, &split)?;
        Ok(split)
    }
}

/// Renders every example, shuffles with a seeded RNG and splits train/valid.
pub fn build_dataset(
    tools: &[ToolSchema],
    examples: &[TrainingExample],
    options: &SplitOptions,
) -> DatasetResult<SplitDataset> {
    options.validate()?;

    let mut samples: Dataset = examples.iter().filter_map(|ex| compose_sample(ex, tools)).collect();
    let dropped = examples.len() - samples.len();
    if dropped > 0 {
        info!(dropped, "dropped examples without expected tool calls");
    }
    info!(samples = samples.len(), "generated training samples");

    let mut rng = StdRng::seed_from_u64(options.seed);
    Ok(shuffle_and_split(&mut samples, &mut rng, options))
}

fn shuffle_and_split(samples: &mut Dataset, rng: &mut StdRng, options: &SplitOptions) -> SplitDataset {
    samples.shuffle(rng);

    let split = options.split_index(samples.len());
    let valid = samples.split_off(split);
    let train = std::mem::take(samples);

    if train.is_empty() || valid.is_empty() {
        warn!(train = train.len(), valid = valid.len(), "dataset partition is empty");
    }

    SplitDataset { train, valid }
}

/// Writes `train.jsonl` and `valid.jsonl` into `dir`.
///
/// Both files are rendered before anything touches the filesystem. Lines use the
/// spaced, ASCII-only JSON of [`json_text`], e.g. `{"text": "..."}`.
pub fn write_split(dir: &Path, split: &SplitDataset) -> DatasetResult<(PathBuf, PathBuf)> {
    let train = render_jsonl(&split.train)?;
    let valid = render_jsonl(&split.valid)?;

    std::fs::create_dir_all(dir)?;
    let train_path = dir.join(TRAIN_FILE);
    let valid_path = dir.join(VALID_FILE);
    std::fs::write(&train_path, train)?;
    std::fs::write(&valid_path, valid)?;

    info!(
        train = split.train.len(),
        valid = split.valid.len(),
        dir = %dir.display(),
        "wrote dataset partitions"
    );
    Ok((train_path, valid_path))
}

fn render_jsonl(samples: &[TrainingSample]) -> DatasetResult<String> {
    let mut out = String::new();
    for sample in samples {
        out.push_str(&json_text(&serde_json::to_value(sample)?));
        out.push('\n');
    }
    Ok(out)
}

pub fn read_jsonl_samples(path: &Path) -> DatasetResult<Dataset> {
    let contents = std::fs::read_to_string(path)?;
    let mut dataset = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: TrainingSample = serde_json::from_str(line).map_err(|e| {
            DatasetError::Dataset(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;
        dataset.push(sample);
    }

    Ok(dataset)
}

/// Number of non-empty lines in a JSONL file.
pub fn count_jsonl_records(path: &Path) -> DatasetResult<usize> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.lines().filter(|l| !l.trim().is_empty()).count())
}
