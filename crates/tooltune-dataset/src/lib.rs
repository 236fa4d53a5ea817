//! Tooltune Dataset
//!
//! Turns tool schemas and example conversations into training data for a
//! function-calling model:
//! - Encoding schemas and calls into the model's escaped grammar (`encoder`)
//! - Rendering one conversation per example (`sample`)
//! - Loading inputs, shuffling, splitting and writing JSONL partitions (`builders`)

pub mod builders;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod sample;
pub mod schema;

pub use builders::{
    build_dataset, count_jsonl_records, read_jsonl_samples, write_split, DatasetBuilder, SplitOptions, TRAIN_FILE,
    VALID_FILE,
};
pub use dataset::{compute_dataset_id, Dataset, DatasetId, SplitDataset, TrainingSample};
pub use encoder::{encode_call, encode_declaration};
pub use error::{DatasetError, DatasetResult};
pub use loader::{load_examples, load_tools};
pub use sample::{compose_sample, has_protocol_markers, smoke_prompt, PROTOCOL_MARKERS};
pub use schema::{ParameterSchema, Properties, PropertySchema, ToolCall, ToolSchema, TrainingExample};
