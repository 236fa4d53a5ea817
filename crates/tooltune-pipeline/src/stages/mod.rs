//! Stage adapters, one per external operation.

pub mod browser;
pub mod fuse;
pub mod gate;
pub mod generate;
pub mod mlc;
pub mod onnx;
pub mod quantize;
pub mod train;

pub use browser::{normalize_browser_layout, BrowserLayoutOptions, BrowserLayoutReport};
pub use fuse::FuseAdapterOperation;
pub use gate::{GateBackend, SmokeGate};
pub use generate::GenerateDataOperation;
pub use mlc::{CompileOperation, ExportMlcOperation};
pub use onnx::ExportOnnxOperation;
pub use quantize::QuantizeOperation;
pub use train::TrainAdapterOperation;
