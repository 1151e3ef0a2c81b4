//! # Banknote CNN
//!
//! Trains a small convolutional network to recognize banknotes from photos
//! using the Burn framework, then evaluates it and exports it for reuse.
//!
//! ## Modules
//!
//! - `dataset`: Image folder scanning, decoding and stratified splits
//! - `model`: CNN architecture, layer summary and model builder
//! - `training`: Adadelta optimizer, epoch loop and run log directory
//! - `evaluation`: Test metrics, classification report and confusion matrix
//! - `export`: Architecture JSON, checkpoint and frozen ONNX graph
//! - `pipeline`: The end-to-end run
//! - `utils`: Logging, metrics, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use banknote_cnn::backend::{default_device, TrainingBackend};
//! use banknote_cnn::config::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let report = banknote_cnn::pipeline::run::<TrainingBackend>(&config, &default_device())?;
//! println!("test accuracy: {:.2}", report.evaluation.accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{make_hparam_string, HyperParams, PipelineConfig};
pub use dataset::{read_datasets, BanknoteBatcher, BanknoteDataset, DataSplit, Datasets};
pub use evaluation::{evaluate, plot_confusion_matrix, EvaluationReport};
pub use export::{save_model, ExportedArtifacts};
pub use model::{build_model, get_model_memory_usage, BanknoteClassifier, CompiledModel, INPUT_NODE, OUTPUT_NODE};
pub use pipeline::RunReport;
pub use training::{train, EpochRecord, Trainer};
pub use utils::error::{BanknoteError, Result};
pub use utils::metrics::{ClassificationReport, ConfusionMatrix};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
