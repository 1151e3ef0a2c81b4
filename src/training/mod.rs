//! Training module
//!
//! This module provides:
//! - The Adadelta optimizer used to compile the classifier
//! - The epoch loop with per-epoch validation
//! - The run log directory (TensorBoard events and a metrics CSV)

pub mod adadelta;
pub mod run_log;
pub mod trainer;

pub use adadelta::{Adadelta, AdadeltaConfig};
pub use run_log::RunLog;
pub use trainer::{train, EpochRecord, FitOptions, Trainer, TrainingOutcome};
