//! Dataset module for banknote image data
//!
//! This module provides functionality for:
//! - Scanning a class-per-directory image folder and decoding images
//! - Stratified train / validation / test splitting
//! - Burn `Dataset` and `Batcher` implementations for the training loop

pub mod burn_dataset;
pub mod loader;
pub mod split;

// Re-export main types for convenience
pub use burn_dataset::{BanknoteBatch, BanknoteBatcher, BanknoteDataset, BanknoteItem};
pub use loader::{DatasetStats, ImageDirectory, ImageSample};
pub use split::{read_datasets, read_datasets_with_seed, DataSplit, Datasets};
