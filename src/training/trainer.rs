//! Training loop for the banknote classifier
//!
//! This module implements the supervised fit loop using the Burn framework:
//! - Per-epoch reshuffle of the training split
//! - Forward/backward passes with categorical cross-entropy
//! - Adadelta parameter updates
//! - Validation after every epoch (no gradients, dropout disabled)
//! - Epoch history streamed to the run log directory

use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLoss,
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::run_log::RunLog;
use crate::dataset::{BanknoteBatch, BanknoteBatcher, BanknoteDataset, DataSplit};
use crate::evaluation::predict_split;
use crate::model::{BanknoteClassifier, ClassifierOptimizer, CompiledModel};
use crate::utils::error::{BanknoteError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::RunningAverage;

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch index (0-based)
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// Absent when the validation split is empty
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    /// Wall-clock duration of the epoch
    pub seconds: f64,
}

/// Options of a fit run
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub batch_size: usize,
    pub epochs: usize,
    /// Seed of the per-epoch shuffles
    pub seed: u64,
    /// Show a per-batch progress bar
    pub progress: bool,
}

impl FitOptions {
    pub fn new(batch_size: usize, epochs: usize) -> Self {
        Self {
            batch_size,
            epochs,
            seed: 42,
            progress: true,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Trained network and its epoch history
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: BanknoteClassifier<B>,
    pub history: Vec<EpochRecord>,
}

/// Trainer for the BanknoteClassifier model
pub struct Trainer<B: AutodiffBackend> {
    /// Model being trained
    pub model: BanknoteClassifier<B>,
    optimizer: ClassifierOptimizer<B>,
    loss: CrossEntropyLoss<B>,
    learning_rate: f64,
    device: B::Device,
    /// Finished epochs
    pub history: Vec<EpochRecord>,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer from a compiled model
    pub fn new(compiled: CompiledModel<B>, device: B::Device) -> Self {
        Self {
            model: compiled.model,
            optimizer: compiled.optimizer,
            loss: compiled.loss,
            learning_rate: compiled.learning_rate,
            device,
            history: Vec::new(),
        }
    }

    /// Run one pass over the training set in the given order
    ///
    /// # Returns
    /// * (mean loss per sample, accuracy)
    pub fn train_epoch(
        &mut self,
        dataset: &BanknoteDataset,
        order: &[usize],
        batch_size: usize,
        progress: Option<&ProgressBar>,
    ) -> (f64, f64) {
        let batcher = BanknoteBatcher::new(dataset.image_dims());
        let mut loss_avg = RunningAverage::new();
        let mut correct = 0usize;

        for batch_indices in order.chunks(batch_size.max(1)) {
            let n = batch_indices.len();
            let batch: BanknoteBatch<B> = batcher.batch(dataset.items_at(batch_indices), &self.device);

            let output = self.model.forward(batch.images);
            let loss = self.loss.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_avg.add_weighted(loss_value, n);

            let batch_correct: i64 = output
                .argmax(1)
                .reshape([n])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);

            if let Some(pb) = progress {
                pb.inc(n as u64);
                pb.set_message(format!(
                    "loss: {:.4} - acc: {:.4}",
                    loss_avg.average(),
                    correct as f64 / loss_avg.count() as f64
                ));
            }
        }

        let accuracy = if loss_avg.count() > 0 {
            correct as f64 / loss_avg.count() as f64
        } else {
            0.0
        };
        (loss_avg.average(), accuracy)
    }

    /// Loss and accuracy on a split with the inference model
    pub fn validate(&self, dataset: &BanknoteDataset, batch_size: usize) -> Result<Option<(f64, f64)>> {
        if dataset.is_empty() {
            return Ok(None);
        }
        let model = self.model.valid();
        let predicted = predict_split(&model, dataset, batch_size, &self.device)?;
        Ok(Some((predicted.loss, predicted.accuracy)))
    }

    /// Current `conv2d_1` kernel values with their `[out, in, k, k]` dims
    fn first_kernels(&self) -> Result<([usize; 4], Vec<f32>)> {
        let weight = self.model.conv2d_1.weight.val();
        let dims = weight.dims();
        let values = weight
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| BanknoteError::Training(format!("failed to read conv2d_1 kernels: {:?}", e)))?;
        Ok((dims, values))
    }

    /// Train for `options.epochs` full passes, validating after each one
    pub fn fit(
        mut self,
        train: &DataSplit,
        valid: &DataSplit,
        options: &FitOptions,
        mut run_log: Option<&mut RunLog>,
    ) -> Result<TrainingOutcome<B>> {
        if train.is_empty() {
            return Err(BanknoteError::Training("training split is empty".to_string()));
        }
        if options.batch_size == 0 || options.epochs == 0 {
            return Err(BanknoteError::Config(
                "batch size and epoch count must be greater than 0".to_string(),
            ));
        }

        let train_set = BanknoteDataset::from_split(train);
        let valid_set = BanknoteDataset::from_split(valid);

        info!(
            "Train on {} samples, validate on {} samples",
            train_set.len(),
            valid_set.len()
        );

        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        let mut order: Vec<usize> = (0..train_set.len()).collect();
        let mut logger = TrainingLogger::new(options.epochs);

        for epoch in 0..options.epochs {
            logger.start_epoch(epoch);
            let started = Instant::now();
            order.shuffle(&mut rng);

            let pb = options.progress.then(|| epoch_progress_bar(train_set.len(), epoch, options.epochs));
            let (train_loss, train_accuracy) =
                self.train_epoch(&train_set, &order, options.batch_size, pb.as_ref());
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }

            let validation = self.validate(&valid_set, options.batch_size)?;
            let record = EpochRecord {
                epoch,
                train_loss,
                train_accuracy,
                val_loss: validation.map(|(l, _)| l),
                val_accuracy: validation.map(|(_, a)| a),
                seconds: started.elapsed().as_secs_f64(),
            };

            logger.end_epoch(train_loss, train_accuracy, record.val_loss, record.val_accuracy);
            if let Some(log) = run_log.as_deref_mut() {
                log.record_epoch(&record)?;
                let (dims, values) = self.first_kernels()?;
                log.record_kernels(dims, &values, epoch);
            }
            self.history.push(record);
        }
        logger.log_complete();

        Ok(TrainingOutcome {
            model: self.model,
            history: self.history,
        })
    }
}

fn epoch_progress_bar(len: usize, epoch: usize, epochs: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_prefix(format!("Epoch {}/{}", epoch + 1, epochs));
    pb
}

/// Fit a compiled model on the training split, monitoring the validation split
///
/// Every epoch is streamed to `run_log` (scalars, kernel image and a
/// `metrics.csv` row). Returns the trained model with its epoch history.
pub fn train<B: AutodiffBackend>(
    compiled: CompiledModel<B>,
    train: &DataSplit,
    valid: &DataSplit,
    options: &FitOptions,
    run_log: &mut RunLog,
    device: &B::Device,
) -> Result<TrainingOutcome<B>> {
    debug!("Training with lr {} for {} epochs", compiled.learning_rate, options.epochs);

    Trainer::new(compiled, device.clone()).fit(train, valid, options, Some(run_log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::model::build_model;
    use burn::module::Module;

    fn toy_split(n: usize) -> DataSplit {
        // Class 0 dark, class 1 bright
        let labels: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let images = labels
            .iter()
            .map(|&l| vec![if l == 0 { 0.1 } else { 0.9 }; 3 * 8 * 8])
            .collect();
        DataSplit::from_labels(images, &labels, [3, 8, 8], 2).unwrap()
    }

    #[test]
    fn test_fit_records_history() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let compiled = build_model::<TrainingBackend>(8, 3, 2, 1.0, &device).unwrap();
        let options = FitOptions::new(4, 2).with_progress(false);

        let mut run_log = RunLog::create(dir.path(), true).unwrap();
        let outcome = train(compiled, &toy_split(10), &toy_split(4), &options, &mut run_log, &device).unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[1].epoch, 1);
        assert!(outcome.history.iter().all(|r| r.train_loss.is_finite()));
        assert!(outcome.history.iter().all(|r| r.val_accuracy.is_some()));
        let csv = std::fs::read_to_string(dir.path().join(super::super::run_log::METRICS_FILE)).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_parameters_change_after_epoch() {
        let device = Default::default();
        let compiled = build_model::<TrainingBackend>(8, 3, 2, 1.0, &device).unwrap();
        let before: Vec<f32> = compiled.model.dense_2.weight.val().into_data().to_vec().unwrap();

        let mut trainer = Trainer::new(compiled, device);
        let dataset = BanknoteDataset::from_split(&toy_split(6));
        let order: Vec<usize> = (0..6).collect();
        let (loss, acc) = trainer.train_epoch(&dataset, &order, 3, None);

        let after: Vec<f32> = trainer.model.dense_2.weight.val().into_data().to_vec().unwrap();
        assert_ne!(before, after);
        assert!(loss > 0.0);
        assert!((0.0..=1.0).contains(&acc));
        assert!(trainer.model.num_params() > 0);
    }

    #[test]
    fn test_empty_validation_is_allowed() {
        let device = Default::default();
        let compiled = build_model::<TrainingBackend>(8, 3, 2, 1.0, &device).unwrap();
        let options = FitOptions::new(8, 1).with_progress(false);
        let empty = DataSplit::empty([3, 8, 8], 2);

        let outcome = Trainer::new(compiled, device).fit(&toy_split(6), &empty, &options, None).unwrap();
        assert_eq!(outcome.history[0].val_loss, None);
    }

    #[test]
    fn test_empty_training_split_fails() {
        let device = Default::default();
        let compiled = build_model::<TrainingBackend>(8, 3, 2, 1.0, &device).unwrap();
        let options = FitOptions::new(8, 1).with_progress(false);
        let empty = DataSplit::empty([3, 8, 8], 2);

        let result = Trainer::new(compiled, device).fit(&empty, &toy_split(4), &options, None);
        assert!(matches!(result, Err(BanknoteError::Training(_))));
    }
}
