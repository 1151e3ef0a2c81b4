//! Model evaluation
//!
//! Runs the trained network over a split without gradients and turns the
//! predictions into the test report:
//! - Test loss and accuracy
//! - Per-class precision / recall / F1 / support
//! - Confusion matrix, printed and rendered as an SVG heat-map

use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{BanknoteBatch, BanknoteBatcher, BanknoteDataset, DataSplit};
use crate::model::BanknoteClassifier;
use crate::utils::charts;
use crate::utils::error::{BanknoteError, Result};
use crate::utils::metrics::{ClassificationReport, ConfusionMatrix, RunningAverage};

/// File name of the heat-map inside the run log directory
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.svg";

/// Loss, accuracy and hard predictions of a model over one split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitPredictions {
    /// Mean categorical cross-entropy per sample
    pub loss: f64,
    pub accuracy: f64,
    /// Arg-max class per sample
    pub predictions: Vec<usize>,
    /// True class per sample
    pub targets: Vec<usize>,
}

impl SplitPredictions {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Run a model over a dataset in batches, without gradients
///
/// Pass an inference model (`model.valid()`) so dropout is disabled.
pub fn predict_split<B: Backend>(
    model: &BanknoteClassifier<B>,
    dataset: &BanknoteDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<SplitPredictions> {
    let batcher = BanknoteBatcher::new(dataset.image_dims());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss = RunningAverage::new();
    let mut predictions = Vec::with_capacity(dataset.len());
    let mut targets = Vec::with_capacity(dataset.len());

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let n = chunk.len();
        let batch: BanknoteBatch<B> = batcher.batch(dataset.items_at(chunk), device);

        let logits = model.forward(batch.images);
        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss.add_weighted(batch_loss, n);

        predictions.extend(int_values(logits.argmax(1).reshape([n]))?);
        targets.extend(int_values(batch.targets)?);
    }

    let correct = predictions
        .iter()
        .zip(&targets)
        .filter(|(p, t)| p == t)
        .count();
    let accuracy = if targets.is_empty() {
        0.0
    } else {
        correct as f64 / targets.len() as f64
    };

    Ok(SplitPredictions {
        loss: loss.average(),
        accuracy,
        predictions,
        targets,
    })
}

fn int_values<B: Backend>(tensor: burn::tensor::Tensor<B, 1, burn::tensor::Int>) -> Result<Vec<usize>> {
    let values: Vec<i64> = tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| BanknoteError::Training(format!("failed to read predictions: {:?}", e)))?;
    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
}

/// Everything the evaluator computed on the test split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub confusion_matrix: ConfusionMatrix,
}

/// Evaluate a trained model on the test split and print the report
///
/// When `plot_dir` is given the confusion-matrix heat-map is written there.
pub fn evaluate<B: Backend>(
    model: &BanknoteClassifier<B>,
    classes: &[String],
    test: &DataSplit,
    batch_size: usize,
    device: &B::Device,
    plot_dir: Option<&Path>,
) -> Result<EvaluationReport> {
    println!("{}", "_".repeat(65));

    if test.is_empty() {
        warn!("Test split is empty; reporting zero metrics");
    }

    let dataset = BanknoteDataset::from_split(test);
    let predicted = predict_split(model, &dataset, batch_size, device)?;

    println!(
        "Summary: Loss over the testing dataset: {:.2}, Accuracy: {:.2}",
        predicted.loss, predicted.accuracy
    );

    let confusion_matrix =
        ConfusionMatrix::from_predictions(&predicted.predictions, &predicted.targets, classes.len());
    let report = ClassificationReport::from_confusion_matrix(&confusion_matrix, classes);
    println!("{}", report);

    let output = plot_dir.map(|dir| dir.join(CONFUSION_MATRIX_FILE));
    plot_confusion_matrix(&confusion_matrix, classes, false, "Confusion matrix", output.as_deref())?;
    println!("{}", "=".repeat(65));

    info!(
        "Test loss: {:.4} | test accuracy: {:.4} ({} samples)",
        predicted.loss,
        predicted.accuracy,
        predicted.len()
    );

    Ok(EvaluationReport {
        loss: predicted.loss,
        accuracy: predicted.accuracy,
        report,
        confusion_matrix,
    })
}

/// Print a confusion matrix and optionally draw it as an SVG heat-map
///
/// With `normalize` every row is divided by its sum (empty rows stay zero).
/// Returns the values that were printed and drawn.
pub fn plot_confusion_matrix(
    cm: &ConfusionMatrix,
    classes: &[String],
    normalize: bool,
    title: &str,
    output_path: Option<&Path>,
) -> Result<Vec<Vec<f64>>> {
    let values = if normalize {
        println!("Normalized confusion matrix");
        cm.normalize_rows()
    } else {
        println!("Confusion matrix, without normalization");
        cm.as_f64_rows()
    };
    println!("{}", format_matrix(&values, normalize));

    if let Some(path) = output_path {
        let svg = charts::render_heatmap(title, &values, classes, normalize);
        std::fs::write(path, svg)?;
        info!("Confusion matrix plot written to {:?}", path);
    }

    Ok(values)
}

/// Bracketed matrix text, columns right-aligned
pub fn format_matrix(values: &[Vec<f64>], fractional: bool) -> String {
    let cell = |v: f64| {
        if fractional {
            format!("{:.2}", v)
        } else {
            format!("{}", v.round() as i64)
        }
    };
    let width = values
        .iter()
        .flatten()
        .map(|&v| cell(v).len())
        .max()
        .unwrap_or(1);

    let rows: Vec<String> = values
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|&v| format!("{:>w$}", cell(v), w = width)).collect();
            format!("[{}]", cells.join(" "))
        })
        .collect();

    format!("[{}]", rows.join("\n "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BanknoteClassifierConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn labels() -> Vec<String> {
        vec!["100".to_string(), "1000".to_string()]
    }

    #[test]
    fn test_plot_unnormalized_keeps_counts() {
        let cm = ConfusionMatrix::from_rows(&[vec![50, 0], vec![0, 50]]).unwrap();
        let values = plot_confusion_matrix(&cm, &labels(), false, "Confusion matrix", None).unwrap();
        assert_eq!(values, vec![vec![50.0, 0.0], vec![0.0, 50.0]]);
    }

    #[test]
    fn test_plot_normalized_rows_sum_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFUSION_MATRIX_FILE);
        let cm = ConfusionMatrix::from_rows(&[vec![50, 0], vec![0, 50]]).unwrap();

        let values = plot_confusion_matrix(&cm, &labels(), true, "Normalized", Some(&path)).unwrap();
        for row in &values {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains(">1.00<"));
        assert!(svg.contains("fill=\"white\""));
    }

    #[test]
    fn test_format_matrix() {
        let text = format_matrix(&[vec![50.0, 0.0], vec![3.0, 47.0]], false);
        assert_eq!(text, "[[50  0]\n [ 3 47]]");
        let text = format_matrix(&[vec![1.0, 0.0]], true);
        assert_eq!(text, "[[1.00 0.00]]");
    }

    #[test]
    fn test_predict_split() {
        let device = Default::default();
        let model = BanknoteClassifierConfig::new(2)
            .with_image_size(8)
            .init::<TestBackend>(&device);

        let images = (0..5).map(|i| vec![i as f32 / 5.0; 3 * 8 * 8]).collect();
        let split = DataSplit::from_labels(images, &[0, 1, 0, 1, 1], [3, 8, 8], 2).unwrap();
        let dataset = BanknoteDataset::from_split(&split);

        let predicted = predict_split(&model, &dataset, 2, &device).unwrap();
        assert_eq!(predicted.len(), 5);
        assert_eq!(predicted.targets, vec![0, 1, 0, 1, 1]);
        assert!(predicted.predictions.iter().all(|&p| p < 2));
        assert!(predicted.loss.is_finite() && predicted.loss > 0.0);
        assert!((0.0..=1.0).contains(&predicted.accuracy));
    }

    #[test]
    fn test_evaluate_writes_heatmap() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let model = BanknoteClassifierConfig::new(2)
            .with_image_size(8)
            .init::<TestBackend>(&device);
        let images = (0..4).map(|_| vec![0.5; 3 * 8 * 8]).collect();
        let split = DataSplit::from_labels(images, &[0, 1, 1, 0], [3, 8, 8], 2).unwrap();

        let report = evaluate(&model, &labels(), &split, 3, &device, Some(dir.path())).unwrap();
        assert_eq!(report.confusion_matrix.total(), 4);
        assert_eq!(report.report.total_support, 4);
        assert!(dir.path().join(CONFUSION_MATRIX_FILE).exists());
    }
}
