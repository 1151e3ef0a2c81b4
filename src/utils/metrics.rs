//! Metrics Module for Model Evaluation
//!
//! Classification metrics for the banknote test split:
//! - Confusion matrix (row = actual, column = predicted)
//! - Per-class precision, recall, F1 and support
//! - A plain-text classification report with accuracy, macro and weighted averages

use serde::{Deserialize, Serialize};

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted), row-major
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build from square rows of counts
    ///
    /// Returns `None` when the rows are not square.
    pub fn from_rows(rows: &[Vec<usize>]) -> Option<Self> {
        let n = rows.len();
        if rows.iter().any(|r| r.len() != n) {
            return None;
        }
        Some(Self {
            num_classes: n,
            matrix: rows.iter().flatten().copied().collect(),
        })
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Total number of samples
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Largest cell value
    pub fn max(&self) -> usize {
        self.matrix.iter().copied().max().unwrap_or(0)
    }

    /// Row sums (actual class counts)
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Counts as f64 rows
    pub fn as_f64_rows(&self) -> Vec<Vec<f64>> {
        (0..self.num_classes)
            .map(|row| {
                (0..self.num_classes)
                    .map(|col| self.get(row, col) as f64)
                    .collect()
            })
            .collect()
    }

    /// Normalize the matrix so every non-empty row sums to 1
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        let row_sums = self.row_sums();

        (0..self.num_classes)
            .map(|row| {
                let sum = row_sums[row] as f64;
                (0..self.num_classes)
                    .map(|col| {
                        if sum > 0.0 {
                            self.get(row, col) as f64 / sum
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP), 0 when nothing was predicted as this class
    pub precision: f64,
    /// TP / (TP + FN), 0 when the class has no samples
    pub recall: f64,
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let support = true_positives + false_negatives;

        let precision = if true_positives + false_positives > 0 {
            true_positives as f64 / (true_positives + false_positives) as f64
        } else {
            0.0
        };

        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    /// Set the class name
    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }
}

/// Per-class precision/recall/F1 table with summary rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,
    pub total_support: usize,
}

impl ClassificationReport {
    /// Build the report from a confusion matrix and the ordered class names
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Self {
        let per_class: Vec<ClassMetrics> = (0..cm.num_classes)
            .map(|idx| {
                let metrics = ClassMetrics::from_confusion_matrix(cm, idx);
                match class_names.get(idx) {
                    Some(name) => metrics.with_name(name),
                    None => metrics,
                }
            })
            .collect();

        let n = per_class.len().max(1) as f64;
        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weight = |f: fn(&ClassMetrics) -> f64| -> f64 {
            if total_support == 0 {
                return 0.0;
            }
            per_class
                .iter()
                .map(|m| f(m) * m.support as f64)
                .sum::<f64>()
                / total_support as f64
        };

        Self {
            accuracy: cm.accuracy(),
            macro_precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
            macro_recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
            macro_f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
            weighted_precision: weight(|m| m.precision),
            weighted_recall: weight(|m| m.recall),
            weighted_f1: weight(|m| m.f1),
            total_support,
            per_class,
        }
    }

    /// Render as a fixed-width text table
    pub fn display(&self) -> String {
        let name_width = self
            .per_class
            .iter()
            .filter_map(|m| m.class_name.as_ref().map(|n| n.len()))
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        let mut output = String::new();
        output.push_str(&format!(
            "{:>w$} {:>9} {:>9} {:>9} {:>9}\n\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            w = name_width
        ));

        for m in &self.per_class {
            let name = m
                .class_name
                .clone()
                .unwrap_or_else(|| m.class_idx.to_string());
            output.push_str(&format!(
                "{:>w$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
                name,
                m.precision,
                m.recall,
                m.f1,
                m.support,
                w = name_width
            ));
        }

        output.push('\n');
        output.push_str(&format!(
            "{:>w$} {:>9} {:>9} {:>9.2} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_support,
            w = name_width
        ));
        output.push_str(&format!(
            "{:>w$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
            "macro avg",
            self.macro_precision,
            self.macro_recall,
            self.macro_f1,
            self.total_support,
            w = name_width
        ));
        output.push_str(&format!(
            "{:>w$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
            "weighted avg",
            self.weighted_precision,
            self.weighted_recall,
            self.weighted_f1,
            self.total_support,
            w = name_width
        ));

        output
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Running average for tracking loss during an epoch
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value with a weight (e.g. batch size)
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("note_{}", i)).collect()
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(ConfusionMatrix::from_rows(&[vec![1, 2], vec![3]]).is_none());
        let cm = ConfusionMatrix::from_rows(&[vec![50, 0], vec![0, 50]]).unwrap();
        assert_eq!(cm.max(), 50);
        assert_eq!(cm.row_sums(), vec![50, 50]);
    }

    #[test]
    fn test_normalize_rows_sum_to_one() {
        let cm = ConfusionMatrix::from_rows(&[vec![3, 1, 0], vec![2, 2, 4], vec![0, 0, 0]]).unwrap();
        let norm = cm.normalize_rows();
        for row in &norm[..2] {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        // Empty row stays zero instead of NaN
        assert!(norm[2].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.support, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_perfect_predictions() {
        let cm = ConfusionMatrix::from_rows(&[vec![50, 0], vec![0, 50]]).unwrap();
        let report = ClassificationReport::from_confusion_matrix(&cm, &names(2));

        assert_eq!(report.total_support, 100);
        assert!((report.accuracy - 1.0).abs() < 1e-9);
        assert!((report.macro_f1 - 1.0).abs() < 1e-9);
        assert!((report.weighted_f1 - 1.0).abs() < 1e-9);

        let text = report.display();
        assert!(text.contains("precision"));
        assert!(text.contains("note_1"));
        assert!(text.contains("weighted avg"));
    }

    #[test]
    fn test_report_weighted_average_uses_support() {
        // class 0: 9 samples all correct, class 1: 1 sample predicted as 0
        let cm = ConfusionMatrix::from_rows(&[vec![9, 0], vec![1, 0]]).unwrap();
        let report = ClassificationReport::from_confusion_matrix(&cm, &names(2));

        assert!((report.per_class[1].recall - 0.0).abs() < 1e-9);
        assert!((report.macro_recall - 0.5).abs() < 1e-9);
        assert!((report.weighted_recall - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();
        avg.add_weighted(1.0, 3);
        avg.add_weighted(3.0, 1);
        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 1.5).abs() < 1e-9);
    }
}
