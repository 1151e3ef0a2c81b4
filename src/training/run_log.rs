//! Per-run log directory
//!
//! Scalars and images go to a TensorBoard event file (`tensorboard --logdir`
//! reads the directory directly). Every epoch also appends one row to
//! `metrics.csv` so the curves can be inspected without TensorBoard.

use std::fs::File;
use std::path::Path;

use serde::Serialize;
use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::debug;

use super::trainer::EpochRecord;
use crate::utils::charts::{self, Raster};
use crate::utils::error::Result;
use crate::utils::metrics::ConfusionMatrix;

pub const METRICS_FILE: &str = "metrics.csv";

/// Prefix of the event files written by the summary writer
pub const EVENTS_FILE_PREFIX: &str = "events.out.tfevents";

/// Image tags
pub const KERNELS_TAG: &str = "conv2d_1/kernel";
pub const CONFUSION_MATRIX_TAG: &str = "confusion_matrix";

/// Pixels per kernel weight in the kernel grid image
const KERNEL_SCALE: usize = 4;
/// Pixels per cell in the confusion-matrix image
const CONFUSION_CELL_PX: usize = 32;

/// One `metrics.csv` row; the header comes from the field names
#[derive(Debug, Serialize)]
struct MetricsRow {
    epoch: usize,
    loss: f64,
    accuracy: f64,
    val_loss: Option<f64>,
    val_accuracy: Option<f64>,
    seconds: f64,
}

impl From<&EpochRecord> for MetricsRow {
    fn from(record: &EpochRecord) -> Self {
        Self {
            epoch: record.epoch + 1,
            loss: record.train_loss,
            accuracy: record.train_accuracy,
            val_loss: record.val_loss,
            val_accuracy: record.val_accuracy,
            seconds: record.seconds,
        }
    }
}

/// Writer for a run's log directory
pub struct RunLog {
    writer: SummaryWriter,
    metrics: csv::Writer<File>,
    images: bool,
}

impl RunLog {
    /// Create the log directory (recursively), a fresh metrics file and the
    /// event file. With `images` off only scalars are written.
    pub fn create(dir: &Path, images: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let metrics = csv::WriterBuilder::new()
            .has_headers(true)
            .from_path(dir.join(METRICS_FILE))?;
        let writer = SummaryWriter::new(dir);
        debug!("Logging run metrics to {:?}", dir);

        Ok(Self {
            writer,
            metrics,
            images,
        })
    }

    /// Append one epoch to the CSV and its scalars to the event file
    pub fn record_epoch(&mut self, record: &EpochRecord) -> Result<()> {
        self.metrics.serialize(MetricsRow::from(record))?;
        self.metrics.flush()?;

        let step = record.epoch;
        self.writer.add_scalar("loss", record.train_loss as f32, step);
        self.writer.add_scalar("accuracy", record.train_accuracy as f32, step);
        if let Some(val_loss) = record.val_loss {
            self.writer.add_scalar("val_loss", val_loss as f32, step);
        }
        if let Some(val_accuracy) = record.val_accuracy {
            self.writer.add_scalar("val_accuracy", val_accuracy as f32, step);
        }
        self.writer.flush();
        Ok(())
    }

    /// Image of the first convolution's kernels (`[out, in, k, k]` values)
    pub fn record_kernels(&mut self, dims: [usize; 4], values: &[f32], step: usize) {
        if !self.images || values.len() != dims.iter().product::<usize>() {
            return;
        }
        let raster = charts::kernel_grid_raster(values, dims, KERNEL_SCALE);
        self.add_image(KERNELS_TAG, &raster, step);
    }

    /// Heat-map image of the test confusion matrix
    pub fn record_confusion_matrix(&mut self, cm: &ConfusionMatrix, step: usize) {
        if !self.images {
            return;
        }
        let raster = charts::heatmap_raster(&cm.as_f64_rows(), CONFUSION_CELL_PX);
        self.add_image(CONFUSION_MATRIX_TAG, &raster, step);
    }

    fn add_image(&mut self, tag: &str, raster: &Raster, step: usize) {
        self.writer.add_image(tag, &raster.pixels, &raster.dims(), step);
        self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, val: bool) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0 / (epoch + 1) as f64,
            train_accuracy: 0.5 + epoch as f64 * 0.1,
            val_loss: val.then_some(0.9),
            val_accuracy: val.then_some(0.6),
            seconds: 1.5,
        }
    }

    fn event_files(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(EVENTS_FILE_PREFIX))
            .collect()
    }

    #[test]
    fn test_metrics_csv_one_row_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("run").join("nested");
        let mut log = RunLog::create(&log_dir, true).unwrap();

        for epoch in 0..3 {
            log.record_epoch(&record(epoch, true)).unwrap();
        }

        let csv = std::fs::read_to_string(log_dir.join(METRICS_FILE)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "epoch,loss,accuracy,val_loss,val_accuracy,seconds");
        assert_eq!(lines[1], "1,1.0,0.5,0.9,0.6,1.5");
        assert!(lines[3].starts_with("3,"));
    }

    #[test]
    fn test_missing_validation_leaves_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), false).unwrap();
        log.record_epoch(&record(0, false)).unwrap();

        let csv = std::fs::read_to_string(dir.path().join(METRICS_FILE)).unwrap();
        assert_eq!(csv.lines().nth(1).unwrap(), "1,1.0,0.5,,,1.5");
    }

    #[test]
    fn test_event_file_receives_scalars_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), true).unwrap();
        let files = event_files(dir.path());
        assert_eq!(files.len(), 1);
        let empty = std::fs::metadata(&files[0]).unwrap().len();

        log.record_epoch(&record(0, true)).unwrap();
        let after_scalars = std::fs::metadata(&files[0]).unwrap().len();
        assert!(after_scalars > empty);

        let values: Vec<f32> = (0..2 * 3 * 5 * 5).map(|v| v as f32 / 10.0).collect();
        log.record_kernels([2, 3, 5, 5], &values, 0);
        let cm = ConfusionMatrix::from_rows(&[vec![3, 1], vec![0, 4]]).unwrap();
        log.record_confusion_matrix(&cm, 0);
        assert!(std::fs::metadata(&files[0]).unwrap().len() > after_scalars);
    }

    #[test]
    fn test_images_skipped_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), false).unwrap();
        let files = event_files(dir.path());
        let before = std::fs::metadata(&files[0]).unwrap().len();

        let cm = ConfusionMatrix::from_rows(&[vec![1, 0], vec![0, 1]]).unwrap();
        log.record_confusion_matrix(&cm, 0);
        log.record_kernels([1, 1, 2, 2], &[0.0, 1.0, 2.0, 3.0], 0);
        assert_eq!(std::fs::metadata(&files[0]).unwrap().len(), before);
    }
}
