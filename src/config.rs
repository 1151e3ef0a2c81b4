//! Pipeline Configuration
//!
//! Run-wide settings (paths, image geometry, hyperparameters, split
//! percentages) plus the run-naming helper used to derive the output and
//! log directory names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::utils::error::{BanknoteError, Result};

/// Timestamp layout of the run directory fragment
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Configuration for one training/evaluation/export run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base name of the exported model files
    pub model_name: String,

    /// Image directory, one sub-directory per class
    pub img_dir: PathBuf,

    /// Root of the timestamped export directories
    pub output_dir: PathBuf,

    /// Root of the timestamped log directories
    pub log_dir: PathBuf,

    /// Side length images are resized to (square)
    pub img_size: usize,

    /// Number of image channels (3 for RGB)
    pub num_channels: usize,

    /// Mini-batch size
    pub batch_size: usize,

    /// Number of full passes over the training split
    pub epochs: usize,

    /// Adadelta step multiplier
    pub learning_rate: f64,

    /// Fraction of each class held out for validation
    pub validation_percentage: f64,

    /// Fraction of each class held out for testing
    pub testing_percentage: f64,

    /// Seed for the stratified split and per-epoch shuffles
    pub seed: u64,

    /// Write image summaries (kernels, confusion matrix) and the heat-map SVG
    pub plots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_name: "banknotes_convnet".to_string(),
            img_dir: PathBuf::from("../files/thaibaht_photos/"),
            output_dir: PathBuf::from("../files/models/"),
            log_dir: PathBuf::from("../files/training_logs/"),
            img_size: 128,
            num_channels: 3,
            batch_size: 32,
            epochs: 30,
            learning_rate: 1.0,
            validation_percentage: 0.1,
            testing_percentage: 0.3,
            seed: 42,
            plots: true,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(BanknoteError::Config("model_name must not be empty".to_string()));
        }

        if self.img_size == 0 {
            return Err(BanknoteError::Config("img_size must be greater than 0".to_string()));
        }

        if self.num_channels == 0 {
            return Err(BanknoteError::Config("num_channels must be greater than 0".to_string()));
        }

        if self.batch_size == 0 {
            return Err(BanknoteError::Config("batch_size must be greater than 0".to_string()));
        }

        if self.epochs == 0 {
            return Err(BanknoteError::Config("epochs must be greater than 0".to_string()));
        }

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(BanknoteError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }

        check_fraction("validation_percentage", self.validation_percentage)?;
        check_fraction("testing_percentage", self.testing_percentage)?;
        if self.validation_percentage + self.testing_percentage >= 1.0 {
            return Err(BanknoteError::Config(
                "validation_percentage + testing_percentage must be below 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Hyperparameters of this run
    pub fn hyper_params(&self) -> HyperParams {
        HyperParams {
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            epochs: self.epochs,
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BanknoteError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(BanknoteError::Config(format!(
            "{} must be in range [0.0, 1.0), got {}",
            name, value
        )))
    }
}

/// Immutable hyperparameter set of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
}

impl HyperParams {
    /// Directory fragment for this run, stamped with the current local time
    pub fn run_name(&self) -> String {
        make_hparam_string(self.learning_rate, self.batch_size, self.epochs)
    }
}

/// Build the run directory fragment `<timestamp>,lr=<lr>,b=<batch>,e=<epochs>`
pub fn make_hparam_string(learning_rate: f64, batch_size: usize, epochs: usize) -> String {
    make_hparam_string_at(&Local::now(), learning_rate, batch_size, epochs)
}

/// Same as [`make_hparam_string`] with an explicit timestamp
pub fn make_hparam_string_at<Tz>(
    timestamp: &DateTime<Tz>,
    learning_rate: f64,
    batch_size: usize,
    epochs: usize,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{},lr={},b={},e={}",
        timestamp.format(RUN_TIMESTAMP_FORMAT),
        float_repr(learning_rate),
        batch_size,
        epochs
    )
}

/// Shortest round-trip form of `value` with a signed, two-digit exponent
/// ("1.0", "0.001", "1e-05", "1.5e+16").
///
/// `{:?}` already keeps the fractional part of whole numbers and switches to
/// scientific notation below 1e-4 and from 1e16 upward; only the exponent
/// spelling differs.
pub fn float_repr(value: f64) -> String {
    let debug = format!("{:?}", value);
    match debug.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 3, 7, 14, 5, 9).unwrap()
    }

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model_name, "banknotes_convnet");
        assert_eq!(config.img_size, 128);
        assert_eq!(config.learning_rate, 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_size = PipelineConfig { img_size: 0, ..Default::default() };
        assert!(matches!(bad_size.validate(), Err(BanknoteError::Config(_))));

        let bad_split = PipelineConfig {
            validation_percentage: 0.5,
            testing_percentage: 0.5,
            ..Default::default()
        };
        assert!(bad_split.validate().is_err());

        let negative = PipelineConfig { testing_percentage: -0.1, ..Default::default() };
        assert!(negative.validate().is_err());

        let odd_size = PipelineConfig { img_size: 100, ..Default::default() };
        assert!(odd_size.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = PipelineConfig { epochs: 3, batch_size: 8, ..Default::default() };
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.batch_size, 8);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"epochs": 5}"#).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_hparam_string_format() {
        let s = make_hparam_string_at(&stamp(), 1.0, 32, 30);
        assert_eq!(s, "2018-03-07_14-05-09,lr=1.0,b=32,e=30");

        let small = make_hparam_string_at(&stamp(), 0.001, 16, 2);
        assert!(small.contains("lr=0.001"));
        assert!(small.ends_with("b=16,e=2"));
    }

    #[test]
    fn test_hparam_string_small_learning_rate() {
        let s = make_hparam_string_at(&stamp(), 1e-5, 32, 30);
        assert_eq!(s, "2018-03-07_14-05-09,lr=1e-05,b=32,e=30");
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(0.001), "0.001");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(2.5e-5), "2.5e-05");
        assert_eq!(float_repr(1e-10), "1e-10");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1e123), "1e+123");
    }

    #[test]
    fn test_hparam_string_distinct_tuples() {
        let a = make_hparam_string_at(&stamp(), 1.0, 32, 30);
        let b = make_hparam_string_at(&stamp(), 1.0, 32, 31);
        let c = make_hparam_string_at(&stamp(), 0.5, 32, 30);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_run_name_uses_local_time() {
        let hp = PipelineConfig::default().hyper_params();
        let name = hp.run_name();
        assert!(name.ends_with(",lr=1.0,b=32,e=30"));
        // "YYYY-mm-dd_HH-MM-SS" prefix
        assert_eq!(name.split(',').next().unwrap().len(), 19);
    }
}
