//! Logging Module
//!
//! Structured logging via the `tracing` crate, plus a small epoch logger
//! used by the training loop.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Training progress logger
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Seconds spent in the current epoch so far
    pub fn epoch_elapsed(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Log end of an epoch with metrics
    pub fn end_epoch(
        &self,
        train_loss: f64,
        train_accuracy: f64,
        val_loss: Option<f64>,
        val_accuracy: Option<f64>,
    ) {
        let total_time = self.training_start.elapsed();
        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        match (val_loss, val_accuracy) {
            (Some(vl), Some(va)) => tracing::info!(
                "Epoch {}/{} in {:.1}s | loss: {:.4} | acc: {:.4} | val_loss: {:.4} | val_acc: {:.4} | ETA: {:.0}s",
                self.epoch + 1,
                self.total_epochs,
                self.epoch_elapsed(),
                train_loss,
                train_accuracy,
                vl,
                va,
                eta_secs
            ),
            _ => tracing::info!(
                "Epoch {}/{} in {:.1}s | loss: {:.4} | acc: {:.4} | ETA: {:.0}s",
                self.epoch + 1,
                self.total_epochs,
                self.epoch_elapsed(),
                train_loss,
                train_accuracy,
                eta_secs
            ),
        }
    }

    /// Log training completion
    pub fn log_complete(&self) {
        tracing::info!(
            "Training complete! {} epochs in {:.1}s",
            self.total_epochs,
            self.training_start.elapsed().as_secs_f64()
        );
    }
}
