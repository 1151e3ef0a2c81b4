//! Banknote CNN command line
//!
//! Entry point for training, inspecting and exporting the banknote
//! recognition network with the Burn framework.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use banknote_cnn::backend::{backend_name, default_device, TrainingBackend};
use banknote_cnn::config::PipelineConfig;
use banknote_cnn::dataset::ImageDirectory;
use banknote_cnn::model::{get_model_memory_usage, BanknoteClassifierConfig, ModelSummary};
use banknote_cnn::utils::format_duration;
use banknote_cnn::utils::logging::{init_logging, LogConfig};

/// Banknote recognition with a convolutional network
#[derive(Parser, Debug)]
#[command(name = "banknote-cnn")]
#[command(version)]
#[command(about = "Train, evaluate and export a banknote classifier with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, evaluate and export a model
    Train {
        /// JSON configuration file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Image directory, one sub-directory per class
        #[arg(long)]
        img_dir: Option<PathBuf>,

        /// Root directory of the exported models
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Root directory of the training logs
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Image side length in pixels
        #[arg(long)]
        img_size: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Learning rate (Adadelta step multiplier)
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Fraction of each class used for validation
        #[arg(long)]
        validation: Option<f64>,

        /// Fraction of each class used for testing
        #[arg(long)]
        testing: Option<f64>,

        /// Base name of the exported files
        #[arg(long)]
        model_name: Option<String>,

        /// Random seed for the split and shuffles
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the image summaries and the confusion-matrix SVG
        #[arg(long, default_value = "false")]
        no_plots: bool,
    },

    /// Print the layer summary and memory estimate
    Summary {
        /// Image side length in pixels
        #[arg(long, default_value = "128")]
        img_size: usize,

        /// Number of classes
        #[arg(long, default_value = "5")]
        num_classes: usize,

        /// Batch size used for the memory estimate
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Show per-class image counts of an image directory
    Stats {
        /// Image directory, one sub-directory per class
        #[arg(long, default_value = "../files/thaibaht_photos/")]
        img_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            config,
            img_dir,
            output_dir,
            log_dir,
            img_size,
            batch_size,
            epochs,
            learning_rate,
            validation,
            testing,
            model_name,
            seed,
            no_plots,
        } => {
            let mut pipeline = match config {
                Some(path) => PipelineConfig::load(&path)
                    .with_context(|| format!("failed to load config {:?}", path))?,
                None => PipelineConfig::default(),
            };

            if let Some(v) = img_dir {
                pipeline.img_dir = v;
            }
            if let Some(v) = output_dir {
                pipeline.output_dir = v;
            }
            if let Some(v) = log_dir {
                pipeline.log_dir = v;
            }
            if let Some(v) = img_size {
                pipeline.img_size = v;
            }
            if let Some(v) = batch_size {
                pipeline.batch_size = v;
            }
            if let Some(v) = epochs {
                pipeline.epochs = v;
            }
            if let Some(v) = learning_rate {
                pipeline.learning_rate = v;
            }
            if let Some(v) = validation {
                pipeline.validation_percentage = v;
            }
            if let Some(v) = testing {
                pipeline.testing_percentage = v;
            }
            if let Some(v) = model_name {
                pipeline.model_name = v;
            }
            if let Some(v) = seed {
                pipeline.seed = v;
            }
            if no_plots {
                pipeline.plots = false;
            }

            cmd_train(&pipeline)?;
        }

        Commands::Summary {
            img_size,
            num_classes,
            batch_size,
        } => {
            cmd_summary(img_size, num_classes, batch_size)?;
        }

        Commands::Stats { img_dir } => {
            cmd_stats(&img_dir)?;
        }
    }

    Ok(())
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    println!("{} {}", "Backend:".cyan().bold(), backend_name());
    info!("Training on images from {:?}", config.img_dir);

    let started = std::time::Instant::now();
    let device = default_device();
    let report = banknote_cnn::pipeline::run::<TrainingBackend>(config, &device)?;

    println!();
    println!("{}", "Run complete".green().bold());
    println!("  Test accuracy: {:.2}%", report.evaluation.accuracy * 100.0);
    println!("  Model files:   {:?}", report.output_dir);
    println!("  Logs:          {:?}", report.log_dir);
    println!("  Total time:    {}", format_duration(started.elapsed().as_secs_f64()));

    Ok(())
}

fn cmd_summary(img_size: usize, num_classes: usize, batch_size: usize) -> Result<()> {
    let config = BanknoteClassifierConfig::new(num_classes).with_image_size(img_size);
    config.validate()?;

    let summary = ModelSummary::from_config("banknotes_convnet", &config);
    print!("{}", summary.to_text());
    println!(
        "Approximately memory usage : {} gb",
        get_model_memory_usage(batch_size, &summary)
    );
    Ok(())
}

fn cmd_stats(img_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", img_dir);

    // Size only matters for decoding, which stats never does
    let directory = ImageDirectory::new(img_dir, 8)?;
    directory.get_stats().print();
    Ok(())
}
