//! End-to-end run: read, build, train, evaluate, export
//!
//! Output and log directories share one run fragment
//! (`<timestamp>,lr=<lr>,b=<batch>,e=<epochs>`) so a run's artifacts and
//! its TensorBoard summaries can be matched by name.

use std::path::PathBuf;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::read_datasets_with_seed;
use crate::evaluation::{evaluate, EvaluationReport};
use crate::export::{save_model, ExportedArtifacts};
use crate::model::{build_model, get_model_memory_usage, INPUT_NODE, OUTPUT_NODE};
use crate::training::{train, EpochRecord, FitOptions, RunLog};
use crate::utils::error::{BanknoteError, Result};

/// Shuffle seeds of the training, validation and testing splits
pub const SPLIT_SHUFFLE_SEEDS: [u64; 3] = [1, 2, 3];

/// What a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub history: Vec<EpochRecord>,
    pub evaluation: EvaluationReport,
    pub artifacts: ExportedArtifacts,
}

/// Run the whole pipeline on backend `B`
pub fn run<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<RunReport> {
    config.validate()?;
    println!("{}", "--start--".green().bold());

    let mut datasets = read_datasets_with_seed(
        &config.img_dir,
        config.img_size,
        config.validation_percentage,
        config.testing_percentage,
        config.seed,
    )?;
    let channels = datasets.training_data.image_dims()[0];
    if channels != config.num_channels {
        return Err(BanknoteError::Config(format!(
            "images are decoded with {} channels, config expects {}",
            channels, config.num_channels
        )));
    }

    let classes = datasets.classes.clone();
    let compiled = build_model::<B>(
        config.img_size,
        config.num_channels,
        classes.len(),
        config.learning_rate,
        device,
    )?;
    let model_config = compiled.config.clone();

    let summary = compiled.summary(&config.model_name);
    print!("{}", summary.to_text());
    println!(
        "Approximately memory usage : {} gb",
        get_model_memory_usage(config.batch_size, &summary)
    );

    let [train_seed, valid_seed, test_seed] = SPLIT_SHUFFLE_SEEDS;
    datasets.training_data.shuffle(train_seed);
    datasets.validation_data.shuffle(valid_seed);
    datasets.testing_data.shuffle(test_seed);

    let run_name = config.hyper_params().run_name();
    let log_dir = config.log_dir.join(&run_name);
    let output_dir = config.output_dir.join(&run_name);
    info!("Run: {}", run_name);

    let mut run_log = RunLog::create(&log_dir, config.plots)?;
    let options = FitOptions::new(config.batch_size, config.epochs).with_seed(config.seed);
    let outcome = train(
        compiled,
        &datasets.training_data,
        &datasets.validation_data,
        &options,
        &mut run_log,
        device,
    )?;

    let model = outcome.model.valid();
    let plot_dir = config.plots.then_some(log_dir.as_path());
    let evaluation = evaluate(
        &model,
        &classes,
        &datasets.testing_data,
        config.batch_size,
        device,
        plot_dir,
    )?;
    run_log.record_confusion_matrix(&evaluation.confusion_matrix, outcome.history.len());

    let artifacts = save_model(
        &model,
        &model_config,
        &classes,
        &config.model_name,
        &[INPUT_NODE],
        OUTPUT_NODE,
        &output_dir,
        device,
    )?;

    println!("{}", "--end--".green().bold());

    Ok(RunReport {
        output_dir,
        log_dir,
        history: outcome.history,
        evaluation,
        artifacts,
    })
}
