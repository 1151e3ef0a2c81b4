//! Export directory writer
//!
//! Produces, in order:
//! - `model_config.json`
//! - `model_summary.txt`
//! - `trained_labels.txt`
//! - `<name>_graph.pbtxt`
//! - `<name>.chkp.mpk`
//! - `frozen_<name>.pb`

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::graph::{freeze_graph, graph_def, parameter_tensors, validate_endpoints};
use super::onnx::{self, ModelProto, OperatorSetIdProto};
use crate::model::{BanknoteClassifier, BanknoteClassifierConfig, ModelSummary};
use crate::utils::error::{BanknoteError, Result};

pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const MODEL_SUMMARY_FILE: &str = "model_summary.txt";
pub const LABELS_FILE: &str = "trained_labels.txt";

/// Paths of everything [`save_model`] wrote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedArtifacts {
    pub dir: PathBuf,
    pub model_config: PathBuf,
    pub model_summary: PathBuf,
    pub labels: PathBuf,
    pub graph_def: PathBuf,
    pub checkpoint: PathBuf,
    pub frozen_graph: PathBuf,
}

impl ExportedArtifacts {
    fn new(dir: &Path, model_name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            model_config: dir.join(MODEL_CONFIG_FILE),
            model_summary: dir.join(MODEL_SUMMARY_FILE),
            labels: dir.join(LABELS_FILE),
            graph_def: dir.join(format!("{}_graph.pbtxt", model_name)),
            checkpoint: dir.join(format!("{}.chkp.mpk", model_name)),
            frozen_graph: dir.join(format!("frozen_{}.pb", model_name)),
        }
    }

    /// All artifact paths in write order
    pub fn files(&self) -> [&Path; 6] {
        [
            &self.model_config,
            &self.model_summary,
            &self.labels,
            &self.graph_def,
            &self.checkpoint,
            &self.frozen_graph,
        ]
    }
}

/// Create a directory (and parents) if it does not exist yet
pub fn prepare_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        info!("Created directory {:?}", dir);
    }
    Ok(())
}

/// Export a trained model into `output_dir`
///
/// The endpoint names are checked against the graph before anything is
/// written. The frozen graph is built from the checkpoint reloaded into a
/// fresh network, so it holds exactly the values that were saved.
#[allow(clippy::too_many_arguments)]
pub fn save_model<B: Backend>(
    model: &BanknoteClassifier<B>,
    config: &BanknoteClassifierConfig,
    labels: &[String],
    model_name: &str,
    input_node_names: &[&str],
    output_node_name: &str,
    output_dir: &Path,
    device: &B::Device,
) -> Result<ExportedArtifacts> {
    if model_name.trim().is_empty() {
        return Err(BanknoteError::Export("model name must not be empty".to_string()));
    }
    if labels.len() != config.num_classes {
        return Err(BanknoteError::Export(format!(
            "{} labels for a model with {} classes",
            labels.len(),
            config.num_classes
        )));
    }

    let summary = ModelSummary::from_config(model_name, config);
    let input_name = input_node_names.first().copied().unwrap_or_default();
    let (graph, _) = graph_def(&summary, input_name);
    validate_endpoints(&graph, input_node_names, output_node_name)?;

    prepare_dir(output_dir)?;
    let artifacts = ExportedArtifacts::new(output_dir, model_name);

    std::fs::write(&artifacts.model_config, serde_json::to_string_pretty(&summary.to_json())?)?;
    std::fs::write(&artifacts.model_summary, summary.to_text())?;
    std::fs::write(&artifacts.labels, labels_text(labels))?;
    std::fs::write(&artifacts.graph_def, onnx::to_text_format(&graph))?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(&artifacts.checkpoint, &recorder)
        .map_err(|e| BanknoteError::Export(format!("failed to save checkpoint: {:?}", e)))?;

    let restored = config
        .init::<B>(device)
        .load_file(&artifacts.checkpoint, &recorder, device)
        .map_err(|e| BanknoteError::Model(format!("failed to reload checkpoint: {:?}", e)))?;

    let frozen = freeze_graph(
        &graph,
        parameter_tensors(&restored)?,
        input_node_names,
        output_node_name,
    )?;
    let model_proto = ModelProto {
        ir_version: onnx::IR_VERSION,
        producer_name: env!("CARGO_PKG_NAME").to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        graph: Some(frozen),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: onnx::OPSET_VERSION,
            ..Default::default()
        }],
        ..Default::default()
    };
    let mut buf = Vec::new();
    model_proto.encode(&mut buf)?;
    std::fs::write(&artifacts.frozen_graph, buf)?;

    info!("Model exported to {:?}", output_dir);
    Ok(artifacts)
}

fn labels_text(labels: &[String]) -> String {
    let mut text = labels.join("\n");
    text.push('\n');
    text
}
