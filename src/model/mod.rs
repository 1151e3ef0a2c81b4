//! Model module: network definition, layer summary and the model builder
//!
//! [`build_model`] returns a [`CompiledModel`]: the network together with
//! its loss (categorical cross-entropy), optimizer (Adadelta) and the
//! learning rate used as step multiplier.

pub mod cnn;
pub mod summary;

use burn::{
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::adaptor::OptimizerAdaptor,
    tensor::backend::AutodiffBackend,
};
use tracing::debug;

pub use cnn::{BanknoteClassifier, BanknoteClassifierConfig, INPUT_NODE, OUTPUT_NODE};
pub use summary::{get_model_memory_usage, LayerInfo, LayerKind, ModelSummary};

use crate::training::adadelta::{Adadelta, AdadeltaConfig};
use crate::utils::error::Result;

/// Optimizer type used to train [`BanknoteClassifier`]
pub type ClassifierOptimizer<B> = OptimizerAdaptor<Adadelta, BanknoteClassifier<B>, B>;

/// Network plus everything needed to train it
pub struct CompiledModel<B: AutodiffBackend> {
    pub model: BanknoteClassifier<B>,
    pub config: BanknoteClassifierConfig,
    pub loss: CrossEntropyLoss<B>,
    pub optimizer: ClassifierOptimizer<B>,
    pub learning_rate: f64,
}

impl<B: AutodiffBackend> CompiledModel<B> {
    /// Layer summary of the network
    pub fn summary(&self, name: &str) -> ModelSummary {
        ModelSummary::from_config(name, &self.config)
    }
}

/// Build the fixed-topology CNN with its loss and optimizer
///
/// Fails with a configuration error before allocating any tensor when the
/// image size, channel count or class count cannot fit the architecture.
pub fn build_model<B: AutodiffBackend>(
    img_size: usize,
    num_channels: usize,
    num_classes: usize,
    learning_rate: f64,
    device: &B::Device,
) -> Result<CompiledModel<B>> {
    let config = BanknoteClassifierConfig::new(num_classes)
        .with_image_size(img_size)
        .with_in_channels(num_channels);
    config.validate()?;

    if !(learning_rate > 0.0 && learning_rate.is_finite()) {
        return Err(crate::BanknoteError::Config(format!(
            "learning rate must be a positive number, got {}",
            learning_rate
        )));
    }

    debug!(
        "Building model: {}x{}x{} input, {} classes, lr {}",
        num_channels, img_size, img_size, num_classes, learning_rate
    );

    Ok(CompiledModel {
        model: config.init(device),
        loss: CrossEntropyLossConfig::new().init(device),
        optimizer: AdadeltaConfig::new().init(),
        learning_rate,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::BanknoteError;

    #[test]
    fn test_build_model() {
        let device = Default::default();
        let compiled = build_model::<TrainingBackend>(16, 3, 2, 1.0, &device).unwrap();
        assert_eq!(compiled.model.num_classes(), 2);
        assert_eq!(compiled.learning_rate, 1.0);
        assert_eq!(compiled.summary("m").layers.len(), 10);
    }

    #[test]
    fn test_build_model_rejects_bad_shapes() {
        let device = Default::default();
        for (size, channels, classes) in [(0, 3, 2), (16, 0, 2), (16, 3, 0)] {
            let result = build_model::<TrainingBackend>(size, channels, classes, 1.0, &device);
            assert!(matches!(result, Err(BanknoteError::Config(_))));
        }
        assert!(build_model::<TrainingBackend>(16, 3, 2, 0.0, &device).is_err());
    }

    #[test]
    fn test_build_model_accepts_any_positive_size() {
        let device = Default::default();
        let compiled = build_model::<TrainingBackend>(100, 3, 2, 1.0, &device).unwrap();
        assert_eq!(compiled.config.flatten_size(), 64 * 13 * 13);
    }
}
