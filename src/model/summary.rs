//! Layer summary of the banknote CNN
//!
//! Describes every layer (name, kind, output shape, parameter counts)
//! from the builder configuration alone, so summaries, the architecture
//! JSON and the memory estimate are available without allocating tensors.

use serde::{Deserialize, Serialize};

use super::cnn::{pooled_side, BanknoteClassifierConfig, INPUT_NODE};

/// Width of the summary table
const TABLE_WIDTH: usize = 65;

/// Kind of a layer, with the settings needed to describe it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerKind {
    Conv2D {
        filters: usize,
        kernel_size: [usize; 2],
        strides: [usize; 2],
        padding: String,
        activation: String,
        use_bias: bool,
    },
    MaxPooling2D {
        pool_size: [usize; 2],
        strides: [usize; 2],
        padding: String,
    },
    Flatten,
    Dense {
        units: usize,
        activation: String,
        use_bias: bool,
    },
    Dropout {
        rate: f64,
    },
}

impl LayerKind {
    /// Keras-style type name shown in the summary
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Conv2D { .. } => "Conv2D",
            LayerKind::MaxPooling2D { .. } => "MaxPooling2D",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense { .. } => "Dense",
            LayerKind::Dropout { .. } => "Dropout",
        }
    }
}

/// One row of the layer summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub kind: LayerKind,
    /// Output shape without the batch dimension, channels first
    pub output_shape: Vec<usize>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl LayerInfo {
    /// Number of values in one sample's output
    pub fn output_elements(&self) -> usize {
        self.output_shape.iter().product()
    }

    /// Shape rendered with a leading `None` batch dimension
    pub fn shape_string(&self) -> String {
        let dims: Vec<String> = std::iter::once("None".to_string())
            .chain(self.output_shape.iter().map(|d| d.to_string()))
            .collect();
        format!("({})", dims.join(", "))
    }
}

/// Ordered layer list of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    /// Input shape without the batch dimension, channels first
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerInfo>,
}

impl ModelSummary {
    /// Derive the summary from the network configuration
    pub fn from_config(name: &str, config: &BanknoteClassifierConfig) -> Self {
        let mut layers = Vec::new();
        let k = config.kernel_size;
        let mut channels = config.in_channels;
        let mut side = config.image_size;

        for (stage, &filters) in config.conv_filters.iter().enumerate() {
            let ordinal = stage + 1;
            layers.push(LayerInfo {
                name: format!("conv2d_{}", ordinal),
                kind: LayerKind::Conv2D {
                    filters,
                    kernel_size: [k, k],
                    strides: [1, 1],
                    padding: "same".to_string(),
                    activation: "relu".to_string(),
                    use_bias: true,
                },
                output_shape: vec![filters, side, side],
                trainable_params: k * k * channels * filters + filters,
                non_trainable_params: 0,
            });

            side = pooled_side(side);
            layers.push(LayerInfo {
                name: format!("max_pooling2d_{}", ordinal),
                kind: LayerKind::MaxPooling2D {
                    pool_size: [2, 2],
                    strides: [2, 2],
                    padding: "same".to_string(),
                },
                output_shape: vec![filters, side, side],
                trainable_params: 0,
                non_trainable_params: 0,
            });
            channels = filters;
        }
        debug_assert_eq!(side, config.final_feature_size());

        let flat = channels * side * side;
        layers.push(LayerInfo {
            name: "flatten_1".to_string(),
            kind: LayerKind::Flatten,
            output_shape: vec![flat],
            trainable_params: 0,
            non_trainable_params: 0,
        });
        layers.push(LayerInfo {
            name: "dense_1".to_string(),
            kind: LayerKind::Dense {
                units: config.hidden_units,
                activation: "relu".to_string(),
                use_bias: true,
            },
            output_shape: vec![config.hidden_units],
            trainable_params: flat * config.hidden_units + config.hidden_units,
            non_trainable_params: 0,
        });
        layers.push(LayerInfo {
            name: "dropout_1".to_string(),
            kind: LayerKind::Dropout {
                rate: config.dropout_rate,
            },
            output_shape: vec![config.hidden_units],
            trainable_params: 0,
            non_trainable_params: 0,
        });
        layers.push(LayerInfo {
            name: "dense_2".to_string(),
            kind: LayerKind::Dense {
                units: config.num_classes,
                activation: "softmax".to_string(),
                use_bias: true,
            },
            output_shape: vec![config.num_classes],
            trainable_params: config.hidden_units * config.num_classes + config.num_classes,
            non_trainable_params: 0,
        });

        Self {
            name: name.to_string(),
            input_shape: vec![config.in_channels, config.image_size, config.image_size],
            layers,
        }
    }

    pub fn trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.trainable_params).sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.non_trainable_params).sum()
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params() + self.non_trainable_params()
    }

    /// Look up a layer by name
    pub fn layer(&self, name: &str) -> Option<&LayerInfo> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Render the layer table with parameter totals
    pub fn to_text(&self) -> String {
        let rule = "_".repeat(TABLE_WIDTH);
        let double_rule = "=".repeat(TABLE_WIDTH);
        let mut lines = vec![
            format!("Model: \"{}\"", self.name),
            rule.clone(),
            format!("{:<29}{:<26}{:<10}", "Layer (type)", "Output Shape", "Param #"),
            double_rule.clone(),
        ];

        for (i, layer) in self.layers.iter().enumerate() {
            let label = format!("{} ({})", layer.name, layer.kind.type_name());
            lines.push(format!(
                "{:<29}{:<26}{:<10}",
                label,
                layer.shape_string(),
                layer.trainable_params + layer.non_trainable_params
            ));
            lines.push(if i + 1 == self.layers.len() {
                double_rule.clone()
            } else {
                rule.clone()
            });
        }

        lines.push(format!("Total params: {}", crate::utils::format_number(self.total_params())));
        lines.push(format!(
            "Trainable params: {}",
            crate::utils::format_number(self.trainable_params())
        ));
        lines.push(format!(
            "Non-trainable params: {}",
            crate::utils::format_number(self.non_trainable_params())
        ));
        lines.push(rule);

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Structured architecture description written to `model_config.json`
    pub fn to_json(&self) -> serde_json::Value {
        let layers: Vec<serde_json::Value> = self
            .layers
            .iter()
            .map(|layer| {
                let mut value = serde_json::to_value(&layer.kind).unwrap_or(serde_json::Value::Null);
                if let Some(config) = value.get_mut("config").and_then(|c| c.as_object_mut()) {
                    config.insert("name".to_string(), serde_json::json!(layer.name));
                } else if let Some(obj) = value.as_object_mut() {
                    obj.insert("config".to_string(), serde_json::json!({ "name": layer.name }));
                }
                value
            })
            .collect();

        serde_json::json!({
            "class_name": "Sequential",
            "config": {
                "name": self.name,
                "input_name": INPUT_NODE,
                "input_shape": self.input_shape,
                "data_format": "channels_first",
                "layers": layers,
            },
            "backend": "burn",
            "version": env!("CARGO_PKG_VERSION"),
        })
    }
}

/// Rough training memory footprint in gigabytes
///
/// `4 bytes × batch × (Σ layer output elements + trainable + non-trainable)`,
/// rounded to three decimals.
pub fn get_model_memory_usage(batch_size: usize, summary: &ModelSummary) -> f64 {
    let shapes_mem_count: usize = summary.layers.iter().map(|l| l.output_elements()).sum();
    let total_memory = 4.0
        * batch_size as f64
        * (shapes_mem_count + summary.trainable_params() + summary.non_trainable_params()) as f64;
    let gbytes = total_memory / 1024f64.powi(3);
    (gbytes * 1000.0).round() / 1000.0
}
