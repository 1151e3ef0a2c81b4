//! CNN Model Architecture for Banknote Classification
//!
//! Three 5×5 convolution + 2×2 max-pool stages followed by a 1024-unit
//! dense layer, dropout and a softmax classifier. Layers are named
//! `<kind>_<ordinal>` so exported graphs and summaries share one vocabulary.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::{self, BanknoteError};

/// Name of the graph input fed with `[N, C, H, W]` images
pub const INPUT_NODE: &str = "conv2d_1_input";

/// Name of the class-probability output of the graph
pub const OUTPUT_NODE: &str = "dense_2/Softmax";

/// Number of 2×2 pooling stages
pub const POOL_STAGES: u32 = 3;

/// Side length after one 2×2, stride-2 pool with `same` padding
pub fn pooled_side(side: usize) -> usize {
    side.div_ceil(2)
}

/// Configuration for the BanknoteClassifier CNN
#[derive(Config, Debug)]
pub struct BanknoteClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "128")]
    pub image_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the three convolution stages
    #[config(default = "[32, 32, 64]")]
    pub conv_filters: [usize; 3],

    /// Convolution kernel side
    #[config(default = "5")]
    pub kernel_size: usize,

    /// Units of the hidden dense layer
    #[config(default = "1024")]
    pub hidden_units: usize,

    /// Dropout rate before the classifier
    #[config(default = "0.4")]
    pub dropout_rate: f64,
}

impl BanknoteClassifierConfig {
    /// Check the configuration against the fixed layer shapes
    pub fn validate(&self) -> error::Result<()> {
        if self.image_size == 0 {
            return Err(BanknoteError::Config("image size must be greater than 0".to_string()));
        }
        if self.in_channels == 0 {
            return Err(BanknoteError::Config("number of channels must be greater than 0".to_string()));
        }
        if self.num_classes == 0 {
            return Err(BanknoteError::Config("at least one class is required".to_string()));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(BanknoteError::Config("kernel_size must be a positive odd number".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(BanknoteError::Config("dropout_rate must be in range [0.0, 1.0)".to_string()));
        }
        Ok(())
    }

    /// Side length of the feature maps after the last pooling stage
    pub fn final_feature_size(&self) -> usize {
        (0..POOL_STAGES).fold(self.image_size, |side, _| pooled_side(side))
    }

    /// Number of inputs of the first dense layer
    pub fn flatten_size(&self) -> usize {
        let side = self.final_feature_size();
        self.conv_filters[2] * side * side
    }

    /// Create the network on a device
    pub fn init<B: Backend>(&self, device: &B::Device) -> BanknoteClassifier<B> {
        BanknoteClassifier::new(self, device)
    }
}

/// Banknote Classifier CNN
///
/// Architecture:
/// - conv(32, 5×5, same, relu) → maxpool(2, 2)
/// - conv(32, 5×5, same, relu) → maxpool(2, 2)
/// - conv(64, 5×5, same, relu) → maxpool(2, 2)
/// - flatten → dense(1024, relu) → dropout(0.4) → dense(num_classes)
#[derive(Module, Debug)]
pub struct BanknoteClassifier<B: Backend> {
    pub conv2d_1: Conv2d<B>,
    pub max_pooling2d_1: MaxPool2d,
    pub conv2d_2: Conv2d<B>,
    pub max_pooling2d_2: MaxPool2d,
    pub conv2d_3: Conv2d<B>,
    pub max_pooling2d_3: MaxPool2d,
    pub dense_1: Linear<B>,
    pub dropout_1: Dropout,
    pub dense_2: Linear<B>,
    relu: Relu,
    num_classes: usize,
}

impl<B: Backend> BanknoteClassifier<B> {
    /// Create a new BanknoteClassifier from configuration
    pub fn new(config: &BanknoteClassifierConfig, device: &B::Device) -> Self {
        let [f1, f2, f3] = config.conv_filters;
        let k = config.kernel_size;

        let conv = |in_ch: usize, out_ch: usize| {
            Conv2dConfig::new([in_ch, out_ch], [k, k])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv2d_1: conv(config.in_channels, f1),
            max_pooling2d_1: pool(),
            conv2d_2: conv(f1, f2),
            max_pooling2d_2: pool(),
            conv2d_3: conv(f2, f3),
            max_pooling2d_3: pool(),
            dense_1: LinearConfig::new(config.flatten_size(), config.hidden_units).init(device),
            dropout_1: DropoutConfig::new(config.dropout_rate).init(),
            dense_2: LinearConfig::new(config.hidden_units, config.num_classes).init(device),
            relu: Relu::new(),
            num_classes: config.num_classes,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = pool_same(&self.max_pooling2d_1, self.relu.forward(self.conv2d_1.forward(x)));
        let x = pool_same(&self.max_pooling2d_2, self.relu.forward(self.conv2d_2.forward(x)));
        let x = pool_same(&self.max_pooling2d_3, self.relu.forward(self.conv2d_3.forward(x)));

        // Flatten: [B, C, H, W] -> [B, C*H*W]
        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.relu.forward(self.dense_1.forward(x));
        let x = self.dropout_1.forward(x);
        self.dense_2.forward(x)
    }

    /// Forward pass with softmax, the `dense_2/Softmax` endpoint
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// 2×2 max-pool with `same` padding: odd sides get one extra row/column
/// at the bottom/right, so the output side is `ceil(side / 2)`.
///
/// Inputs come straight from a ReLU and are non-negative, so zero padding
/// never changes a window maximum.
fn pool_same<B: Backend>(pool: &MaxPool2d, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (pad_bottom, pad_right) = (height % 2, width % 2);
    let x = if pad_bottom + pad_right > 0 {
        x.pad((0, pad_right, 0, pad_bottom), 0.0)
    } else {
        x
    };
    pool.forward(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let config = BanknoteClassifierConfig::new(4).with_image_size(16);
        let model = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 4]);
        assert_eq!(model.num_classes(), 4);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = BanknoteClassifierConfig::new(3)
            .with_image_size(8)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
        let sums: Vec<f32> = model
            .forward_softmax(input)
            .sum_dim(1)
            .into_data()
            .to_vec()
            .unwrap();

        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_flatten_size() {
        let config = BanknoteClassifierConfig::new(2);
        assert_eq!(config.final_feature_size(), 16);
        assert_eq!(config.flatten_size(), 64 * 16 * 16);
        assert_eq!(BanknoteClassifierConfig::new(2).with_image_size(16).flatten_size(), 256);
    }

    #[test]
    fn test_odd_sides_pool_like_same_padding() {
        // 100 -> 50 -> 25 -> 13
        let config = BanknoteClassifierConfig::new(2).with_image_size(100);
        assert_eq!(config.final_feature_size(), 13);
        assert_eq!(config.flatten_size(), 64 * 13 * 13);
        assert_eq!(pooled_side(5), 3);
        assert_eq!(pooled_side(1), 1);
    }

    #[test]
    fn test_forward_on_odd_feature_maps() {
        // 20 -> 10 -> 5 -> 3
        let device = Default::default();
        let config = BanknoteClassifierConfig::new(2).with_image_size(20);
        assert_eq!(config.flatten_size(), 64 * 3 * 3);
        let model = config.init::<TestBackend>(&device);

        let output = model.forward(Tensor::<TestBackend, 4>::ones([1, 3, 20, 20], &device));
        assert_eq!(output.dims(), [1, 2]);
    }

    #[test]
    fn test_pool_same_keeps_border_maximum() {
        let device = Default::default();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let x = Tensor::<TestBackend, 4>::from_floats(
            burn::tensor::TensorData::new((1..=9).map(|v| v as f32).collect::<Vec<_>>(), [1, 1, 3, 3]),
            &device,
        );

        let pooled: Vec<f32> = pool_same(&pool, x).into_data().to_vec().unwrap();
        assert_eq!(pooled, vec![5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn test_validate() {
        assert!(BanknoteClassifierConfig::new(2).validate().is_ok());
        assert!(BanknoteClassifierConfig::new(2).with_image_size(100).validate().is_ok());
        assert!(BanknoteClassifierConfig::new(2).with_image_size(0).validate().is_err());
        assert!(BanknoteClassifierConfig::new(0).validate().is_err());
        assert!(BanknoteClassifierConfig::new(2).with_in_channels(0).validate().is_err());
    }
}
