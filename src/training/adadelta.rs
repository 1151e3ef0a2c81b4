//! Adadelta optimizer
//!
//! Per-parameter running averages of squared gradients and squared updates:
//!
//! ```text
//! a  = ρ·a + (1 − ρ)·g²
//! Δ  = g · √(d + ε) / √(a + ε)
//! p  = p − lr·Δ
//! d  = ρ·d + (1 − ρ)·Δ²
//! ```
//!
//! With `lr = 1.0` this is the plain Adadelta rule; other values scale the step.

use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, SimpleOptimizer},
    LearningRate,
    record::Record,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};

/// Configuration for [`Adadelta`]
#[derive(Config, Debug)]
pub struct AdadeltaConfig {
    /// Decay rate of the running averages
    #[config(default = 0.95)]
    pub rho: f64,
    /// Added inside the square roots for numerical stability
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

/// Adadelta update rule
#[derive(Clone, Debug)]
pub struct Adadelta {
    rho: f64,
    epsilon: f64,
}

/// Running averages kept for one parameter tensor
#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    /// Running average of squared gradients
    pub square_avg: Tensor<B, D>,
    /// Running average of squared updates
    pub delta_avg: Tensor<B, D>,
}

impl AdadeltaConfig {
    /// Build the update rule without wrapping it for a module
    pub fn build(&self) -> Adadelta {
        Adadelta {
            rho: self.rho,
            epsilon: self.epsilon,
        }
    }

    /// Initialize an Adadelta optimizer for a module
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<Adadelta, M, B> {
        OptimizerAdaptor::from(self.build())
    }
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (square_avg, delta_avg) = match state {
            Some(state) => (state.square_avg, state.delta_avg),
            None => {
                let device = grad.device();
                (
                    Tensor::zeros(grad.shape(), &device),
                    Tensor::zeros(grad.shape(), &device),
                )
            }
        };

        let square_avg = square_avg
            .mul_scalar(self.rho)
            .add(grad.clone().mul(grad.clone()).mul_scalar(1.0 - self.rho));

        let update = grad
            .mul(delta_avg.clone().add_scalar(self.epsilon).sqrt())
            .div(square_avg.clone().add_scalar(self.epsilon).sqrt());

        let delta_avg = delta_avg
            .mul_scalar(self.rho)
            .add(update.clone().mul(update.clone()).mul_scalar(1.0 - self.rho));

        let tensor = tensor.sub(update.mul_scalar(lr));

        (
            tensor,
            Some(AdadeltaState {
                square_avg,
                delta_avg,
            }),
        )
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.square_avg = state.square_avg.to_device(device);
        state.delta_avg = state.delta_avg.to_device(device);
        state
    }
}
