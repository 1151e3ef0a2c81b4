//! Backend selection
//!
//! NdArray (CPU) is the default; the `cuda` feature switches training to the
//! CUDA backend. Everything else in the crate is generic over `Backend`.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Autodiff backend used by the trainer
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device type of the selected backend
pub type DefaultDevice = <DefaultBackend as Backend>::Device;

/// Get the default device
pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}
