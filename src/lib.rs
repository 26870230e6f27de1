//! Reference forward and backward passes for the building blocks of a
//! convolutional neural network.
//!
//! Every layer follows the same convention: the forward pass maps its inputs
//! and parameters to an output plus a cache, and the backward pass maps an
//! upstream gradient and that cache to gradients with respect to the layer's
//! inputs and parameters. Layers are stateless free functions; the only
//! mutable state anywhere is the caller-owned running statistics of batch
//! normalization ([`BatchNormState`](layer::BatchNormState)).
//!
//! The implementations are deliberately naive: plain loops over [`ndarray`]
//! views, written so the receptive-field arithmetic of each forward pass is
//! mirrored exactly by its backward pass. They are intended as a ground truth
//! for gradient checking, not as production kernels.
//!
//! # Example
//! ```
//! use convnet_kernels::layer::{conv_forward, conv_backward, ConvConfig};
//! use ndarray::{Array1, Array4};
//!
//! # fn main() -> anyhow::Result<()> {
//! let x = Array4::<f64>::zeros((2, 3, 8, 8));
//! let w = Array4::<f64>::zeros((4, 3, 3, 3));
//! let b = Array1::<f64>::zeros(4);
//! let config = ConvConfig { stride: 1, pad: 1 };
//! let (out, cache) = conv_forward(x.view(), w.view(), b.view(), &config)?;
//! assert_eq!(out.dim(), (2, 4, 8, 8));
//! let (dx, _dw, _db) = conv_backward(out.view(), &cache)?;
//! assert_eq!(dx.dim(), x.dim());
//! # Ok(())
//! # }
//! ```

/// Loss functions and classification metrics.
pub mod criterion;

/// Layer forward/backward pairs.
pub mod layer;

pub use criterion::{accuracy, softmax_loss, svm_loss};
pub use layer::{
    affine_backward, affine_forward, batchnorm_backward, batchnorm_backward_alt,
    batchnorm_forward, conv_backward, conv_forward, dropout_backward, dropout_forward,
    max_pool_backward, max_pool_forward, relu_backward, relu_forward,
    spatial_batchnorm_backward, spatial_batchnorm_forward, BatchNormConfig, BatchNormState,
    ConvConfig, DropoutConfig, Mode, PoolConfig,
};
