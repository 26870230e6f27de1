//! Layer forward/backward pairs.
//!
//! Each forward returns its output together with a layer-specific cache
//! struct; the matching backward consumes that cache plus the upstream
//! gradient. A cache is valid for exactly one backward call of the layer
//! that produced it, which the cache types enforce. Forward passes never
//! alias their inputs: outputs are always freshly allocated.

use serde::{Deserialize, Serialize};

mod affine;
mod batchnorm;
mod conv;
mod dropout;
mod pool;
mod relu;

pub use affine::{affine_backward, affine_forward, AffineCache};
pub use batchnorm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, spatial_batchnorm_backward,
    spatial_batchnorm_forward, BatchNormCache, BatchNormConfig, BatchNormState,
};
pub use conv::{conv_backward, conv_forward, ConvCache, ConvConfig};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache, DropoutConfig};
pub use pool::{max_pool_backward, max_pool_forward, PoolCache, PoolConfig};
pub use relu::{relu_backward, relu_forward, ReluCache};

/// Whether a mode-dependent layer (batch normalization, dropout) runs in
/// training or inference mode.
///
/// Selected per call through the layer's config; layers hold no mode state of
/// their own.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Mode {
    /// Use batch statistics / stochastic masking.
    Train,
    /// Use running statistics / identity passthrough.
    Test,
}
