//! Inverted dropout.
//!
//! `p` is the keep probability: each element survives independently with
//! probability `p` and surviving activations are scaled by `1/p` at train
//! time, so no rescaling is needed at test time.

use super::Mode;
use anyhow::{ensure, Result};
use ndarray::{ArrayD, ArrayViewD};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dropout configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DropoutConfig {
    /// Keep probability, in (0, 1].
    pub p: f64,
    /// Train applies the stochastic mask; test is the identity.
    pub mode: Mode,
}

/// Values saved by [`dropout_forward`] for the matching backward call.
///
/// `mask` is `None` when the forward ran in test mode.
pub struct DropoutCache {
    p: f64,
    mask: Option<ArrayD<f64>>,
}

/// Computes the forward pass of inverted dropout.
///
/// In train mode each element is kept with probability `config.p` (mask drawn
/// from `rng` in row-major order) and scaled by `1/p`; in test mode the input
/// is copied through unchanged. The generator is injected so that callers can
/// seed one per run for reproducible masks.
///
/// **Errors**
///
/// Returns an error if `config.p` is outside (0, 1].
pub fn dropout_forward<R: Rng + ?Sized>(
    x: ArrayViewD<f64>,
    config: &DropoutConfig,
    rng: &mut R,
) -> Result<(ArrayD<f64>, DropoutCache)> {
    ensure!(
        config.p > 0.0 && config.p <= 1.0,
        "keep probability {} outside (0, 1]",
        config.p
    );
    match config.mode {
        Mode::Train => {
            let mask = ArrayD::from_shape_simple_fn(x.raw_dim(), || {
                if rng.gen::<f64>() < config.p {
                    1.0
                } else {
                    0.0
                }
            });
            let out = (&x * &mask) / config.p;
            let cache = DropoutCache {
                p: config.p,
                mask: Some(mask),
            };
            Ok((out, cache))
        }
        Mode::Test => {
            let cache = DropoutCache {
                p: config.p,
                mask: None,
            };
            Ok((x.to_owned(), cache))
        }
    }
}

/// Computes the backward pass of inverted dropout.
///
/// Train mode rescales the upstream gradient by `mask / p`; test mode is the
/// identity.
///
/// **Errors**
///
/// Returns an error if `dout` does not match the forward input shape.
pub fn dropout_backward(dout: ArrayViewD<f64>, cache: &DropoutCache) -> Result<ArrayD<f64>> {
    match &cache.mask {
        Some(mask) => {
            ensure!(
                dout.shape() == mask.shape(),
                "upstream gradient {:?} does not match dropout mask {:?}",
                dout.shape(),
                mask.shape()
            );
            Ok((&dout * mask) / cache.p)
        }
        None => Ok(dout.to_owned()),
    }
}
