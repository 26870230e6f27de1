//! Batch normalization, vanilla and spatial.
//!
//! Training-mode forward normalizes with per-feature batch statistics and
//! decays the caller-owned running statistics as a side effect; test-mode
//! forward normalizes with the running statistics alone. The backward pass
//! has two interchangeable forms: a graph-accumulation form that
//! differentiates through the mean/variance nodes explicitly, and a
//! simplified closed form. Both account for the cross-batch coupling
//! introduced by the shared mean and variance.

use super::Mode;
use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView2, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

/// Batch normalization configuration.
///
/// Built with [`BatchNormConfig::new`]; `eps` defaults to `1e-5` and
/// `momentum` to `0.9`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BatchNormConfig {
    /// Train normalizes with batch statistics, test with running statistics.
    pub mode: Mode,
    /// Floor added to the variance before taking the square root.
    pub eps: f64,
    /// Running-statistic decay: `running = momentum * running + (1 - momentum) * batch`.
    pub momentum: f64,
}

impl BatchNormConfig {
    /// Creates a config for `mode` with the default `eps` and `momentum`.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            eps: 1e-5,
            momentum: 0.9,
        }
    }
    /// Overrides `eps`.
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }
    /// Overrides `momentum`.
    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
}

/// Caller-owned per-feature running mean and variance.
///
/// Created once before the first forward call, updated by every
/// training-mode forward, read by test-mode forwards, and never owned by the
/// layer itself.
#[derive(Clone, Debug)]
pub struct BatchNormState {
    /// Exponentially decayed mean of each feature.
    pub running_mean: Array1<f64>,
    /// Exponentially decayed variance of each feature.
    pub running_var: Array1<f64>,
}

impl BatchNormState {
    /// Zero-initialized statistics for `features` features.
    pub fn zeros(features: usize) -> Self {
        Self {
            running_mean: Array1::zeros(features),
            running_var: Array1::zeros(features),
        }
    }
}

/// Values saved by a training-mode [`batchnorm_forward`] for the matching
/// backward call.
pub struct BatchNormCache {
    gamma: Array1<f64>,
    x_cen: Array2<f64>,
    inv_std: Array1<f64>,
    x_hat: Array2<f64>,
    x: Array2<f64>,
}

fn check_features(
    d: usize,
    gamma: &ArrayView1<f64>,
    beta: &ArrayView1<f64>,
    state: &BatchNormState,
) -> Result<()> {
    ensure!(
        gamma.len() == d && beta.len() == d,
        "gamma/beta of {}/{} elements do not match {} features",
        gamma.len(),
        beta.len(),
        d
    );
    ensure!(
        state.running_mean.len() == d && state.running_var.len() == d,
        "running statistics of {}/{} elements do not match {} features",
        state.running_mean.len(),
        state.running_var.len(),
        d
    );
    Ok(())
}

/// Computes the forward pass of batch normalization over (N, D) input.
///
/// Train mode computes the per-feature mean and biased variance across the
/// batch, normalizes with them, applies the learned scale and shift, decays
/// `state`, and returns a cache. Test mode normalizes with `state` alone and
/// returns no cache.
///
/// **Errors**
///
/// Returns an error if the feature counts of `gamma`, `beta`, or `state`
/// disagree with `x`, if `eps` is not positive, if `momentum` is outside
/// [0, 1], or if a training batch is empty.
pub fn batchnorm_forward(
    x: ArrayView2<f64>,
    gamma: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> Result<(Array2<f64>, Option<BatchNormCache>)> {
    let (n, d) = x.dim();
    check_features(d, &gamma, &beta, state)?;
    ensure!(config.eps > 0.0, "eps {} must be positive", config.eps);
    ensure!(
        (0.0..=1.0).contains(&config.momentum),
        "momentum {} outside [0, 1]",
        config.momentum
    );
    match config.mode {
        Mode::Train => {
            ensure!(n > 0, "training-mode batch norm requires a non-empty batch");
            let nf = n as f64;
            let mu = x.sum_axis(Axis(0)) / nf;
            let x_cen = &x - &mu;
            let var = x_cen.mapv(|v| v * v).sum_axis(Axis(0)) / nf;

            state.running_mean =
                &state.running_mean * config.momentum + &mu * (1.0 - config.momentum);
            state.running_var =
                &state.running_var * config.momentum + &var * (1.0 - config.momentum);

            let inv_std = var.mapv(|v| 1.0 / (v + config.eps).sqrt());
            let x_hat = &x_cen * &inv_std;
            let out = &x_hat * &gamma + &beta;
            let cache = BatchNormCache {
                gamma: gamma.to_owned(),
                x_cen,
                inv_std,
                x_hat,
                x: x.to_owned(),
            };
            Ok((out, Some(cache)))
        }
        Mode::Test => {
            let inv_std = state.running_var.mapv(|v| 1.0 / (v + config.eps).sqrt());
            let x_hat = (&x - &state.running_mean) * &inv_std;
            let out = x_hat * &gamma + &beta;
            Ok((out, None))
        }
    }
}

fn check_upstream(dout: &ArrayView2<f64>, cache: &BatchNormCache) -> Result<(usize, usize)> {
    let (n, d) = cache.x.dim();
    ensure!(
        dout.dim() == (n, d),
        "upstream gradient {:?} does not match batch norm output ({}, {})",
        dout.dim(),
        n,
        d
    );
    Ok((n, d))
}

/// Computes the backward pass of batch normalization by walking the forward
/// computation graph.
///
/// The mean and variance are functions of every example in the batch, so the
/// gradient w.r.t. `x` picks up cross-batch terms through them; they are
/// accumulated here as explicit `dvar` and `dmu` nodes.
///
/// Returns `(dx, dgamma, dbeta)`.
pub fn batchnorm_backward(
    dout: ArrayView2<f64>,
    cache: &BatchNormCache,
) -> Result<(Array2<f64>, Array1<f64>, Array1<f64>)> {
    let (n, _) = check_upstream(&dout, cache)?;
    let BatchNormCache {
        gamma,
        x_cen,
        inv_std,
        x_hat,
        ..
    } = cache;
    let nf = n as f64;

    let dx_hat = &dout * gamma;
    let inv_std_cubed = inv_std.mapv(|v| v.powi(3));
    let dvar = (&dx_hat * x_cen * &inv_std_cubed).sum_axis(Axis(0)) * -0.5;
    let dmu =
        -(&dx_hat * inv_std).sum_axis(Axis(0)) - &dvar * 2.0 * (x_cen.sum_axis(Axis(0)) / nf);
    let dx = &dx_hat * inv_std + (x_cen * 2.0 * &dvar + &dmu) / nf;

    let dgamma = (&dout * x_hat).sum_axis(Axis(0));
    let dbeta = dout.sum_axis(Axis(0));
    Ok((dx, dgamma, dbeta))
}

/// Computes the backward pass of batch normalization in simplified closed
/// form.
///
/// Collapsing the graph of [`batchnorm_backward`] gives
/// `dx = gamma * inv_std / N * (N * dout - dbeta - x_hat * dgamma)`,
/// which agrees with the graph form to floating tolerance.
pub fn batchnorm_backward_alt(
    dout: ArrayView2<f64>,
    cache: &BatchNormCache,
) -> Result<(Array2<f64>, Array1<f64>, Array1<f64>)> {
    let (n, _) = check_upstream(&dout, cache)?;
    let BatchNormCache {
        gamma,
        inv_std,
        x_hat,
        ..
    } = cache;
    let nf = n as f64;

    let dgamma = (&dout * x_hat).sum_axis(Axis(0));
    let dbeta = dout.sum_axis(Axis(0));
    let scale = gamma * inv_std / nf;
    let centered = &dout * nf - &dbeta - x_hat * &dgamma;
    let dx = centered * &scale;
    Ok((dx, dgamma, dbeta))
}

/// Computes the forward pass of spatial batch normalization over (N, C, H, W)
/// input.
///
/// Pure adapter over [`batchnorm_forward`]: the channel axis becomes the
/// feature axis and the N * H * W positions become the sample axis, so the
/// statistics are per channel across the batch and both spatial dimensions.
///
/// **Errors**
///
/// As [`batchnorm_forward`], with C as the feature count.
pub fn spatial_batchnorm_forward(
    x: ArrayView4<f64>,
    gamma: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> Result<(Array4<f64>, Option<BatchNormCache>)> {
    let (n, c, h, w) = x.dim();
    let x_flat = x
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .into_owned()
        .into_shape((n * h * w, c))?;
    let (out_flat, cache) = batchnorm_forward(x_flat.view(), gamma, beta, config, state)?;
    let out = out_flat
        .into_shape((n, h, w, c))?
        .permuted_axes([0, 3, 1, 2])
        .as_standard_layout()
        .into_owned();
    Ok((out, cache))
}

/// Computes the backward pass of spatial batch normalization.
///
/// Same adapter as [`spatial_batchnorm_forward`], around
/// [`batchnorm_backward`].
pub fn spatial_batchnorm_backward(
    dout: ArrayView4<f64>,
    cache: &BatchNormCache,
) -> Result<(Array4<f64>, Array1<f64>, Array1<f64>)> {
    let (n, c, h, w) = dout.dim();
    let dout_flat = dout
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .into_owned()
        .into_shape((n * h * w, c))?;
    let (dx_flat, dgamma, dbeta) = batchnorm_backward(dout_flat.view(), cache)?;
    let dx = dx_flat
        .into_shape((n, h, w, c))?
        .permuted_axes([0, 3, 1, 2])
        .as_standard_layout()
        .into_owned();
    Ok((dx, dgamma, dbeta))
}
