//! Rectified linear activation.

use anyhow::{ensure, Result};
use ndarray::{ArrayD, ArrayViewD, Zip};

/// Values saved by [`relu_forward`] for the matching backward call.
pub struct ReluCache {
    x: ArrayD<f64>,
}

/// Computes elementwise `max(0, x)`.
///
/// The output is a fresh array; the input is never aliased or mutated.
pub fn relu_forward(x: ArrayViewD<f64>) -> Result<(ArrayD<f64>, ReluCache)> {
    let out = x.mapv(|v| v.max(0.0));
    Ok((out, ReluCache { x: x.to_owned() }))
}

/// Passes the upstream gradient through where the cached input was positive
/// and zeroes it where the cached input was <= 0.
///
/// **Errors**
///
/// Returns an error if `dout` does not have the shape of the forward input.
pub fn relu_backward(dout: ArrayViewD<f64>, cache: &ReluCache) -> Result<ArrayD<f64>> {
    ensure!(
        dout.shape() == cache.x.shape(),
        "upstream gradient {:?} does not match relu input {:?}",
        dout.shape(),
        cache.x.shape()
    );
    let mut dx = dout.to_owned();
    Zip::from(&mut dx).and(&cache.x).for_each(|d, &x| {
        if x <= 0.0 {
            *d = 0.0;
        }
    });
    Ok(dx)
}
