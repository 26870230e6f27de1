//! Affine (fully connected) layer.

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis};

/// Values saved by [`affine_forward`] for the matching backward call.
pub struct AffineCache {
    x: ArrayD<f64>,
    w: Array2<f64>,
}

/// Computes the forward pass of an affine layer.
///
/// The input `x` of shape (N, d1, ..., dk) is flattened per example to
/// (N, D) and mapped through `w` of shape (D, M) and `b` of shape (M,) to an
/// output of shape (N, M).
///
/// **Errors**
///
/// Returns an error if `x` does not flatten to (N, D) or `b` does not have
/// M elements.
pub fn affine_forward(
    x: ArrayViewD<f64>,
    w: ArrayView2<f64>,
    b: ArrayView1<f64>,
) -> Result<(Array2<f64>, AffineCache)> {
    ensure!(!x.shape().is_empty(), "affine input must have a batch dimension");
    let n = x.shape()[0];
    let (d, m) = w.dim();
    ensure!(
        x.len() == n * d,
        "affine input {:?} does not flatten to ({}, {})",
        x.shape(),
        n,
        d
    );
    ensure!(
        b.len() == m,
        "affine bias has {} elements, weight maps to {}",
        b.len(),
        m
    );
    let x_owned = x.to_owned();
    let x_flat = x_owned.view().into_shape((n, d))?;
    let out = x_flat.dot(&w) + &b;
    Ok((out, AffineCache { x: x_owned, w: w.to_owned() }))
}

/// Computes the backward pass of an affine layer.
///
/// Returns `(dx, dw, db)` where `dx` has the original shape of the forward
/// input, `dw` is the flattened-input transpose times `dout`, and `db` is the
/// column sum of `dout`.
///
/// **Errors**
///
/// Returns an error if `dout` does not have the (N, M) shape of the forward
/// output.
pub fn affine_backward(
    dout: ArrayView2<f64>,
    cache: &AffineCache,
) -> Result<(ArrayD<f64>, Array2<f64>, Array1<f64>)> {
    let AffineCache { x, w } = cache;
    let n = x.shape()[0];
    let (d, m) = w.dim();
    ensure!(
        dout.dim() == (n, m),
        "upstream gradient {:?} does not match affine output ({}, {})",
        dout.dim(),
        n,
        m
    );
    let x_flat = x.view().into_shape((n, d))?;
    let dx = dout.dot(&w.t()).into_shape(x.raw_dim())?;
    let dw = x_flat.t().dot(&dout);
    let db = dout.sum_axis(Axis(0));
    Ok((dx, dw, db))
}
