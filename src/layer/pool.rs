//! Max pooling.

use anyhow::{ensure, Result};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

/// Pooling geometry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Height of each pooling window.
    pub pool_height: usize,
    /// Width of each pooling window.
    pub pool_width: usize,
    /// Distance between adjacent windows, >= 1.
    pub stride: usize,
}

impl PoolConfig {
    /// Output spatial shape for `input` (H, W).
    ///
    /// **Errors**
    ///
    /// Returns an error if the stride or a window dimension is zero, or if
    /// the windows do not tile the spatial extent exactly
    /// (`(H - pool_height) % stride != 0`).
    pub fn output_shape(&self, input: [usize; 2]) -> Result<[usize; 2]> {
        ensure!(self.stride >= 1, "stride must be positive");
        let [ih, iw] = input;
        ensure!(
            (1..=ih).contains(&self.pool_height) && (1..=iw).contains(&self.pool_width),
            "pooling window {}x{} does not fit input [{}, {}]",
            self.pool_height,
            self.pool_width,
            ih,
            iw
        );
        ensure!(
            (ih - self.pool_height) % self.stride == 0
                && (iw - self.pool_width) % self.stride == 0,
            "input {:?}, window {}x{}, stride {} do not produce integer output dimensions",
            input,
            self.pool_height,
            self.pool_width,
            self.stride
        );
        Ok([
            (ih - self.pool_height) / self.stride + 1,
            (iw - self.pool_width) / self.stride + 1,
        ])
    }
}

/// Values saved by [`max_pool_forward`] for the matching backward call: the
/// input shape and, for every output position, the absolute (row, col)
/// coordinate of the selected maximum.
pub struct PoolCache {
    input_dim: (usize, usize, usize, usize),
    argmax: Array4<[usize; 2]>,
}

/// Computes the forward pass of max pooling over (N, C, H, W) input.
///
/// Each output element is the maximum of one window per channel; ties go to
/// the first maximum in row-major scan order, so the selection is
/// deterministic.
///
/// **Errors**
///
/// Returns an error if the window geometry is invalid (see
/// [`PoolConfig::output_shape`]).
pub fn max_pool_forward(
    x: ArrayView4<f64>,
    config: &PoolConfig,
) -> Result<(Array4<f64>, PoolCache)> {
    let (n, c, ih, iw) = x.dim();
    let [oh, ow] = config.output_shape([ih, iw])?;
    let mut out = Array4::<f64>::zeros((n, c, oh, ow));
    let mut argmax = Array4::from_elem((n, c, oh, ow), [0usize; 2]);
    for bid in 0..n {
        for cid in 0..c {
            for i in 0..oh {
                let h0 = i * config.stride;
                for j in 0..ow {
                    let w0 = j * config.stride;
                    let mut best = x[[bid, cid, h0, w0]];
                    let mut best_pos = [h0, w0];
                    for di in 0..config.pool_height {
                        for dj in 0..config.pool_width {
                            let v = x[[bid, cid, h0 + di, w0 + dj]];
                            if v > best {
                                best = v;
                                best_pos = [h0 + di, w0 + dj];
                            }
                        }
                    }
                    out[[bid, cid, i, j]] = best;
                    argmax[[bid, cid, i, j]] = best_pos;
                }
            }
        }
    }
    let cache = PoolCache {
        input_dim: (n, c, ih, iw),
        argmax,
    };
    Ok((out, cache))
}

/// Computes the backward pass of max pooling.
///
/// Each upstream gradient value is routed to the recorded maximum's
/// coordinate. Routing accumulates, so overlapping windows that selected the
/// same input pixel sum their contributions; every other input position
/// receives zero.
///
/// **Errors**
///
/// Returns an error if `dout` does not have the shape of the forward output.
pub fn max_pool_backward(dout: ArrayView4<f64>, cache: &PoolCache) -> Result<Array4<f64>> {
    ensure!(
        dout.dim() == cache.argmax.dim(),
        "upstream gradient {:?} does not match pooling output {:?}",
        dout.dim(),
        cache.argmax.dim()
    );
    let mut dx = Array4::<f64>::zeros(cache.input_dim);
    for ((bid, cid, i, j), &[row, col]) in cache.argmax.indexed_iter() {
        dx[[bid, cid, row, col]] += dout[[bid, cid, i, j]];
    }
    Ok(dx)
}
