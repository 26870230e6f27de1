//! 2d convolution.
//!
//! Naive direct loops over every (example, filter, output position, filter
//! tap). The forward pass materializes the zero-padded input; the backward
//! pass instead maps each tap back to unpadded coordinates with signed
//! arithmetic and skips taps that land in the border, so no gradient ever
//! flows into padding. Both passes share the offset arithmetic
//! `row = i * stride + tap_row - pad`.

use anyhow::{ensure, Result};
use ndarray::{s, Array1, Array4, ArrayView1, ArrayView4};
use serde::{Deserialize, Serialize};

/// Convolution geometry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ConvConfig {
    /// Spacing between adjacent receptive fields, >= 1.
    pub stride: usize,
    /// Zero-padding width on each spatial side.
    pub pad: usize,
}

impl ConvConfig {
    /// Output spatial shape for `input` (H, W) and `filter` (HH, WW).
    ///
    /// **Errors**
    ///
    /// Returns an error if the stride is zero, the filter does not fit the
    /// padded input, or the geometry does not land exactly on a grid
    /// (`(H + 2 * pad - HH) % stride != 0`); all are configuration errors on
    /// the caller's side.
    pub fn output_shape(&self, input: [usize; 2], filter: [usize; 2]) -> Result<[usize; 2]> {
        ensure!(self.stride >= 1, "stride must be positive");
        let [ih, iw] = input;
        let [fh, fw] = filter;
        let ph = ih + 2 * self.pad;
        let pw = iw + 2 * self.pad;
        ensure!(
            (1..=ph).contains(&fh) && (1..=pw).contains(&fw),
            "filter {:?} does not fit padded input [{}, {}]",
            filter,
            ph,
            pw
        );
        ensure!(
            (ph - fh) % self.stride == 0 && (pw - fw) % self.stride == 0,
            "input {:?}, filter {:?}, stride {}, pad {} do not produce integer output dimensions",
            input,
            filter,
            self.stride,
            self.pad
        );
        Ok([
            (ph - fh) / self.stride + 1,
            (pw - fw) / self.stride + 1,
        ])
    }
}

/// Values saved by [`conv_forward`] for the matching backward call: the
/// inputs and parameters, verbatim.
pub struct ConvCache {
    x: Array4<f64>,
    w: Array4<f64>,
    #[allow(dead_code)]
    b: Array1<f64>,
    config: ConvConfig,
}

/// Computes the forward pass of a convolutional layer.
///
/// `x` has shape (N, C, H, W), `w` (F, C, HH, WW), `b` (F,). The spatial
/// dimensions are zero-padded by `config.pad` on each side, and every output
/// element is the dot product of one filter with its receptive field plus
/// the filter's bias. Output shape is (N, F, H', W') with
/// `H' = 1 + (H + 2 * pad - HH) / stride`.
///
/// **Errors**
///
/// Returns an error if the channel counts of `x` and `w` disagree, `b` does
/// not have one element per filter, or the geometry is invalid (see
/// [`ConvConfig::output_shape`]).
pub fn conv_forward(
    x: ArrayView4<f64>,
    w: ArrayView4<f64>,
    b: ArrayView1<f64>,
    config: &ConvConfig,
) -> Result<(Array4<f64>, ConvCache)> {
    let (n, c, ih, iw) = x.dim();
    let (f, wc, fh, fw) = w.dim();
    ensure!(
        c == wc,
        "input has {} channels, filters expect {}",
        c,
        wc
    );
    ensure!(
        b.len() == f,
        "bias has {} elements for {} filters",
        b.len(),
        f
    );
    let [oh, ow] = config.output_shape([ih, iw], [fh, fw])?;
    let (stride, pad) = (config.stride, config.pad);

    let mut x_pad = Array4::<f64>::zeros((n, c, ih + 2 * pad, iw + 2 * pad));
    x_pad
        .slice_mut(s![.., .., pad..pad + ih, pad..pad + iw])
        .assign(&x);

    let mut out = Array4::<f64>::zeros((n, f, oh, ow));
    for bid in 0..n {
        for fid in 0..f {
            let filter = w.slice(s![fid, .., .., ..]);
            for i in 0..oh {
                let h0 = i * stride;
                for j in 0..ow {
                    let w0 = j * stride;
                    let window = x_pad.slice(s![bid, .., h0..h0 + fh, w0..w0 + fw]);
                    let dot: f64 = window
                        .iter()
                        .zip(filter.iter())
                        .map(|(&xv, &wv)| xv * wv)
                        .sum();
                    out[[bid, fid, i, j]] = dot + b[fid];
                }
            }
        }
    }
    let cache = ConvCache {
        x: x.to_owned(),
        w: w.to_owned(),
        b: b.to_owned(),
        config: *config,
    };
    Ok((out, cache))
}

/// Computes the backward pass of a convolutional layer.
///
/// Returns `(dx, dw, db)`. One sweep over every (example, filter, output
/// position, channel, filter tap) accumulates all three gradients; each
/// (output position, tap) pair maps to exactly one input pixel, and pairs
/// that land in the zero-padded border are skipped.
///
/// **Errors**
///
/// Returns an error if `dout` does not have the (N, F, H', W') shape implied
/// by the cache.
pub fn conv_backward(
    dout: ArrayView4<f64>,
    cache: &ConvCache,
) -> Result<(Array4<f64>, Array4<f64>, Array1<f64>)> {
    let ConvCache { x, w, config, .. } = cache;
    let (n, c, ih, iw) = x.dim();
    let (f, _, fh, fw) = w.dim();
    let [oh, ow] = config.output_shape([ih, iw], [fh, fw])?;
    ensure!(
        dout.dim() == (n, f, oh, ow),
        "upstream gradient {:?} does not match convolution output ({}, {}, {}, {})",
        dout.dim(),
        n,
        f,
        oh,
        ow
    );
    let stride = config.stride;
    let pad = config.pad as isize;

    let mut dx = Array4::<f64>::zeros(x.raw_dim());
    let mut dw = Array4::<f64>::zeros(w.raw_dim());
    let mut db = Array1::<f64>::zeros(f);
    for bid in 0..n {
        for fid in 0..f {
            for i in 0..oh {
                for j in 0..ow {
                    let g = dout[[bid, fid, i, j]];
                    db[fid] += g;
                    for cid in 0..c {
                        for ti in 0..fh {
                            let row = (i * stride + ti) as isize - pad;
                            if row < 0 || row >= ih as isize {
                                continue;
                            }
                            for tj in 0..fw {
                                let col = (j * stride + tj) as isize - pad;
                                if col < 0 || col >= iw as isize {
                                    continue;
                                }
                                let (row, col) = (row as usize, col as usize);
                                dw[[fid, cid, ti, tj]] += g * x[[bid, cid, row, col]];
                                dx[[bid, cid, row, col]] += g * w[[fid, cid, ti, tj]];
                            }
                        }
                    }
                }
            }
        }
    }
    Ok((dx, dw, db))
}
