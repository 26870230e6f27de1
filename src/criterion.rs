//! Loss functions and classification metrics.
//!
//! Pure functions from scores of shape (N, C) and integer labels of shape
//! (N,) to a scalar loss averaged over the batch plus the gradient of that
//! loss with respect to the scores.

use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};

fn check_labels(x: &ArrayView2<f64>, y: &ArrayView1<usize>) -> Result<(usize, usize)> {
    let (n, c) = x.dim();
    ensure!(
        y.len() == n,
        "{} labels for {} score rows",
        y.len(),
        n
    );
    ensure!(n > 0, "loss requires at least one example");
    for (i, &label) in y.iter().enumerate() {
        ensure!(
            label < c,
            "label {} of example {} out of range for {} classes",
            label,
            i,
            c
        );
    }
    Ok((n, c))
}

/// Computes the multiclass SVM (hinge) loss and its gradient.
///
/// Uses a margin of 1, averaged over the batch.
///
/// **Errors**
///
/// Returns an error if the label count does not match the score rows, the
/// batch is empty, or any label is outside [0, C).
pub fn svm_loss(x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<(f64, Array2<f64>)> {
    let (n, c) = check_labels(&x, &y)?;
    let nf = n as f64;
    let mut loss = 0.0;
    let mut dx = Array2::<f64>::zeros((n, c));
    for (i, (row, &label)) in x.outer_iter().zip(y.iter()).enumerate() {
        let correct = row[label];
        let mut violations = 0usize;
        for (j, &score) in row.iter().enumerate() {
            if j == label {
                continue;
            }
            let margin = score - correct + 1.0;
            if margin > 0.0 {
                loss += margin;
                violations += 1;
                dx[[i, j]] = 1.0;
            }
        }
        dx[[i, label]] = -(violations as f64);
    }
    loss /= nf;
    dx /= nf;
    Ok((loss, dx))
}

/// Computes the softmax cross-entropy loss and its gradient.
///
/// The softmax is stabilized by subtracting the per-row maximum before
/// exponentiating; the gradient is `(probabilities - one_hot(labels)) / N`.
///
/// **Errors**
///
/// As [`svm_loss`].
pub fn softmax_loss(x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<(f64, Array2<f64>)> {
    let (n, c) = check_labels(&x, &y)?;
    let nf = n as f64;
    let mut probs = Array2::<f64>::zeros((n, c));
    let mut loss = 0.0;
    for ((row, mut p), &label) in x.outer_iter().zip(probs.outer_iter_mut()).zip(y.iter()) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let mut sum = 0.0;
        for (&score, p) in row.iter().zip(p.iter_mut()) {
            *p = (score - max).exp();
            sum += *p;
        }
        for p in p.iter_mut() {
            *p /= sum;
        }
        loss -= p[label].ln();
    }
    loss /= nf;
    let mut dx = probs;
    for (i, &label) in y.iter().enumerate() {
        dx[[i, label]] -= 1.0;
    }
    dx /= nf;
    Ok((loss, dx))
}

/// Counts the examples whose highest score lands on their label.
///
/// **Errors**
///
/// As [`svm_loss`].
pub fn accuracy(x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<usize> {
    check_labels(&x, &y)?;
    let correct = x
        .outer_iter()
        .zip(y.iter().copied())
        .filter(|(row, label)| {
            let mut max = row[0];
            let mut max_index = 0;
            for (j, &score) in row.iter().enumerate() {
                if score > max {
                    max = score;
                    max_index = j;
                }
            }
            max_index == *label
        })
        .count();
    Ok(correct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn softmax_on_known_example() {
        let x = arr2(&[[1.0, 2.0, 3.0]]);
        let y = arr1(&[2usize]);
        let (loss, dx) = softmax_loss(x.view(), y.view()).unwrap();
        let exp: Vec<f64> = [1.0, 2.0, 3.0].iter().map(|&v: &f64| (v - 3.0).exp()).collect();
        let sum: f64 = exp.iter().sum();
        let probs: Vec<f64> = exp.iter().map(|&e| e / sum).collect();
        assert_relative_eq!(loss, -probs[2].ln(), max_relative = 1e-12);
        assert_relative_eq!(dx[[0, 0]], probs[0], max_relative = 1e-12);
        assert_relative_eq!(dx[[0, 1]], probs[1], max_relative = 1e-12);
        assert_relative_eq!(dx[[0, 2]], probs[2] - 1.0, max_relative = 1e-12);
    }

    #[test]
    fn svm_counts_margin_violations() {
        // Scores far below the correct class incur no loss.
        let x = arr2(&[[10.0, 0.0, 0.0]]);
        let y = arr1(&[0usize]);
        let (loss, dx) = svm_loss(x.view(), y.view()).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(dx, arr2(&[[0.0, 0.0, 0.0]]));

        // Both wrong classes violate the margin by 1.
        let x = arr2(&[[0.0, 0.0, 0.0]]);
        let (loss, dx) = svm_loss(x.view(), y.view()).unwrap();
        assert_relative_eq!(loss, 2.0);
        assert_eq!(dx, arr2(&[[-2.0, 1.0, 1.0]]));
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let x = arr2(&[[0.0, 1.0]]);
        let y = arr1(&[2usize]);
        assert!(softmax_loss(x.view(), y.view()).is_err());
        assert!(svm_loss(x.view(), y.view()).is_err());
        assert!(accuracy(x.view(), y.view()).is_err());
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let x = arr2(&[[0.1, 0.9], [0.8, 0.2], [0.4, 0.6]]);
        let y = arr1(&[1usize, 0, 0]);
        assert_eq!(accuracy(x.view(), y.view()).unwrap(), 2);
    }
}
