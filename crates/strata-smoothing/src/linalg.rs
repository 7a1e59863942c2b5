//! Dense symmetric positive-definite solves

use crate::error::{Result, SmoothingError};
use ndarray::Array2;

/// Lower-triangular Cholesky factor `L` with `A = L·Lᵗ`.
///
/// `step` is only used to label the error.
pub(crate) fn cholesky(a: &Array2<f64>, step: usize) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SmoothingError::DimensionMismatch {
            expected: vec![n, n],
            actual: a.shape().to_vec(),
        });
    }

    let mut lower = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += lower[[i, k]] * lower[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if !(diag > 0.0 && diag.is_finite()) {
                    return Err(SmoothingError::NotPositiveDefinite {
                        step,
                        reason: format!("pivot {i} is {diag}"),
                    });
                }
                lower[[i, i]] = diag.sqrt();
            } else {
                lower[[i, j]] = (a[[i, j]] - sum) / lower[[j, j]];
            }
        }
    }

    Ok(lower)
}

/// Solve `A·X = B` given the Cholesky factor of `A`.
pub(crate) fn cholesky_solve(lower: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let n = lower.nrows();
    let mut x = b.clone();

    for col in 0..x.ncols() {
        // forward: L·y = b
        for i in 0..n {
            let mut sum = x[[i, col]];
            for k in 0..i {
                sum -= lower[[i, k]] * x[[k, col]];
            }
            x[[i, col]] = sum / lower[[i, i]];
        }
        // backward: Lᵗ·x = y
        for i in (0..n).rev() {
            let mut sum = x[[i, col]];
            for k in (i + 1)..n {
                sum -= lower[[k, i]] * x[[k, col]];
            }
            x[[i, col]] = sum / lower[[i, i]];
        }
    }

    x
}

/// Replace `m` by `(m + mᵗ) / 2`.
pub(crate) fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let l = cholesky(&a, 0).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in a.iter().zip(back.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
        assert_eq!(l[[0, 1]], 0.0);
    }

    #[test]
    fn test_solve_inverts() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![[1.0, 0.0], [0.0, 1.0]];
        let x = cholesky_solve(&cholesky(&a, 0).unwrap(), &b);
        let identity = a.dot(&x);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_indefinite_is_error() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            cholesky(&a, 3),
            Err(SmoothingError::NotPositiveDefinite { step: 3, .. })
        ));
    }
}
