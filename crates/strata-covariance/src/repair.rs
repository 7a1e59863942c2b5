//! Positive semi-definite repair of correlation matrices
//!
//! Empirical correlation matrices built from pairwise-complete data are not
//! guaranteed to be positive semi-definite, and never are once the category
//! count approaches the number of independent periods. The repair clips the
//! eigenvalue spectrum to a floor and rescales back to a unit diagonal:
//!
//! M' = D · Q · diag(max(λ, ε)) · Qᵗ · D,   D = diag(1/√diag(Q · diag(max(λ, ε)) · Qᵗ))

use super::CovarianceError;
use ndarray::{Array1, Array2, ArrayViewMut1, Axis, Zip, s};
use serde::{Deserialize, Serialize};

/// Configuration for eigenvalue-clipping repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Eigenvalue floor ε (default: 1e-5)
    pub min_eigenvalue: f64,
    /// Maximum number of Jacobi sweeps (default: 100)
    pub max_sweeps: usize,
    /// Convergence tolerance on the off-diagonal norm, relative to the matrix norm (default: 1e-14)
    pub tolerance: f64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            min_eigenvalue: 1e-5,
            max_sweeps: 100,
            tolerance: 1e-14,
        }
    }
}

/// Result of a symmetric eigendecomposition
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues, descending
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns, aligned with `eigenvalues`
    pub eigenvectors: Array2<f64>,
}

impl EigenDecomposition {
    /// Rebuild `Q · diag(eigenvalues) · Qᵗ` with a replacement spectrum.
    pub fn reconstruct(&self, eigenvalues: &Array1<f64>) -> Result<Array2<f64>, CovarianceError> {
        let n = self.eigenvectors.nrows();
        if eigenvalues.len() != n {
            return Err(CovarianceError::DimensionMismatch {
                expected: n,
                actual: eigenvalues.len(),
            });
        }

        let scaled = &self.eigenvectors * &eigenvalues.view().insert_axis(Axis(0));
        Ok(scaled.dot(&self.eigenvectors.t()))
    }
}

fn check_square_finite(matrix: &Array2<f64>) -> Result<(), CovarianceError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(CovarianceError::DimensionMismatch {
            expected: rows,
            actual: cols,
        });
    }
    if let Some(((row, col), _)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(CovarianceError::NonFinite { row, col });
    }
    Ok(())
}

/// Eigendecomposition of a symmetric matrix by threshold Jacobi sweeps.
///
/// The input is symmetrized as `(A + Aᵗ) / 2` first. During the first
/// [`THRESHOLD_SWEEPS`] sweeps only off-diagonal entries above
/// `0.2 · off / n²` are rotated, so the first passes spend their work on the
/// large entries. Sweeps stop once the off-diagonal Frobenius norm falls below
/// `tolerance` times the matrix norm.
///
/// Each sweep costs O(n³). Category tables are expected to hold tens to a few
/// hundred categories, which converge in under ten sweeps.
pub fn symmetric_eigen(
    matrix: &Array2<f64>,
    max_sweeps: usize,
    tolerance: f64,
) -> Result<EigenDecomposition, CovarianceError> {
    check_square_finite(matrix)?;
    let n = matrix.nrows();

    let mut a =
        Array2::from_shape_fn((n, n), |(i, j)| (matrix[[i, j]] + matrix[[j, i]]) / 2.0);
    let mut v = Array2::<f64>::eye(n);
    let norm = a.iter().map(|x| x * x).sum::<f64>().sqrt().max(f64::MIN_POSITIVE);

    let mut converged = n < 2;
    for sweep in 0..max_sweeps {
        let off = off_diagonal_norm(&a);
        if off <= tolerance * norm {
            converged = true;
            break;
        }
        let threshold = if sweep < THRESHOLD_SWEEPS {
            0.2 * off / (n * n) as f64
        } else {
            0.0
        };
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() > threshold {
                    rotate(&mut a, &mut v, p, q);
                }
            }
        }
    }
    if !converged && off_diagonal_norm(&a) > tolerance * norm {
        return Err(CovarianceError::NotConverged { sweeps: max_sweeps });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));

    let eigenvalues = order.iter().map(|&i| a[[i, i]]).collect();
    let mut eigenvectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        eigenvectors.column_mut(dst).assign(&v.column(src));
    }

    Ok(EigenDecomposition {
        eigenvalues,
        eigenvectors,
    })
}

/// Sweeps that skip small off-diagonal entries before every entry is rotated
const THRESHOLD_SWEEPS: usize = 3;

fn off_diagonal_norm(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut sum = 0.0;
    for p in 0..n {
        for q in (p + 1)..n {
            sum += 2.0 * a[[p, q]] * a[[p, q]];
        }
    }
    sum.sqrt()
}

/// Zero `a[p, q]` with one Jacobi rotation, accumulating it into `v`.
fn rotate(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize) {
    let apq = a[[p, q]];
    if apq == 0.0 {
        return;
    }

    let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let sin = t * c;
    let (app, aqq) = (a[[p, p]], a[[q, q]]);

    // Jᵗ·A·J: columns p and q, then rows p and q
    rotate_pair(a.multi_slice_mut((s![.., p], s![.., q])), c, sin);
    rotate_pair(a.multi_slice_mut((s![p, ..], s![q, ..])), c, sin);
    a[[p, p]] = app - t * apq;
    a[[q, q]] = aqq + t * apq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    rotate_pair(v.multi_slice_mut((s![.., p], s![.., q])), c, sin);
}

fn rotate_pair(
    (mut x, mut y): (ArrayViewMut1<'_, f64>, ArrayViewMut1<'_, f64>),
    c: f64,
    sin: f64,
) {
    Zip::from(&mut x).and(&mut y).for_each(|x, y| {
        let (xp, yq) = (*x, *y);
        *x = c * xp - sin * yq;
        *y = sin * xp + c * yq;
    });
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue(matrix: &Array2<f64>) -> Result<f64, CovarianceError> {
    let config = RepairConfig::default();
    let decomp = symmetric_eigen(matrix, config.max_sweeps, config.tolerance)?;
    Ok(decomp
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min))
}

/// Whether every eigenvalue of `matrix` is at least `floor`.
pub fn is_positive_semi_definite(matrix: &Array2<f64>, floor: f64) -> bool {
    min_eigenvalue(matrix).is_ok_and(|min| min >= floor)
}

/// Repair a correlation matrix so it is positive semi-definite with a unit diagonal.
///
/// Eigenvalues below `config.min_eigenvalue` are raised to it, the matrix is
/// rebuilt and rescaled by `D·M·D`. The result is exactly symmetric with an
/// exact unit diagonal.
pub fn repair_correlation(
    matrix: &Array2<f64>,
    config: &RepairConfig,
) -> Result<Array2<f64>, CovarianceError> {
    if !(config.min_eigenvalue > 0.0 && config.min_eigenvalue.is_finite()) {
        return Err(CovarianceError::InvalidParameter(format!(
            "min_eigenvalue must be positive, got {}",
            config.min_eigenvalue
        )));
    }

    let decomp = symmetric_eigen(matrix, config.max_sweeps, config.tolerance)?;
    let clipped = decomp.eigenvalues.mapv(|l| l.max(config.min_eigenvalue));
    let rebuilt = decomp.reconstruct(&clipped)?;

    let scale = rebuilt.diag().mapv(|d| {
        if d > 0.0 { 1.0 / d.sqrt() } else { f64::NAN }
    });
    if scale.iter().any(|s| !s.is_finite()) {
        return Err(CovarianceError::NotPositiveDefinite(
            "reconstructed matrix has a non-positive diagonal".to_string(),
        ));
    }

    let n = rebuilt.nrows();
    let mut repaired = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        repaired[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let r = (scale[i] * rebuilt[[i, j]] * scale[j]).clamp(-1.0, 1.0);
            repaired[[i, j]] = r;
            repaired[[j, i]] = r;
        }
    }

    Ok(repaired)
}
