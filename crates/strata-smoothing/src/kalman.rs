//! Reference smoothing engine: vector random walk with RTS smoothing
//!
//! State and observation equations, per partition:
//!
//! x_t = x_{t-1} + w_t,   w_t ~ N(0, Q)
//! z_t = x_t + v_t,       v_t ~ N(0, R_t)
//!
//! The prior is centred on the first observed row with covariance `R_0 + Q`.
//! Unobserved cells enter as 0; their measurement variance comes from a zero
//! sample count and is large enough that they carry no weight.

use crate::error::{Result, SmoothingError};
use crate::linalg::{cholesky, cholesky_solve, symmetrize};
use crate::model::{OutputKind, SmoothingModel, output_column};
use crate::partition::Partition;
use ndarray::{Array1, Array2, Array3, Axis};
use std::fmt;
use tracing::debug;

/// Something that adds `<prefix>_KF` and `<prefix>_RTS` columns to a partition
pub trait SmoothingEngine: fmt::Debug + Send + Sync {
    /// Smooth `model`'s metric in `partition`, adding the model's output columns.
    fn smooth(&self, model: &dyn SmoothingModel, partition: &mut Partition) -> Result<()>;
}

/// Filtered and smoothed state means, both `T × C`
#[derive(Debug, Clone)]
pub struct KalmanOutput {
    /// Forward filter means
    pub filtered: Array2<f64>,
    /// Rauch–Tung–Striebel smoothed means
    pub smoothed: Array2<f64>,
}

/// Kalman filter with a Rauch–Tung–Striebel backward pass
#[derive(Debug, Clone, Copy, Default)]
pub struct KalmanSmoother;

impl KalmanSmoother {
    /// Create the engine.
    pub const fn new() -> Self {
        Self
    }

    /// Run the filter and smoother on raw arrays.
    ///
    /// `observations` is `T × C` (NaN read as 0), `process` is `C × C` and
    /// `measurement` is `T × C × C`.
    pub fn run(
        &self,
        observations: &Array2<f64>,
        process: &Array2<f64>,
        measurement: &Array3<f64>,
    ) -> Result<KalmanOutput> {
        let (steps, n) = observations.dim();
        if process.dim() != (n, n) {
            return Err(SmoothingError::DimensionMismatch {
                expected: vec![n, n],
                actual: process.shape().to_vec(),
            });
        }
        if measurement.dim() != (steps, n, n) {
            return Err(SmoothingError::DimensionMismatch {
                expected: vec![steps, n, n],
                actual: measurement.shape().to_vec(),
            });
        }
        if steps == 0 || n == 0 {
            return Ok(KalmanOutput {
                filtered: Array2::zeros((steps, n)),
                smoothed: Array2::zeros((steps, n)),
            });
        }

        let z = observations.mapv(|v| if v.is_nan() { 0.0 } else { v });

        let mut filtered = Array2::<f64>::zeros((steps, n));
        let mut filtered_cov: Vec<Array2<f64>> = Vec::with_capacity(steps);
        let mut predicted_cov: Vec<Array2<f64>> = Vec::with_capacity(steps);

        for t in 0..steps {
            let r_t = measurement.index_axis(Axis(0), t).to_owned();
            let (x_prior, p_prior) = if t == 0 {
                (z.row(0).to_owned(), &r_t + process)
            } else {
                (filtered.row(t - 1).to_owned(), &filtered_cov[t - 1] + process)
            };

            let s = &p_prior + &r_t;
            let lower = cholesky(&s, t)?;
            // Kᵗ = S⁻¹·P, P and S symmetric
            let gain = cholesky_solve(&lower, &p_prior).reversed_axes();

            let innovation: Array1<f64> = &z.row(t) - &x_prior;
            let x_post = &x_prior + &gain.dot(&innovation);
            let mut p_post = &p_prior - &gain.dot(&p_prior);
            symmetrize(&mut p_post);

            filtered.row_mut(t).assign(&x_post);
            filtered_cov.push(p_post);
            predicted_cov.push(p_prior);
        }

        let mut smoothed = filtered.clone();
        let mut smoothed_cov = filtered_cov[steps - 1].clone();
        for t in (0..steps - 1).rev() {
            let p_pred = &predicted_cov[t + 1];
            let lower = cholesky(p_pred, t + 1)?;
            // Cᵗ = P_pred⁻¹·P_f
            let c = cholesky_solve(&lower, &filtered_cov[t]).reversed_axes();

            // random walk: x_{t+1|t} = x_{t|t}
            let correction: Array1<f64> = &smoothed.row(t + 1) - &filtered.row(t);
            let x_s = &filtered.row(t) + &c.dot(&correction);
            smoothed.row_mut(t).assign(&x_s);

            let mut p_s = &filtered_cov[t] + &c.dot(&(&smoothed_cov - p_pred)).dot(&c.t());
            symmetrize(&mut p_s);
            smoothed_cov = p_s;
        }

        Ok(KalmanOutput { filtered, smoothed })
    }
}

impl SmoothingEngine for KalmanSmoother {
    fn smooth(&self, model: &dyn SmoothingModel, partition: &mut Partition) -> Result<()> {
        let process = model.process_covariance(partition)?;
        let measurement = model.measurement_covariance(partition)?;
        let observations = partition.column(model.metric_col())?;

        let output = self.run(observations, &process, &measurement)?;

        let prefix = model.output_col_prefix();
        partition.insert_column(output_column(prefix, OutputKind::Filtered), output.filtered)?;
        partition.insert_column(output_column(prefix, OutputKind::Smoothed), output.smoothed)?;

        debug!(
            partition = %partition.key(),
            prefix,
            steps = partition.n_steps(),
            categories = partition.n_categories(),
            "smoothed partition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn diag_measurement(variances: &Array2<f64>) -> Array3<f64> {
        let (steps, n) = variances.dim();
        let mut r = Array3::<f64>::zeros((steps, n, n));
        for t in 0..steps {
            for c in 0..n {
                r[[t, c, c]] = variances[[t, c]];
            }
        }
        r
    }

    #[test]
    fn test_constant_series_is_fixed_point() {
        let z = Array2::from_elem((6, 2), 0.4);
        let q = Array2::eye(2) * 1e-4;
        let r = diag_measurement(&Array2::from_elem((6, 2), 1e-2));
        let out = KalmanSmoother::new().run(&z, &q, &r).unwrap();
        for v in out.filtered.iter().chain(out.smoothed.iter()) {
            assert_abs_diff_eq!(*v, 0.4, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_precise_measurements_are_tracked() {
        let z = array![[0.1], [0.5], [0.2], [0.9]];
        let q = array![[1e-2]];
        let r = diag_measurement(&Array2::from_elem((4, 1), 1e-12));
        let out = KalmanSmoother::new().run(&z, &q, &r).unwrap();
        for t in 0..4 {
            assert_abs_diff_eq!(out.filtered[[t, 0]], z[[t, 0]], epsilon = 1e-6);
            assert_abs_diff_eq!(out.smoothed[[t, 0]], z[[t, 0]], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_last_smoothed_equals_last_filtered() {
        let z = array![[0.3, 0.1], [0.35, 0.2], [0.25, 0.15], [0.4, 0.1]];
        let q = array![[4e-4, 2e-4], [2e-4, 4e-4]];
        let r = diag_measurement(&Array2::from_elem((4, 2), 5e-3));
        let out = KalmanSmoother::new().run(&z, &q, &r).unwrap();
        assert_eq!(out.smoothed.row(3), out.filtered.row(3));
        assert!(out.smoothed.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_smoother_reduces_roughness() {
        let z = array![[0.2], [0.6], [0.1], [0.7], [0.15], [0.65], [0.2], [0.6]];
        let q = array![[1e-3]];
        let r = diag_measurement(&Array2::from_elem((8, 1), 0.05));
        let out = KalmanSmoother::new().run(&z, &q, &r).unwrap();

        let roughness = |a: &Array2<f64>| -> f64 {
            (1..a.nrows()).map(|t| (a[[t, 0]] - a[[t - 1, 0]]).powi(2)).sum()
        };
        assert!(roughness(&out.smoothed) < roughness(&z));
        assert!(roughness(&out.smoothed) <= roughness(&out.filtered));
    }

    #[test]
    fn test_missing_observation_is_bridged() {
        let z = array![[0.4], [f64::NAN], [0.6]];
        let q = array![[1e-3]];
        let mut variances = Array2::from_elem((3, 1), 1e-4);
        variances[[1, 0]] = 1e16;
        let r = diag_measurement(&variances);
        let out = KalmanSmoother::new().run(&z, &q, &r).unwrap();

        let bridged = out.smoothed[[1, 0]];
        assert!(bridged > 0.4 && bridged < 0.6);
        assert_abs_diff_eq!(out.filtered[[1, 0]], out.filtered[[0, 0]], epsilon = 1e-9);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let z = Array2::<f64>::zeros((3, 2));
        let q = Array2::<f64>::eye(3);
        let r = Array3::<f64>::zeros((3, 2, 2));
        assert!(matches!(
            KalmanSmoother::new().run(&z, &q, &r),
            Err(SmoothingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_partition() {
        let out = KalmanSmoother::new()
            .run(
                &Array2::zeros((0, 2)),
                &Array2::eye(2),
                &Array3::zeros((0, 2, 2)),
            )
            .unwrap();
        assert_eq!(out.smoothed.dim(), (0, 2));
    }
}
