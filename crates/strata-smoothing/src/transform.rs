//! Bijections applied to bounded metrics around smoothing

use serde::{Deserialize, Serialize};

/// Default lower clamp for the logit transform
pub const LOGIT_MIN: f64 = 1e-8;

/// Default upper clamp for the logit transform
pub const LOGIT_MAX: f64 = 1.0 - 1e-8;

/// Log-odds of `x` after clamping it to `[min, max]`. NaN stays NaN.
pub fn logit(x: f64, min: f64, max: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    let p = x.clamp(min, max);
    (p / (1.0 - p)).ln()
}

/// Logistic function; `+∞` maps to 1 and `-∞` to 0. NaN stays NaN.
pub fn inv_logit(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Per-metric transform applied before smoothing and inverted afterwards
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricTransform {
    /// No transform
    #[default]
    Identity,
    /// Logit with clamp bounds
    Logit {
        /// Lower clamp
        #[serde(default = "default_logit_min")]
        min: f64,
        /// Upper clamp
        #[serde(default = "default_logit_max")]
        max: f64,
    },
}

const fn default_logit_min() -> f64 {
    LOGIT_MIN
}

const fn default_logit_max() -> f64 {
    LOGIT_MAX
}

impl MetricTransform {
    /// Logit with the default clamp bounds.
    pub const fn logit() -> Self {
        Self::Logit {
            min: LOGIT_MIN,
            max: LOGIT_MAX,
        }
    }

    /// Map a natural-domain value into the smoothing domain.
    pub fn forward(&self, x: f64) -> f64 {
        match *self {
            Self::Identity => x,
            Self::Logit { min, max } => logit(x, min, max),
        }
    }

    /// Map a smoothing-domain value back to the natural domain.
    pub fn inverse(&self, y: f64) -> f64 {
        match self {
            Self::Identity => y,
            Self::Logit { .. } => inv_logit(y),
        }
    }

    /// Whether this is the identity
    pub const fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Check that the clamp bounds are ordered and inside (0, 1).
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Identity => Ok(()),
            Self::Logit { min, max } if 0.0 < min && min < max && max < 1.0 => Ok(()),
            Self::Logit { min, max } => Err(format!(
                "logit bounds must satisfy 0 < min < max < 1, got [{min}, {max}]"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(1e-6)]
    #[case(0.1)]
    #[case(0.5)]
    #[case(0.93)]
    #[case(1.0 - 1e-6)]
    fn test_round_trip_inside_clamp(#[case] x: f64) {
        let t = MetricTransform::logit();
        assert_relative_eq!(t.inverse(t.forward(x)), x, max_relative = 1e-9);
    }

    #[test]
    fn test_clamping_is_symmetric() {
        let lo = logit(0.0, LOGIT_MIN, LOGIT_MAX);
        let hi = logit(1.0, LOGIT_MIN, LOGIT_MAX);
        assert!(lo.is_finite() && hi.is_finite());
        assert_relative_eq!(lo, -hi, max_relative = 1e-6);
        assert_eq!(logit(-3.0, LOGIT_MIN, LOGIT_MAX), lo);
    }

    #[test]
    fn test_inv_logit_extremes() {
        assert_eq!(inv_logit(f64::INFINITY), 1.0);
        assert_eq!(inv_logit(f64::NEG_INFINITY), 0.0);
        assert_eq!(inv_logit(1000.0), 1.0);
        assert_eq!(inv_logit(-1000.0), 0.0);
        assert_eq!(inv_logit(0.0), 0.5);
        assert!(inv_logit(f64::NAN).is_nan());
    }

    #[test]
    fn test_identity_passes_through() {
        let t = MetricTransform::Identity;
        assert_eq!(t.forward(3.5), 3.5);
        assert_eq!(t.inverse(-2.0), -2.0);
        assert!(t.is_identity());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(MetricTransform::logit().validate().is_ok());
        assert!(
            MetricTransform::Logit { min: 0.6, max: 0.4 }
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_serde_defaults() {
        let t: MetricTransform = serde_json::from_str(r#"{"kind":"logit"}"#).unwrap();
        assert_eq!(t, MetricTransform::logit());
    }
}
