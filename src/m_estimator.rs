//! Robust M-estimator policies for outlier rejection.
//!
//! An M-estimator maps a non-negative squared error to a down-weighting
//! factor in `(0, 1]`, limiting the influence of outlier residuals on the
//! normal equations. Error terms hold at most one policy; clearing the policy
//! is equivalent to a constant weight of 1.
//!
//! # Available Policies
//!
//! - [`NoMEstimator`]: constant weight 1 (standard least squares)
//! - [`HuberMEstimator`]: full weight for inliers, `k/√s` beyond the threshold
//! - [`CauchyMEstimator`]: smooth heavy-tailed down-weighting
//! - [`GemanMcClureMEstimator`]: redescending, aggressively suppresses
//!   far outliers
//!
//! All robust weights are monotonically non-increasing in the squared error.

use crate::error::{TangentError, TangentResult};

/// A pure weighting function from squared error to a factor in `(0, 1]`.
///
/// Policies are stateless per evaluation; tuning constants are fixed at
/// construction.
pub trait MEstimator: Send + Sync {
    /// The weight for a squared error `s = eᵀ R⁻¹ e ≥ 0`.
    fn weight(&self, squared_error: f64) -> f64;

    /// A short diagnostic name.
    fn name(&self) -> &'static str;
}

/// The identity policy: every residual keeps full weight.
#[derive(Debug, Clone, Default)]
pub struct NoMEstimator;

impl NoMEstimator {
    pub fn new() -> Self {
        NoMEstimator
    }
}

impl MEstimator for NoMEstimator {
    fn weight(&self, _squared_error: f64) -> f64 {
        1.0
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Huber weighting: quadratic cost for inliers, linear for outliers.
///
/// `w(s) = 1` for `s ≤ k²`, else `k / √s`.
#[derive(Debug, Clone)]
pub struct HuberMEstimator {
    k: f64,
    k_squared: f64,
}

impl HuberMEstimator {
    /// A Huber policy with threshold `k` on the unsquared error.
    ///
    /// `k = 1.345` gives approximately 95% efficiency on Gaussian data.
    pub fn new(k: f64) -> TangentResult<Self> {
        if k <= 0.0 {
            return Err(TangentError::Config(format!(
                "Huber threshold must be positive, got {k}"
            )));
        }
        Ok(HuberMEstimator { k, k_squared: k * k })
    }

    pub fn k(&self) -> f64 {
        self.k
    }
}

impl MEstimator for HuberMEstimator {
    fn weight(&self, squared_error: f64) -> f64 {
        if squared_error <= self.k_squared {
            1.0
        } else {
            self.k / squared_error.sqrt()
        }
    }

    fn name(&self) -> &'static str {
        "huber"
    }
}

/// Cauchy weighting: `w(s) = σ² / (σ² + s)`.
#[derive(Debug, Clone)]
pub struct CauchyMEstimator {
    sigma_squared: f64,
}

impl CauchyMEstimator {
    /// A Cauchy policy with scale parameter `sigma`.
    pub fn new(sigma: f64) -> TangentResult<Self> {
        if sigma <= 0.0 {
            return Err(TangentError::Config(format!(
                "Cauchy scale must be positive, got {sigma}"
            )));
        }
        Ok(CauchyMEstimator {
            sigma_squared: sigma * sigma,
        })
    }
}

impl MEstimator for CauchyMEstimator {
    fn weight(&self, squared_error: f64) -> f64 {
        self.sigma_squared / (self.sigma_squared + squared_error)
    }

    fn name(&self) -> &'static str {
        "cauchy"
    }
}

/// Geman-McClure weighting: `w(s) = (σ² / (σ² + s))²`, a redescending
/// estimator.
#[derive(Debug, Clone)]
pub struct GemanMcClureMEstimator {
    sigma_squared: f64,
}

impl GemanMcClureMEstimator {
    /// A Geman-McClure policy with scale parameter `sigma`.
    pub fn new(sigma: f64) -> TangentResult<Self> {
        if sigma <= 0.0 {
            return Err(TangentError::Config(format!(
                "Geman-McClure scale must be positive, got {sigma}"
            )));
        }
        Ok(GemanMcClureMEstimator {
            sigma_squared: sigma * sigma,
        })
    }
}

impl MEstimator for GemanMcClureMEstimator {
    fn weight(&self, squared_error: f64) -> f64 {
        let ratio = self.sigma_squared / (self.sigma_squared + squared_error);
        ratio * ratio
    }

    fn name(&self) -> &'static str {
        "geman-mcclure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_monotone_non_increasing(policy: &dyn MEstimator) {
        let samples = [0.0, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 100.0, 1e4];
        let mut previous = f64::INFINITY;
        for &s in &samples {
            let w = policy.weight(s);
            assert!(w > 0.0 && w <= 1.0, "{} weight {w} out of range at s={s}", policy.name());
            assert!(
                w <= previous + 1e-15,
                "{} weight increased at s={s}",
                policy.name()
            );
            previous = w;
        }
    }

    #[test]
    fn test_identity_policy_is_constant_one() {
        let policy = NoMEstimator::new();
        for &s in &[0.0, 1.0, 1e3, 1e9] {
            assert_eq!(policy.weight(s), 1.0);
        }
    }

    #[test]
    fn test_robust_policies_are_monotone() {
        assert_monotone_non_increasing(&HuberMEstimator::new(1.345).unwrap());
        assert_monotone_non_increasing(&CauchyMEstimator::new(1.0).unwrap());
        assert_monotone_non_increasing(&GemanMcClureMEstimator::new(1.0).unwrap());
    }

    #[test]
    fn test_huber_transition() {
        let huber = HuberMEstimator::new(2.0).unwrap();
        assert_eq!(huber.weight(3.9), 1.0);
        assert_eq!(huber.weight(4.0), 1.0);
        assert!((huber.weight(16.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_constants_are_rejected() {
        assert!(HuberMEstimator::new(0.0).is_err());
        assert!(CauchyMEstimator::new(-1.0).is_err());
        assert!(GemanMcClureMEstimator::new(0.0).is_err());
    }
}
