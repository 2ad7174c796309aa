//! Optimizers and their shared status surface.
//!
//! The status record is the sole externally observed result of running an
//! optimizer: why it stopped, how many iterations and evaluations it spent,
//! and the last gradient norm / objective / step magnitudes.

use std::fmt;

pub mod rprop;

pub use rprop::{RpropMethod, RpropOptimizer, RpropOptions};

/// Why an optimizer run stopped (or has not yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceStatus {
    /// Still iterating, or never run.
    #[default]
    InProgress,
    /// A numerical failure ended the run.
    Failure,
    /// The gradient norm fell below the configured threshold.
    GradientNorm,
    /// The largest step component fell below the configured threshold.
    DeltaX,
    /// The objective change fell below the configured threshold.
    DeltaObjective,
    /// The iteration cap was reached without convergence.
    MaxIterations,
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceStatus::InProgress => write!(f, "IN_PROGRESS"),
            ConvergenceStatus::Failure => write!(f, "FAILURE"),
            ConvergenceStatus::GradientNorm => write!(f, "GRADIENT_NORM"),
            ConvergenceStatus::DeltaX => write!(f, "DX"),
            ConvergenceStatus::DeltaObjective => write!(f, "DOBJECTIVE"),
            ConvergenceStatus::MaxIterations => write!(f, "MAX_ITERATIONS"),
        }
    }
}

/// The result record of an optimizer run.
#[derive(Debug, Clone)]
pub struct OptimizerStatus {
    /// Convergence kind.
    pub convergence: ConvergenceStatus,
    /// Iterations spent.
    pub num_iterations: usize,
    /// Norm of the last aggregate gradient.
    pub gradient_norm: f64,
    /// Last (weighted) objective value, when the variant evaluates it.
    pub error: f64,
    /// Change of the objective over the last iteration.
    pub delta_error: f64,
    /// Largest absolute component of the last step.
    pub max_delta_x: f64,
    /// Objective evaluation count.
    pub num_error_evaluations: usize,
    /// Gradient/Jacobian evaluation count.
    pub num_jacobian_evaluations: usize,
}

impl Default for OptimizerStatus {
    fn default() -> Self {
        OptimizerStatus {
            convergence: ConvergenceStatus::InProgress,
            num_iterations: 0,
            gradient_norm: f64::NAN,
            error: f64::MAX,
            delta_error: f64::NAN,
            max_delta_x: f64::NAN,
            num_error_evaluations: 0,
            num_jacobian_evaluations: 0,
        }
    }
}

impl OptimizerStatus {
    pub fn reset(&mut self) {
        *self = OptimizerStatus::default();
    }

    /// A convergence criterion fired.
    pub fn success(&self) -> bool {
        !matches!(
            self.convergence,
            ConvergenceStatus::InProgress
                | ConvergenceStatus::Failure
                | ConvergenceStatus::MaxIterations
        )
    }

    pub fn failure(&self) -> bool {
        self.convergence == ConvergenceStatus::Failure
    }
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OptimizerStatus:")?;
        writeln!(f, "\tconvergence: {}", self.convergence)?;
        writeln!(f, "\titerations: {}", self.num_iterations)?;
        writeln!(f, "\tgradient norm: {}", self.gradient_norm)?;
        writeln!(f, "\tobjective: {}", self.error)?;
        writeln!(f, "\tdobjective: {}", self.delta_error)?;
        writeln!(f, "\tmax dx: {}", self.max_delta_x)?;
        writeln!(f, "\tevals objective: {}", self.num_error_evaluations)?;
        write!(f, "\tevals derivative: {}", self.num_jacobian_evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reset() {
        let mut status = OptimizerStatus {
            convergence: ConvergenceStatus::GradientNorm,
            num_iterations: 12,
            ..Default::default()
        };
        status.reset();
        assert_eq!(status.convergence, ConvergenceStatus::InProgress);
        assert_eq!(status.num_iterations, 0);
        assert!(status.gradient_norm.is_nan());
    }

    #[test]
    fn test_success_and_failure_predicates() {
        let mut status = OptimizerStatus::default();
        assert!(!status.success());
        assert!(!status.failure());

        status.convergence = ConvergenceStatus::GradientNorm;
        assert!(status.success());

        status.convergence = ConvergenceStatus::MaxIterations;
        assert!(!status.success());

        status.convergence = ConvergenceStatus::Failure;
        assert!(status.failure());
    }

    #[test]
    fn test_convergence_display() {
        assert_eq!(ConvergenceStatus::GradientNorm.to_string(), "GRADIENT_NORM");
        assert_eq!(ConvergenceStatus::DeltaX.to_string(), "DX");
        assert_eq!(ConvergenceStatus::DeltaObjective.to_string(), "DOBJECTIVE");
    }
}
