//! The Rprop family of gradient-sign optimizers.
//!
//! Rprop adapts one step size per parameter from the sign history of the
//! gradient alone: growing the step while the sign holds, shrinking it on a
//! sign switch. The four variants differ only in their backtracking policy on
//! a switch. See Igel & Hüsken, "Improving the Rprop learning algorithm", for
//! the canonical description.

use std::fmt;

use nalgebra::DVector;
use tracing::{debug, trace};

use crate::error::{TangentError, TangentResult};
use crate::expression::ScalarExpression;
use crate::jacobian::JacobianContainer;
use crate::optimizer::{ConvergenceStatus, OptimizerStatus};
use crate::problem::Problem;

/// Step policy applied on a gradient sign switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpropMethod {
    /// Backtracking: revert the previous step on a switch.
    #[default]
    RpropPlus,
    /// No backtracking; only the step size reacts to switches.
    RpropMinus,
    /// Hold position for one iteration on a switch.
    IRpropMinus,
    /// Revert the previous step on a switch only when the objective
    /// increased.
    IRpropPlus,
}

impl fmt::Display for RpropMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpropMethod::RpropPlus => write!(f, "RPROP_PLUS"),
            RpropMethod::RpropMinus => write!(f, "RPROP_MINUS"),
            RpropMethod::IRpropMinus => write!(f, "IRPROP_MINUS"),
            RpropMethod::IRpropPlus => write!(f, "IRPROP_PLUS"),
        }
    }
}

/// Options of the Rprop optimizers, validated by [`RpropOptions::check`].
#[derive(Clone)]
pub struct RpropOptions {
    /// Step-size shrink factor on a sign switch, in (0, 1).
    pub eta_minus: f64,
    /// Step-size growth factor while the sign holds, greater than
    /// `eta_minus`.
    pub eta_plus: f64,
    /// Initial per-parameter step size.
    pub initial_delta: f64,
    /// Step-size floor.
    pub min_delta: f64,
    /// Step-size cap.
    pub max_delta: f64,
    /// Stop when the gradient norm falls below this (0 disables).
    pub convergence_gradient_norm: f64,
    /// Stop when the largest step component falls below this (0 disables).
    pub convergence_delta_x: f64,
    /// Stop when the objective change falls below this (0 disables; only
    /// checked by variants that evaluate the objective).
    pub convergence_delta_error: f64,
    /// Iteration cap; -1 runs until a convergence criterion fires.
    pub max_iterations: i64,
    /// Worker count for gradient aggregation (0/1 = sequential).
    pub num_threads_jacobian: usize,
    /// Worker count for objective aggregation (0/1 = sequential).
    pub num_threads_error: usize,
    /// The backtracking variant.
    pub method: RpropMethod,
    /// Optional scalar expression whose gradient is added each iteration.
    /// Its design variables must belong to the problem.
    pub regularizer: Option<ScalarExpression>,
}

impl Default for RpropOptions {
    fn default() -> Self {
        RpropOptions {
            eta_minus: 0.5,
            eta_plus: 1.2,
            initial_delta: 0.1,
            min_delta: 1e-20,
            max_delta: 5.0,
            convergence_gradient_norm: 1e-3,
            convergence_delta_x: 0.0,
            convergence_delta_error: 0.0,
            max_iterations: 500,
            num_threads_jacobian: 1,
            num_threads_error: 1,
            method: RpropMethod::default(),
            regularizer: None,
        }
    }
}

impl RpropOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: RpropMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_eta(mut self, eta_minus: f64, eta_plus: f64) -> Self {
        self.eta_minus = eta_minus;
        self.eta_plus = eta_plus;
        self
    }

    pub fn with_delta(mut self, initial: f64, min: f64, max: f64) -> Self {
        self.initial_delta = initial;
        self.min_delta = min;
        self.max_delta = max;
        self
    }

    pub fn with_convergence(
        mut self,
        gradient_norm: f64,
        delta_x: f64,
        delta_error: f64,
    ) -> Self {
        self.convergence_gradient_norm = gradient_norm;
        self.convergence_delta_x = delta_x;
        self.convergence_delta_error = delta_error;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: i64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_regularizer(mut self, regularizer: ScalarExpression) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    /// Validate the option combination; invalid options are never clamped.
    pub fn check(&self) -> TangentResult<()> {
        if !(self.eta_minus > 0.0 && self.eta_minus < 1.0) {
            return Err(TangentError::Config(format!(
                "etaMinus must be in (0, 1), got {}",
                self.eta_minus
            )));
        }
        if self.eta_plus <= self.eta_minus {
            return Err(TangentError::Config(format!(
                "etaPlus ({}) must be greater than etaMinus ({})",
                self.eta_plus, self.eta_minus
            )));
        }
        if self.initial_delta <= 0.0 {
            return Err(TangentError::Config(format!(
                "initialDelta must be positive, got {}",
                self.initial_delta
            )));
        }
        if self.min_delta <= 0.0 || self.max_delta <= self.min_delta {
            return Err(TangentError::Config(format!(
                "delta bounds must satisfy 0 < minDelta < maxDelta, got [{}, {}]",
                self.min_delta, self.max_delta
            )));
        }
        if self.convergence_gradient_norm < 0.0
            || self.convergence_delta_x < 0.0
            || self.convergence_delta_error < 0.0
        {
            return Err(TangentError::Config(
                "convergence thresholds must be non-negative".to_string(),
            ));
        }
        if self.convergence_gradient_norm == 0.0
            && self.convergence_delta_x == 0.0
            && self.convergence_delta_error == 0.0
        {
            return Err(TangentError::Config(
                "at least one convergence threshold must be positive".to_string(),
            ));
        }
        if self.max_iterations < -1 {
            return Err(TangentError::Config(format!(
                "maxIterations must be >= -1, got {}",
                self.max_iterations
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RpropOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RpropOptions:")?;
        writeln!(f, "\tetaMinus: {}", self.eta_minus)?;
        writeln!(f, "\tetaPlus: {}", self.eta_plus)?;
        writeln!(f, "\tinitialDelta: {}", self.initial_delta)?;
        writeln!(f, "\tminDelta: {}", self.min_delta)?;
        writeln!(f, "\tmaxDelta: {}", self.max_delta)?;
        writeln!(
            f,
            "\tconvergenceGradientNorm: {}",
            self.convergence_gradient_norm
        )?;
        writeln!(f, "\tconvergenceDeltaX: {}", self.convergence_delta_x)?;
        writeln!(f, "\tconvergenceDeltaError: {}", self.convergence_delta_error)?;
        writeln!(f, "\tmaxIterations: {}", self.max_iterations)?;
        writeln!(f, "\tnumThreadsJacobian: {}", self.num_threads_jacobian)?;
        writeln!(f, "\tnumThreadsError: {}", self.num_threads_error)?;
        writeln!(f, "\tregularizer: {}", self.regularizer.is_some())?;
        write!(f, "\tmethod: {}", self.method)
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Gradient-only optimizer with per-parameter adaptive step sizes.
pub struct RpropOptimizer {
    options: RpropOptions,
    problem: Problem,
    delta: DVector<f64>,
    prev_gradient: DVector<f64>,
    dx: DVector<f64>,
    prev_error: f64,
    status: OptimizerStatus,
    initialized: bool,
}

impl RpropOptimizer {
    /// An optimizer over `problem`; fails on an invalid option combination.
    pub fn new(problem: Problem, options: RpropOptions) -> TangentResult<Self> {
        options.check()?;
        Ok(RpropOptimizer {
            options,
            problem,
            delta: DVector::zeros(0),
            prev_gradient: DVector::zeros(0),
            dx: DVector::zeros(0),
            prev_error: f64::MAX,
            status: OptimizerStatus::default(),
            initialized: false,
        })
    }

    pub fn options(&self) -> &RpropOptions {
        &self.options
    }

    /// Replace the options; fails on an invalid combination and keeps the old
    /// ones.
    pub fn set_options(&mut self, options: RpropOptions) -> TangentResult<()> {
        options.check()?;
        self.options = options;
        Ok(())
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn problem_mut(&mut self) -> &mut Problem {
        self.initialized = false;
        &mut self.problem
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    /// The per-parameter adaptive step sizes (diagnostics).
    pub fn delta(&self) -> &DVector<f64> {
        &self.delta
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Assign the problem's block structure and reset the optimizer state.
    pub fn initialize(&mut self) {
        self.problem.initialize();
        self.initialized = true;
        self.reset();
    }

    /// Reset step sizes, gradient history and the status record.
    pub fn reset(&mut self) {
        let parameters = self.problem.num_opt_parameters();
        self.dx = DVector::zeros(parameters);
        self.prev_gradient = DVector::zeros(parameters);
        self.prev_error = f64::MAX;
        self.delta = DVector::from_element(parameters, self.options.initial_delta);
        self.status.reset();
    }

    /// Run until a convergence criterion or the iteration cap fires; returns
    /// the status record.
    pub fn optimize(&mut self) -> &OptimizerStatus {
        if !self.initialized {
            self.initialize();
        }
        let parameters = self.problem.num_opt_parameters();
        if parameters == 0 {
            // nothing to optimize
            self.status.gradient_norm = 0.0;
            self.status.convergence = ConvergenceStatus::GradientNorm;
            return &self.status;
        }

        loop {
            if self.options.max_iterations >= 0
                && self.status.num_iterations >= self.options.max_iterations as usize
            {
                self.status.convergence = ConvergenceStatus::MaxIterations;
                break;
            }
            self.status.num_iterations += 1;

            let mut gradient = self
                .problem
                .compute_gradient(self.options.num_threads_jacobian, true);
            if let Some(regularizer) = &self.options.regularizer {
                let mut container = JacobianContainer::new(1);
                regularizer.evaluate_jacobians(&mut container);
                let regularizer_gradient = container.as_dense_matrix(parameters);
                trace!("regularization term gradient: {}", regularizer_gradient);
                gradient += regularizer_gradient.row(0).transpose();
            }
            self.status.num_jacobian_evaluations += 1;

            debug_assert!(
                gradient.iter().all(|g| g.is_finite()),
                "gradient is not finite: {}",
                gradient
            );
            if gradient.iter().any(|g| !g.is_finite()) {
                self.status.convergence = ConvergenceStatus::Failure;
                break;
            }

            self.status.gradient_norm = gradient.norm();
            if self.status.gradient_norm < self.options.convergence_gradient_norm {
                debug!(
                    gradient_norm = self.status.gradient_norm,
                    "gradient norm below convergence threshold, terminating"
                );
                self.status.convergence = ConvergenceStatus::GradientNorm;
                break;
            }

            // the objective is only evaluated for the variant that needs it
            let mut error_increased = false;
            if self.options.method == RpropMethod::IRpropPlus {
                let error = self
                    .problem
                    .evaluate_error(self.options.num_threads_error, true);
                self.status.num_error_evaluations += 1;
                error_increased = error - self.prev_error > 0.0;
                if self.prev_error != f64::MAX {
                    self.status.delta_error = error - self.prev_error;
                    if self.options.convergence_delta_error > 0.0
                        && self.status.delta_error.abs() < self.options.convergence_delta_error
                    {
                        self.status.error = error;
                        self.prev_error = error;
                        self.status.convergence = ConvergenceStatus::DeltaObjective;
                        break;
                    }
                }
                self.status.error = error;
                self.prev_error = error;
            }

            // sign products classify each dimension: held, switched, neutral
            let sign_products = self.prev_gradient.component_mul(&gradient);
            self.prev_gradient.copy_from(&gradient);

            for d in 0..parameters {
                let held = sign_products[d] > 0.0;
                let switched = sign_products[d] < 0.0;

                if held {
                    self.delta[d] =
                        (self.delta[d] * self.options.eta_plus).min(self.options.max_delta);
                } else if switched {
                    self.delta[d] =
                        (self.delta[d] * self.options.eta_minus).max(self.options.min_delta);
                }

                match self.options.method {
                    RpropMethod::RpropPlus => {
                        if switched {
                            // revert the previous step; zeroing the stored
                            // gradient suppresses a switch next iteration
                            self.dx[d] = -self.dx[d];
                            self.prev_gradient[d] = 0.0;
                        } else {
                            self.dx[d] = -sign(gradient[d]) * self.delta[d];
                        }
                    }
                    RpropMethod::RpropMinus => {
                        self.dx[d] = -sign(gradient[d]) * self.delta[d];
                    }
                    RpropMethod::IRpropMinus => {
                        if switched {
                            self.dx[d] = 0.0;
                            self.prev_gradient[d] = 0.0;
                        } else {
                            self.dx[d] = -sign(gradient[d]) * self.delta[d];
                        }
                    }
                    RpropMethod::IRpropPlus => {
                        if switched {
                            self.dx[d] = if error_increased { -self.dx[d] } else { 0.0 };
                            self.prev_gradient[d] = 0.0;
                        } else {
                            self.dx[d] = -sign(gradient[d]) * self.delta[d];
                        }
                    }
                }
            }

            self.status.max_delta_x = self.dx.amax();
            if self.status.max_delta_x < self.options.convergence_delta_x {
                debug!(
                    max_delta_x = self.status.max_delta_x,
                    "maximum dx component below convergence threshold, terminating"
                );
                self.status.convergence = ConvergenceStatus::DeltaX;
                break;
            }

            trace!(
                iteration = self.status.num_iterations,
                gradient_norm = self.status.gradient_norm,
                "gradient: {} dx: {} delta: {}",
                gradient,
                self.dx,
                self.delta
            );

            self.problem.apply_state_update(&self.dx);
        }

        debug!(
            convergence = %self.status.convergence,
            iterations = self.status.num_iterations,
            gradient_norm = self.status.gradient_norm,
            "rprop finished"
        );
        &self.status
    }
}
