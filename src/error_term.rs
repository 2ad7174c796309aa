//! Error terms: weighted quadratic contributions to the objective.
//!
//! An error term wraps an expression evaluation into the squared error
//! `eᵀ R⁻¹ e`, optionally reweighted by an M-estimator policy, and produces
//! the weighted Jacobian and Hessian/gradient contributions consumed by the
//! optimizers.
//!
//! Weighting preserves the quadratic relationship: the Jacobian and error are
//! scaled by `√w`, so the normal-equation contribution `JᵀJ` carries the
//! weight `w` linearly (IRLS semantics).
//!
//! Call order contract: `update_raw_squared_error` (or `evaluate_error`)
//! before reading errors or weights, errors before Jacobians, both before
//! building the Hessian.

use std::sync::Arc;

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::design_variable::{DesignVariable, DesignVariableSet};
use crate::error::{TangentError, TangentResult};
use crate::expression::VectorFunction;
use crate::jacobian::JacobianContainer;
use crate::m_estimator::MEstimator;

/// Central-difference step for the finite-difference Jacobian cross-check.
const FINITE_DIFFERENCE_STEP: f64 = 1e-6;

/// A single error term in a nonlinear least squares problem.
pub trait ErrorTerm: Send {
    /// The error dimension, fixed at construction.
    fn dimension(&self) -> usize;

    /// The design variables this term depends on, in collection order.
    fn design_variables(&self) -> &[Arc<dyn DesignVariable>];

    /// Design variable `index`; panics when out of bounds.
    fn design_variable(&self, index: usize) -> &Arc<dyn DesignVariable> {
        let variables = self.design_variables();
        assert!(
            index < variables.len(),
            "design variable index {index} out of bounds, term has {}",
            variables.len()
        );
        &variables[index]
    }

    /// Re-evaluate the expression and cache the raw squared error
    /// `eᵀ R⁻¹ e`; returns the raw value.
    fn update_raw_squared_error(&mut self) -> f64;

    /// The cached squared error before M-estimator weighting.
    fn raw_squared_error(&self) -> f64;

    /// The M-estimator weight at the cached squared error (1 without a
    /// policy).
    fn current_m_estimator_weight(&self) -> f64;

    /// The cached squared error after M-estimator weighting.
    fn weighted_squared_error(&self) -> f64 {
        self.current_m_estimator_weight() * self.raw_squared_error()
    }

    /// Either accessor, selected by the caller.
    fn squared_error(&self, use_m_estimator: bool) -> f64 {
        if use_m_estimator {
            self.weighted_squared_error()
        } else {
            self.raw_squared_error()
        }
    }

    /// Evaluate the term and return the effective (weighted) squared error.
    fn evaluate_error(&mut self) -> f64 {
        self.update_raw_squared_error();
        self.weighted_squared_error()
    }

    /// The raw error vector cached by the last evaluation.
    fn error(&self) -> DVector<f64>;

    /// Re-evaluate the raw error vector without touching the cache.
    fn evaluate_raw_error(&self) -> DVector<f64>;

    /// The error scaled by `√w · sqrtInvRᵀ` (`w = 1` without the
    /// M-estimator).
    fn weighted_error(&self, use_m_estimator: bool) -> DVector<f64>;

    /// Back-propagate the unweighted analytic Jacobians into `out`.
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);

    /// Back-propagate the Jacobians scaled by `√w · sqrtInvRᵀ`.
    fn weighted_jacobians(&self, out: &mut JacobianContainer, use_m_estimator: bool);

    /// Install an M-estimator policy.
    fn set_m_estimator(&mut self, policy: Box<dyn MEstimator>);

    /// Remove the policy; idempotent.
    fn clear_m_estimator(&mut self);

    /// The name of the installed policy, or "none".
    fn m_estimator_name(&self) -> String;

    /// The row offset of this term in the globally stacked residual.
    fn row_base(&self) -> usize;

    fn set_row_base(&mut self, row_base: usize);

    /// Scatter `JᵀJ` into `hessian` (including cross blocks between
    /// dependent variables) and `-Jᵀe` into `rhs`, at the variables' column
    /// bases, so that `H·dx = rhs` is the Gauss-Newton step system.
    ///
    /// The caller must have evaluated the error first.
    fn build_hessian(
        &self,
        hessian: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        use_m_estimator: bool,
    ) {
        let mut container = JacobianContainer::new(self.dimension());
        self.weighted_jacobians(&mut container, use_m_estimator);
        let error = self.weighted_error(use_m_estimator);

        for block_i in container.blocks() {
            let variable_i = &block_i.variable;
            let base_i = variable_i
                .column_base()
                .expect("design variable has no column base assigned");
            let dim_i = variable_i.minimal_dimension();
            let jt_i = block_i.jacobian.transpose();

            let mut rhs_block = rhs.rows_mut(base_i, dim_i);
            rhs_block -= &jt_i * &error;

            for block_j in container.blocks() {
                let variable_j = &block_j.variable;
                let base_j = variable_j
                    .column_base()
                    .expect("design variable has no column base assigned");
                let dim_j = variable_j.minimal_dimension();
                let mut hessian_block = hessian.view_mut((base_i, base_j), (dim_i, dim_j));
                hessian_block += &jt_i * &block_j.jacobian;
            }
        }
    }

    /// Populate `out` with central-difference Jacobians obtained by
    /// perturbing each dependent design variable through `update`/`revert`.
    ///
    /// This is a verification utility, never a production gradient path.
    fn evaluate_jacobians_finite_difference(&self, out: &mut JacobianContainer) {
        for variable in self.design_variables() {
            let dim = variable.minimal_dimension();
            let mut block = DMatrix::zeros(self.dimension(), dim);
            let mut dx = vec![0.0; dim];
            for j in 0..dim {
                dx[j] = FINITE_DIFFERENCE_STEP;
                variable.update(&dx);
                let error_plus = self.evaluate_raw_error();
                variable.revert();

                dx[j] = -FINITE_DIFFERENCE_STEP;
                variable.update(&dx);
                let error_minus = self.evaluate_raw_error();
                variable.revert();

                dx[j] = 0.0;
                block.set_column(j, &((error_plus - error_minus) / (2.0 * FINITE_DIFFERENCE_STEP)));
            }
            out.add(variable, &block);
        }
    }

    /// Compare the analytic Jacobians against central finite differences.
    fn check_jacobians_numerical(&self, tolerance: f64) -> TangentResult<()> {
        let mut analytic = JacobianContainer::new(self.dimension());
        self.evaluate_jacobians(&mut analytic);
        let mut numerical = JacobianContainer::new(self.dimension());
        self.evaluate_jacobians_finite_difference(&mut numerical);

        for (index, variable) in self.design_variables().iter().enumerate() {
            let dim = variable.minimal_dimension();
            let zero = DMatrix::zeros(self.dimension(), dim);
            let a = analytic.jacobian(variable).unwrap_or(&zero);
            let n = numerical.jacobian(variable).unwrap_or(&zero);
            let max_difference = (a - n).amax();
            if max_difference > tolerance {
                return Err(TangentError::Numerical(format!(
                    "analytic and numerical Jacobians of design variable {index} differ by \
                     {max_difference:.3e} (tolerance {tolerance:.3e})"
                )));
            }
        }
        Ok(())
    }
}

/// An error term over an expression-graph evaluation with a fixed inverse
/// covariance.
pub struct ExpressionErrorTerm {
    expression: Box<dyn VectorFunction>,
    sqrt_inv_r: DMatrix<f64>,
    m_estimator: Option<Box<dyn MEstimator>>,
    error: DVector<f64>,
    squared_error: f64,
    row_base: usize,
    design_variables: Vec<Arc<dyn DesignVariable>>,
}

impl ExpressionErrorTerm {
    /// A term with identity inverse covariance.
    pub fn new(expression: Box<dyn VectorFunction>) -> Self {
        let dimension = expression.dimension();
        Self::with_sqrt_inv_r(expression, DMatrix::identity(dimension, dimension))
            .expect("identity inverse covariance is always valid")
    }

    /// A term with an explicit square-root information matrix `A`; the
    /// inverse covariance is `A Aᵀ`.
    pub fn with_sqrt_inv_r(
        expression: Box<dyn VectorFunction>,
        sqrt_inv_r: DMatrix<f64>,
    ) -> TangentResult<Self> {
        let dimension = expression.dimension();
        if sqrt_inv_r.nrows() != dimension || sqrt_inv_r.ncols() != dimension {
            return Err(TangentError::Dimension(format!(
                "square-root information matrix is {}x{}, expected {dimension}x{dimension}",
                sqrt_inv_r.nrows(),
                sqrt_inv_r.ncols()
            )));
        }
        let mut variables = DesignVariableSet::new();
        expression.design_variables(&mut variables);
        Ok(ExpressionErrorTerm {
            expression,
            sqrt_inv_r,
            m_estimator: None,
            error: DVector::zeros(dimension),
            squared_error: 0.0,
            row_base: 0,
            design_variables: variables.into_vec(),
        })
    }

    /// A term with an inverse covariance matrix; its square root is computed
    /// by Cholesky factorization.
    pub fn with_inv_r(
        expression: Box<dyn VectorFunction>,
        inv_r: DMatrix<f64>,
    ) -> TangentResult<Self> {
        let dimension = expression.dimension();
        if inv_r.nrows() != dimension || inv_r.ncols() != dimension {
            return Err(TangentError::Dimension(format!(
                "inverse covariance is {}x{}, expected {dimension}x{dimension}",
                inv_r.nrows(),
                inv_r.ncols()
            )));
        }
        let factor = Cholesky::new(inv_r).ok_or_else(|| {
            TangentError::Numerical(
                "inverse covariance is not symmetric positive definite".to_string(),
            )
        })?;
        Self::with_sqrt_inv_r(expression, factor.l())
    }

    /// Attach an M-estimator policy, builder style.
    pub fn with_m_estimator(mut self, policy: Box<dyn MEstimator>) -> Self {
        self.m_estimator = Some(policy);
        self
    }

    /// The square root `A` of the inverse covariance `A Aᵀ`.
    pub fn sqrt_inv_r(&self) -> &DMatrix<f64> {
        &self.sqrt_inv_r
    }

    /// The inverse covariance matrix.
    pub fn inv_r(&self) -> DMatrix<f64> {
        &self.sqrt_inv_r * self.sqrt_inv_r.transpose()
    }

    fn sqrt_weight(&self, use_m_estimator: bool) -> f64 {
        if use_m_estimator {
            self.current_m_estimator_weight().sqrt()
        } else {
            1.0
        }
    }
}

impl ErrorTerm for ExpressionErrorTerm {
    fn dimension(&self) -> usize {
        self.expression.dimension()
    }

    fn design_variables(&self) -> &[Arc<dyn DesignVariable>] {
        &self.design_variables
    }

    fn update_raw_squared_error(&mut self) -> f64 {
        self.error = self.expression.evaluate();
        self.squared_error = (self.sqrt_inv_r.transpose() * &self.error).norm_squared();
        self.squared_error
    }

    fn raw_squared_error(&self) -> f64 {
        self.squared_error
    }

    fn current_m_estimator_weight(&self) -> f64 {
        self.m_estimator
            .as_ref()
            .map_or(1.0, |policy| policy.weight(self.squared_error))
    }

    fn error(&self) -> DVector<f64> {
        self.error.clone()
    }

    fn evaluate_raw_error(&self) -> DVector<f64> {
        self.expression.evaluate()
    }

    fn weighted_error(&self, use_m_estimator: bool) -> DVector<f64> {
        self.sqrt_weight(use_m_estimator) * (self.sqrt_inv_r.transpose() * &self.error)
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        assert_eq!(
            out.rows(),
            self.dimension(),
            "container rows do not match the error dimension"
        );
        self.expression.evaluate_jacobians(out);
    }

    fn weighted_jacobians(&self, out: &mut JacobianContainer, use_m_estimator: bool) {
        assert_eq!(
            out.rows(),
            self.dimension(),
            "container rows do not match the error dimension"
        );
        let rule = self.sqrt_inv_r.transpose() * self.sqrt_weight(use_m_estimator);
        let mut scope = out.apply(&rule);
        self.expression.evaluate_jacobians(&mut scope);
    }

    fn set_m_estimator(&mut self, policy: Box<dyn MEstimator>) {
        self.m_estimator = Some(policy);
    }

    fn clear_m_estimator(&mut self) {
        self.m_estimator = None;
    }

    fn m_estimator_name(&self) -> String {
        self.m_estimator
            .as_ref()
            .map_or_else(|| "none".to_string(), |policy| policy.name().to_string())
    }

    fn row_base(&self) -> usize {
        self.row_base
    }

    fn set_row_base(&mut self, row_base: usize) {
        self.row_base = row_base;
    }
}
