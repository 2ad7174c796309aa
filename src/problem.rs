//! Problem assembly: design variable registry, error term list, and the
//! deterministic (optionally parallel) gradient and objective aggregation
//! consumed by the optimizers.

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::design_variable::{DesignVariable, VariableKey};
use crate::error_term::ErrorTerm;
use crate::jacobian::JacobianContainer;

/// An optimization problem: shared design variables plus the error terms
/// referencing them.
///
/// Aggregation over error terms may run on several workers. Each worker
/// reduces a contiguous chunk of terms to a private partial sum and the
/// partials are combined in chunk order, so the result does not depend on
/// scheduling.
#[derive(Default)]
pub struct Problem {
    design_variables: Vec<Arc<dyn DesignVariable>>,
    registered: HashSet<VariableKey>,
    error_terms: Vec<Box<dyn ErrorTerm>>,
    num_opt_parameters: usize,
    total_error_dimension: usize,
    initialized: bool,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a design variable explicitly (error terms register theirs
    /// automatically).
    pub fn add_design_variable(&mut self, variable: Arc<dyn DesignVariable>) {
        if self.registered.insert(VariableKey::of(&variable)) {
            self.design_variables.push(variable);
            self.initialized = false;
        }
    }

    /// Append an error term, assigning its row base and registering its
    /// design variables.
    pub fn add_error_term(&mut self, mut term: Box<dyn ErrorTerm>) {
        term.set_row_base(self.total_error_dimension);
        self.total_error_dimension += term.dimension();
        let variables: Vec<Arc<dyn DesignVariable>> = term.design_variables().to_vec();
        for variable in variables {
            self.add_design_variable(variable);
        }
        self.error_terms.push(term);
        self.initialized = false;
    }

    pub fn num_design_variables(&self) -> usize {
        self.design_variables.len()
    }

    pub fn num_error_terms(&self) -> usize {
        self.error_terms.len()
    }

    pub fn design_variables(&self) -> &[Arc<dyn DesignVariable>] {
        &self.design_variables
    }

    pub fn error_term(&self, index: usize) -> &dyn ErrorTerm {
        self.error_terms[index].as_ref()
    }

    pub fn error_term_mut(&mut self, index: usize) -> &mut dyn ErrorTerm {
        self.error_terms[index].as_mut()
    }

    /// Total stacked error dimension over all terms.
    pub fn total_error_dimension(&self) -> usize {
        self.total_error_dimension
    }

    /// Total minimal dimension over all active design variables; valid after
    /// `initialize`.
    pub fn num_opt_parameters(&self) -> usize {
        self.num_opt_parameters
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Assign block indices and column bases to the active design variables
    /// in registration order.
    pub fn initialize(&mut self) {
        let mut column = 0;
        let mut block = 0;
        for variable in &self.design_variables {
            if variable.is_active() {
                variable.set_block_index(Some(block));
                variable.set_column_base(Some(column));
                block += 1;
                column += variable.minimal_dimension();
            } else {
                variable.set_block_index(None);
                variable.set_column_base(None);
            }
        }
        self.num_opt_parameters = column;
        self.initialized = true;
        debug!(
            design_variables = self.design_variables.len(),
            active_blocks = block,
            parameters = column,
            error_terms = self.error_terms.len(),
            "problem initialized"
        );
    }

    /// The objective gradient `Σ 2 Jᵀe` over all error terms.
    pub fn compute_gradient(&mut self, num_threads: usize, use_m_estimator: bool) -> DVector<f64> {
        assert!(
            self.initialized,
            "Problem::initialize must run before gradient computation"
        );
        let parameters = self.num_opt_parameters;
        if num_threads <= 1 || self.error_terms.len() <= 1 {
            let mut gradient = DVector::zeros(parameters);
            for term in &mut self.error_terms {
                add_gradient_contribution(term.as_mut(), use_m_estimator, &mut gradient);
            }
            gradient
        } else {
            let chunk_size = self.error_terms.len().div_ceil(num_threads);
            let partials: Vec<DVector<f64>> = self
                .error_terms
                .par_chunks_mut(chunk_size)
                .map(|terms| {
                    let mut partial = DVector::zeros(parameters);
                    for term in terms {
                        add_gradient_contribution(term.as_mut(), use_m_estimator, &mut partial);
                    }
                    partial
                })
                .collect();
            // combine in chunk order for a scheduling-independent result
            partials
                .into_iter()
                .fold(DVector::zeros(parameters), |accumulated, partial| {
                    accumulated + partial
                })
        }
    }

    /// The objective `Σ squared_error` over all error terms.
    pub fn evaluate_error(&mut self, num_threads: usize, use_m_estimator: bool) -> f64 {
        if num_threads <= 1 || self.error_terms.len() <= 1 {
            self.error_terms
                .iter_mut()
                .map(|term| {
                    term.update_raw_squared_error();
                    term.squared_error(use_m_estimator)
                })
                .sum()
        } else {
            let chunk_size = self.error_terms.len().div_ceil(num_threads);
            let partials: Vec<f64> = self
                .error_terms
                .par_chunks_mut(chunk_size)
                .map(|terms| {
                    terms
                        .iter_mut()
                        .map(|term| {
                            term.update_raw_squared_error();
                            term.squared_error(use_m_estimator)
                        })
                        .sum()
                })
                .collect();
            partials.into_iter().sum()
        }
    }

    /// Apply a stacked minimal-coordinates step to all active design
    /// variables. Strictly sequential; the optimizer is the single writer.
    pub fn apply_state_update(&mut self, dx: &DVector<f64>) {
        assert!(
            self.initialized,
            "Problem::initialize must run before state updates"
        );
        assert_eq!(
            dx.len(),
            self.num_opt_parameters,
            "state update has {} elements, problem has {} parameters",
            dx.len(),
            self.num_opt_parameters
        );
        let dx = dx.as_slice();
        for variable in &self.design_variables {
            if let Some(base) = variable.column_base() {
                variable.update(&dx[base..base + variable.minimal_dimension()]);
            }
        }
    }

    /// Undo the last `apply_state_update` on every active design variable.
    pub fn revert_last_update(&mut self) {
        for variable in &self.design_variables {
            if variable.column_base().is_some() {
                variable.revert();
            }
        }
    }

    /// Assemble the dense Gauss-Newton normal equations `H·dx = rhs` over all
    /// error terms.
    pub fn build_gauss_newton_system(
        &mut self,
        use_m_estimator: bool,
    ) -> (DMatrix<f64>, DVector<f64>) {
        assert!(
            self.initialized,
            "Problem::initialize must run before building the normal equations"
        );
        let parameters = self.num_opt_parameters;
        let mut hessian = DMatrix::zeros(parameters, parameters);
        let mut rhs = DVector::zeros(parameters);
        for term in &mut self.error_terms {
            term.update_raw_squared_error();
            term.build_hessian(&mut hessian, &mut rhs, use_m_estimator);
        }
        (hessian, rhs)
    }
}

fn add_gradient_contribution(
    term: &mut dyn ErrorTerm,
    use_m_estimator: bool,
    gradient: &mut DVector<f64>,
) {
    term.update_raw_squared_error();
    let mut container = JacobianContainer::new(term.dimension());
    term.weighted_jacobians(&mut container, use_m_estimator);
    let error = term.weighted_error(use_m_estimator);
    for block in container.blocks() {
        let variable = &block.variable;
        if !variable.is_active() {
            continue;
        }
        let Some(base) = variable.column_base() else {
            continue;
        };
        let contribution = 2.0 * block.jacobian.transpose() * &error;
        let mut segment = gradient.rows_mut(base, variable.minimal_dimension());
        segment += contribution;
    }
}
