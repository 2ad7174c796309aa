//! Composable local linear maps for reverse-mode derivative propagation.
//!
//! A [`Differential`] describes how a tangent perturbation at one expression
//! node maps to a tangent at a downstream node. Differentials compose
//! associatively without materializing intermediate matrices: composition
//! with a dense Jacobian folds eagerly into the matrix shapes, while the
//! `Identity` and `Null` base cases terminate chains for free.
//!
//! Differentials are constructed transiently during a single Jacobian
//! evaluation pass and are not owned by any node.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::design_variable::DesignVariable;
use crate::jacobian::{ChainRuleScope, JacobianContainer};

/// A local linear map from a domain tangent space to a codomain tangent
/// space, over a small closed set of shapes.
pub enum Differential<'a> {
    /// The pass-through map.
    Identity,
    /// The zero map.
    Null,
    /// A dense local Jacobian.
    Matrix(DMatrix<f64>),
    /// `x ↦ next(jacobian · x)`: a dense head followed by another
    /// differential.
    Composed {
        jacobian: DMatrix<f64>,
        next: &'a Differential<'a>,
    },
}

impl<'a> Differential<'a> {
    /// The domain dimension, when the shape pins one down. `Identity` and
    /// `Null` inherit their dimensions from the context they are applied in.
    pub fn domain_dimension(&self) -> Option<usize> {
        match self {
            Differential::Identity | Differential::Null => None,
            Differential::Matrix(m) => Some(m.ncols()),
            Differential::Composed { jacobian, .. } => Some(jacobian.ncols()),
        }
    }

    /// The image of an arbitrary domain tangent vector.
    ///
    /// `result` must already have the codomain dimension; mismatched
    /// dimensions are a precondition violation.
    pub fn apply_into(&self, tangent: &DVector<f64>, result: &mut DVector<f64>) {
        match self {
            Differential::Identity => {
                assert_eq!(tangent.len(), result.len(), "identity differential dimension mismatch");
                result.copy_from(tangent);
            }
            Differential::Null => result.fill(0.0),
            Differential::Matrix(m) => {
                assert_eq!(m.ncols(), tangent.len(), "differential domain dimension mismatch");
                assert_eq!(m.nrows(), result.len(), "differential codomain dimension mismatch");
                result.copy_from(&(m * tangent));
            }
            Differential::Composed { jacobian, next } => {
                assert_eq!(jacobian.ncols(), tangent.len(), "differential domain dimension mismatch");
                let intermediate = jacobian * tangent;
                next.apply_into(&intermediate, result);
            }
        }
    }

    /// The image of the `index`-th standard basis tangent vector.
    pub fn apply_basis_vector_into(&self, index: usize, result: &mut DVector<f64>) {
        match self {
            Differential::Identity => {
                result.fill(0.0);
                result[index] = 1.0;
            }
            Differential::Null => result.fill(0.0),
            Differential::Matrix(m) => {
                assert_eq!(m.nrows(), result.len(), "differential codomain dimension mismatch");
                result.copy_from(&m.column(index));
            }
            Differential::Composed { jacobian, next } => {
                let intermediate = jacobian.column(index).into_owned();
                next.apply_into(&intermediate, result);
            }
        }
    }

    /// Compose with a dense Jacobian applied first: `x ↦ self(jacobian · x)`.
    pub fn compose(&'a self, jacobian: DMatrix<f64>) -> Differential<'a> {
        match self {
            Differential::Identity => Differential::Matrix(jacobian),
            Differential::Null => Differential::Null,
            Differential::Matrix(m) => {
                assert_eq!(
                    m.ncols(),
                    jacobian.nrows(),
                    "differential composition dimension mismatch"
                );
                Differential::Matrix(m * jacobian)
            }
            Differential::Composed { jacobian: head, next } => {
                assert_eq!(
                    head.ncols(),
                    jacobian.nrows(),
                    "differential composition dimension mismatch"
                );
                Differential::Composed {
                    jacobian: head * jacobian,
                    next: *next,
                }
            }
        }
    }

    /// Materialize into a `rows x domain_dimension` matrix.
    pub fn to_matrix(&self, rows: usize, domain_dimension: usize) -> DMatrix<f64> {
        match self {
            Differential::Identity => {
                assert_eq!(rows, domain_dimension, "identity differential must be square");
                DMatrix::identity(rows, domain_dimension)
            }
            Differential::Null => DMatrix::zeros(rows, domain_dimension),
            Differential::Matrix(m) => {
                assert_eq!(m.nrows(), rows, "differential codomain dimension mismatch");
                assert_eq!(m.ncols(), domain_dimension, "differential domain dimension mismatch");
                m.clone()
            }
            Differential::Composed { jacobian, next } => {
                assert_eq!(
                    jacobian.ncols(),
                    domain_dimension,
                    "differential domain dimension mismatch"
                );
                next.to_matrix(rows, jacobian.nrows()) * jacobian
            }
        }
    }

    /// Terminal scatter: apply this differential to the accumulator of a leaf
    /// design variable (the differential's domain is the variable's minimal
    /// tangent space).
    pub fn add_to_jacobian_container(
        &self,
        container: &mut JacobianContainer,
        variable: &Arc<dyn DesignVariable>,
    ) {
        match self {
            Differential::Identity => container.add_identity(variable),
            Differential::Null => {}
            Differential::Matrix(m) => container.add(variable, m),
            Differential::Composed { .. } => {
                let materialized =
                    self.to_matrix(container.current_domain(), variable.minimal_dimension());
                container.add(variable, &materialized);
            }
        }
    }

    /// Terminal scatter with a preceding Jacobian applied first:
    /// `variable tangent → preceding → self → accumulator`.
    pub fn add_to_jacobian_container_chained(
        &self,
        container: &mut JacobianContainer,
        variable: &Arc<dyn DesignVariable>,
        preceding: &DMatrix<f64>,
    ) {
        self.compose(preceding.clone())
            .add_to_jacobian_container(container, variable);
    }
}

/// Install a differential as the pending chain-rule matrix of `container`,
/// composed with any already-pending matrix. The matrix is materialized here,
/// at the single point where composition meets the container.
///
/// The returned guard restores the previous pending state on scope exit.
pub fn apply_differential<'c>(
    container: &'c mut JacobianContainer,
    differential: &Differential<'_>,
    domain_dimension: usize,
) -> ChainRuleScope<'c> {
    if let Some(dim) = differential.domain_dimension() {
        assert_eq!(dim, domain_dimension, "differential domain dimension mismatch");
    }
    let composed = match container.chain_top() {
        Some(top) => match differential {
            Differential::Identity => {
                assert_eq!(
                    top.ncols(),
                    domain_dimension,
                    "identity differential does not match the current domain"
                );
                top.clone()
            }
            Differential::Null => DMatrix::zeros(top.nrows(), domain_dimension),
            _ => top * differential.to_matrix(top.ncols(), domain_dimension),
        },
        None => differential.to_matrix(container.rows(), domain_dimension),
    };
    container.push_chain(composed)
}
