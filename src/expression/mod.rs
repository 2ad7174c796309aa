//! The expression node graph: typed, immutable-after-construction DAGs over
//! design variables and constants.
//!
//! Each submodule defines a node trait (`evaluate`, `evaluate_jacobians`,
//! `design_variables`), the concrete composite nodes for its value type, and a
//! cheap-to-clone expression wrapper around the root node. Children are held
//! as `Arc<dyn …Node>`, so sub-expressions can be shared between several
//! parents; cycles are impossible because an expression can only reference
//! nodes that already exist.
//!
//! Forward values are computed on demand. Jacobian passes re-evaluate the
//! child values they need, so `evaluate` followed by `evaluate_jacobians` is
//! always consistent with the current design variable values.
//!
//! Derivative conventions: rotations and transformations use left
//! (world-frame) perturbations; SE(3) tangents are ordered
//! `[translation; rotation]`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::design_variable::DesignVariableSet;
use crate::jacobian::JacobianContainer;

pub mod euclidean;
pub mod homogeneous;
pub mod matrix;
pub mod rotation;
pub mod scalar;
pub mod transformation;

pub use euclidean::EuclideanExpression;
pub use homogeneous::HomogeneousExpression;
pub use matrix::MatrixExpression;
pub use rotation::RotationExpression;
pub use scalar::ScalarExpression;
pub use transformation::TransformationExpression;

/// An expression whose output can be stacked into a dynamic vector, the seam
/// consumed by error terms.
pub trait VectorFunction: Send + Sync {
    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Forward-evaluate into a dynamic vector.
    fn evaluate(&self) -> DVector<f64>;

    /// Back-propagate into `out`; the container must have `dimension()` rows.
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);

    /// Collect every design variable reachable from this expression.
    fn design_variables(&self, set: &mut DesignVariableSet);
}

impl VectorFunction for ScalarExpression {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&self) -> DVector<f64> {
        DVector::from_element(1, ScalarExpression::evaluate(self))
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        ScalarExpression::evaluate_jacobians(self, out);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        ScalarExpression::design_variables(self, set);
    }
}

impl VectorFunction for EuclideanExpression {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self) -> DVector<f64> {
        DVector::from_column_slice(EuclideanExpression::evaluate(self).as_slice())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        EuclideanExpression::evaluate_jacobians(self, out);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        EuclideanExpression::design_variables(self, set);
    }
}

impl VectorFunction for HomogeneousExpression {
    fn dimension(&self) -> usize {
        4
    }

    fn evaluate(&self) -> DVector<f64> {
        DVector::from_column_slice(HomogeneousExpression::evaluate(self).as_slice())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        HomogeneousExpression::evaluate_jacobians(self, out);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        HomogeneousExpression::design_variables(self, set);
    }
}

/// Skew-symmetric cross-product matrix: `skew(v) · w = v × w`.
pub(crate) fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Copy a statically sized nalgebra matrix into a dynamic one.
pub(crate) fn dense<R, C, S>(m: &nalgebra::Matrix<f64, R, C, S>) -> DMatrix<f64>
where
    R: nalgebra::Dim,
    C: nalgebra::Dim,
    S: nalgebra::storage::RawStorage<f64, R, C>,
{
    DMatrix::from_iterator(m.nrows(), m.ncols(), m.iter().copied())
}
