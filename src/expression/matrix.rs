//! General 3x3 matrix expressions.

use std::ops::Mul;
use std::sync::Arc;

use nalgebra::Matrix3;

use crate::design_variable::{DesignVariable, DesignVariableSet, MatrixTransformation};
use crate::expression::euclidean::{EuclideanExpression, MatrixVectorNode};
use crate::jacobian::JacobianContainer;

/// A node in a matrix expression DAG.
///
/// The tangent space of a matrix expression is the 9 column-major entry
/// derivatives; a pattern-restricted matrix design variable packs those down
/// to its marked entries at the leaf.
pub trait MatrixNode: Send + Sync {
    fn evaluate(&self) -> Matrix3<f64>;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// A matrix-valued expression over design variables and constants.
#[derive(Clone)]
pub struct MatrixExpression {
    root: Arc<dyn MatrixNode>,
}

impl MatrixExpression {
    pub fn from_node(root: Arc<dyn MatrixNode>) -> Self {
        MatrixExpression { root }
    }

    /// A constant matrix with no design variable dependency.
    pub fn constant(a: Matrix3<f64>) -> Self {
        Self::from_node(Arc::new(ConstantNode { a }))
    }

    pub fn evaluate(&self) -> Matrix3<f64> {
        self.root.evaluate()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.root.evaluate_jacobians(out);
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }
}

impl MatrixTransformation {
    /// View this design variable as a matrix expression leaf.
    pub fn to_expression(self: &Arc<Self>) -> MatrixExpression {
        MatrixExpression::from_node(Arc::new(LeafNode {
            variable: self.clone(),
        }))
    }
}

struct ConstantNode {
    a: Matrix3<f64>,
}

impl MatrixNode for ConstantNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.a
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

struct LeafNode {
    variable: Arc<MatrixTransformation>,
}

impl MatrixNode for LeafNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.variable.matrix()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        // pack the 9 entry derivatives down to the marked entries
        let selection = self.variable.selection_jacobian();
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        out.add(&dv, &selection);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        set.insert(&dv);
    }
}

impl Mul<EuclideanExpression> for MatrixExpression {
    type Output = EuclideanExpression;

    fn mul(self, rhs: EuclideanExpression) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(MatrixVectorNode {
            matrix: self.root,
            point: rhs.root().clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, Vector3};

    #[test]
    fn test_matrix_vector_product_value_and_point_jacobian() {
        let a = Arc::new(MatrixTransformation::new(Matrix3::new(
            1.0, 2.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 3.0,
        )));
        let p = Arc::new(crate::design_variable::EuclideanPoint::new(Vector3::new(
            1.0, 1.0, 1.0,
        )));
        let product = a.to_expression() * p.to_expression();
        assert_eq!(product.evaluate(), Vector3::new(3.0, 1.0, 3.0));

        let mut jc = JacobianContainer::new(3);
        product.evaluate_jacobians(&mut jc);

        let p_dv: Arc<dyn DesignVariable> = p;
        assert_eq!(
            jc.jacobian(&p_dv).unwrap(),
            &crate::expression::dense(&a.matrix())
        );
    }

    #[test]
    fn test_pattern_restricted_matrix_jacobian() {
        // only the (0, 0) entry is free: d(Av)/dA00 = [v0, 0, 0]
        let mut pattern = [false; 9];
        pattern[0] = true;
        let a = Arc::new(MatrixTransformation::with_pattern(
            Matrix3::identity(),
            pattern,
        ));
        let product =
            a.to_expression() * EuclideanExpression::constant(Vector3::new(5.0, 6.0, 7.0));

        let mut jc = JacobianContainer::new(3);
        product.evaluate_jacobians(&mut jc);

        let a_dv: Arc<dyn DesignVariable> = a;
        let j = jc.jacobian(&a_dv).unwrap();
        assert_eq!(j, &DMatrix::from_column_slice(3, 1, &[5.0, 0.0, 0.0]));
    }
}
