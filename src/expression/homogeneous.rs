//! Homogeneous (4-vector) expressions.

use std::sync::Arc;

use nalgebra::{DMatrix, Vector3, Vector4};

use crate::design_variable::DesignVariableSet;
use crate::differential::{apply_differential, Differential};
use crate::expression::euclidean::{EuclideanExpression, EuclideanNode, FromHomogeneousNode};
use crate::expression::skew;
use crate::expression::transformation::TransformationNode;
use crate::jacobian::JacobianContainer;

/// A node in a homogeneous expression DAG.
pub trait HomogeneousNode: Send + Sync {
    fn evaluate(&self) -> Vector4<f64>;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// A homogeneous-coordinate expression; the tangent space is plain R⁴.
#[derive(Clone)]
pub struct HomogeneousExpression {
    root: Arc<dyn HomogeneousNode>,
}

impl HomogeneousExpression {
    pub fn from_node(root: Arc<dyn HomogeneousNode>) -> Self {
        HomogeneousExpression { root }
    }

    /// A constant homogeneous vector with no design variable dependency.
    pub fn constant(value: Vector4<f64>) -> Self {
        Self::from_node(Arc::new(ConstantNode { value }))
    }

    pub fn evaluate(&self) -> Vector4<f64> {
        self.root.evaluate()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.root.evaluate_jacobians(out);
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    pub(crate) fn root(&self) -> &Arc<dyn HomogeneousNode> {
        &self.root
    }

    /// Project back to Euclidean coordinates, `[a; w] ↦ a / w`.
    pub fn to_euclidean(&self) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(FromHomogeneousNode {
            point: self.root.clone(),
        }))
    }
}

struct ConstantNode {
    value: Vector4<f64>,
}

impl HomogeneousNode for ConstantNode {
    fn evaluate(&self) -> Vector4<f64> {
        self.value
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

/// Lift of a Euclidean expression, `v ↦ [v; 1]`.
pub(crate) struct FromEuclideanNode {
    pub(crate) point: Arc<dyn EuclideanNode>,
}

impl HomogeneousNode for FromEuclideanNode {
    fn evaluate(&self) -> Vector4<f64> {
        let p = self.point.evaluate();
        Vector4::new(p.x, p.y, p.z, 1.0)
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let mut local = DMatrix::zeros(4, 3);
        local
            .view_mut((0, 0), (3, 3))
            .copy_from(&nalgebra::Matrix3::identity());
        let mut scope = out.apply(&local);
        self.point.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.point.design_variables(set);
    }
}

/// Application of a transformation to a homogeneous point, `h ↦ T h`.
pub(crate) struct TransformNode {
    pub(crate) transformation: Arc<dyn TransformationNode>,
    pub(crate) point: Arc<dyn HomogeneousNode>,
}

impl HomogeneousNode for TransformNode {
    fn evaluate(&self) -> Vector4<f64> {
        self.transformation.evaluate().to_homogeneous() * self.point.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let t = self.transformation.evaluate();
        let transformed = self.evaluate();
        {
            let a = Vector3::new(transformed.x, transformed.y, transformed.z);
            let w = transformed.w;
            let mut local = DMatrix::zeros(4, 6);
            local
                .view_mut((0, 0), (3, 3))
                .copy_from(&(nalgebra::Matrix3::identity() * w));
            local.view_mut((0, 3), (3, 3)).copy_from(&(-skew(&a)));
            let differential = Differential::Matrix(local);
            let mut scope = apply_differential(out, &differential, 6);
            self.transformation.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&crate::expression::dense(&t.to_homogeneous()));
        self.point.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.transformation.design_variables(set);
        self.point.design_variables(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design_variable::{DesignVariable, EuclideanPoint};
    use approx::assert_relative_eq;

    #[test]
    fn test_lift_and_project_roundtrip() {
        let p = Arc::new(EuclideanPoint::new(Vector3::new(1.0, -2.0, 0.5)));
        let lifted = p.to_expression().to_homogeneous();
        assert_eq!(lifted.evaluate(), Vector4::new(1.0, -2.0, 0.5, 1.0));

        let projected = lifted.to_euclidean();
        assert_relative_eq!(
            (projected.evaluate() - Vector3::new(1.0, -2.0, 0.5)).norm(),
            0.0,
            epsilon = 1e-12
        );

        // the roundtrip is the identity, so the Jacobian must be too
        let mut jc = JacobianContainer::new(3);
        projected.evaluate_jacobians(&mut jc);
        let dv: Arc<dyn DesignVariable> = p;
        let j = jc.jacobian(&dv).unwrap();
        assert_relative_eq!(
            (j - DMatrix::identity(3, 3)).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_projection_scales_by_inverse_w() {
        let h = HomogeneousExpression::constant(Vector4::new(2.0, 4.0, 6.0, 2.0));
        let e = h.to_euclidean();
        assert_eq!(e.evaluate(), Vector3::new(1.0, 2.0, 3.0));
    }
}
