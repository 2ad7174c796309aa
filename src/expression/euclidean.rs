//! Euclidean (3-vector) expressions.

use std::ops::{Add, Neg, Sub};
use std::sync::Arc;

use nalgebra::{DMatrix, Vector3};

use crate::design_variable::{DesignVariable, DesignVariableSet, EuclideanPoint};
use crate::differential::{apply_differential, Differential};
use crate::expression::homogeneous::{FromEuclideanNode, HomogeneousExpression};
use crate::expression::matrix::MatrixNode;
use crate::expression::rotation::RotationNode;
use crate::expression::scalar::{DotNode, ScalarExpression, ScalarNode, SquaredNormNode};
use crate::expression::transformation::TransformationNode;
use crate::expression::{dense, skew};
use crate::jacobian::JacobianContainer;

/// A node in a Euclidean expression DAG.
pub trait EuclideanNode: Send + Sync {
    fn evaluate(&self) -> Vector3<f64>;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// A 3-vector-valued expression over design variables and constants.
#[derive(Clone)]
pub struct EuclideanExpression {
    root: Arc<dyn EuclideanNode>,
}

impl EuclideanExpression {
    pub fn from_node(root: Arc<dyn EuclideanNode>) -> Self {
        EuclideanExpression { root }
    }

    /// A constant vector with no design variable dependency.
    pub fn constant(value: Vector3<f64>) -> Self {
        Self::from_node(Arc::new(ConstantNode { value }))
    }

    pub fn evaluate(&self) -> Vector3<f64> {
        self.root.evaluate()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.root.evaluate_jacobians(out);
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    pub(crate) fn root(&self) -> &Arc<dyn EuclideanNode> {
        &self.root
    }

    /// Cross product with another expression.
    pub fn cross(&self, rhs: &EuclideanExpression) -> EuclideanExpression {
        Self::from_node(Arc::new(CrossNode {
            lhs: self.root.clone(),
            rhs: rhs.root.clone(),
        }))
    }

    /// Scale by a scalar expression.
    pub fn scaled(&self, factor: &ScalarExpression) -> EuclideanExpression {
        Self::from_node(Arc::new(ScalarMultiplyNode {
            point: self.root.clone(),
            factor: factor.root().clone(),
        }))
    }

    /// Elementwise product with another expression.
    pub fn component_mul(&self, rhs: &EuclideanExpression) -> EuclideanExpression {
        Self::from_node(Arc::new(ComponentMultiplyNode {
            lhs: self.root.clone(),
            rhs: rhs.root.clone(),
        }))
    }

    /// Inner product with another expression.
    pub fn dot(&self, rhs: &EuclideanExpression) -> ScalarExpression {
        let node: Arc<dyn ScalarNode> = Arc::new(DotNode {
            lhs: self.root.clone(),
            rhs: rhs.root.clone(),
        });
        ScalarExpression::from_node(node)
    }

    /// Squared Euclidean norm.
    pub fn squared_norm(&self) -> ScalarExpression {
        let node: Arc<dyn ScalarNode> = Arc::new(SquaredNormNode {
            arg: self.root.clone(),
        });
        ScalarExpression::from_node(node)
    }

    /// Lift into homogeneous coordinates, `v ↦ [v; 1]`.
    pub fn to_homogeneous(&self) -> HomogeneousExpression {
        HomogeneousExpression::from_node(Arc::new(FromEuclideanNode {
            point: self.root.clone(),
        }))
    }
}

impl EuclideanPoint {
    /// View this design variable as a Euclidean expression leaf.
    pub fn to_expression(self: &Arc<Self>) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(LeafNode {
            variable: self.clone(),
        }))
    }
}

struct ConstantNode {
    value: Vector3<f64>,
}

impl EuclideanNode for ConstantNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.value
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

struct LeafNode {
    variable: Arc<EuclideanPoint>,
}

impl EuclideanNode for LeafNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.variable.value()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        out.add_identity(&dv);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        set.insert(&dv);
    }
}

struct AddNode {
    lhs: Arc<dyn EuclideanNode>,
    rhs: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for AddNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.lhs.evaluate() + self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.lhs.evaluate_jacobians(out);
        self.rhs.evaluate_jacobians(out);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct SubtractNode {
    lhs: Arc<dyn EuclideanNode>,
    rhs: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for SubtractNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.lhs.evaluate() - self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.lhs.evaluate_jacobians(out);
        let mut scope = out.apply_scalar(-1.0);
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

/// Subtraction of a constant vector; only the expression side carries
/// derivatives.
struct SubtractVectorNode {
    lhs: Arc<dyn EuclideanNode>,
    rhs: Vector3<f64>,
}

impl EuclideanNode for SubtractVectorNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.lhs.evaluate() - self.rhs
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.lhs.evaluate_jacobians(out);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
    }
}

struct NegateNode {
    operand: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for NegateNode {
    fn evaluate(&self) -> Vector3<f64> {
        -self.operand.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let mut scope = out.apply_scalar(-1.0);
        self.operand.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.operand.design_variables(set);
    }
}

struct CrossNode {
    lhs: Arc<dyn EuclideanNode>,
    rhs: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for CrossNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.lhs.evaluate().cross(&self.rhs.evaluate())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let a = self.lhs.evaluate();
        let b = self.rhs.evaluate();
        {
            let mut scope = out.apply(&dense(&(-skew(&b))));
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&dense(&skew(&a)));
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct ScalarMultiplyNode {
    point: Arc<dyn EuclideanNode>,
    factor: Arc<dyn ScalarNode>,
}

impl EuclideanNode for ScalarMultiplyNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.factor.evaluate() * self.point.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        {
            let mut scope = out.apply_scalar(self.factor.evaluate());
            self.point.evaluate_jacobians(&mut scope);
        }
        let p = self.point.evaluate();
        let mut scope = out.apply(&DMatrix::from_column_slice(3, 1, p.as_slice()));
        self.factor.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.point.design_variables(set);
        self.factor.design_variables(set);
    }
}

struct ComponentMultiplyNode {
    lhs: Arc<dyn EuclideanNode>,
    rhs: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for ComponentMultiplyNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.lhs.evaluate().component_mul(&self.rhs.evaluate())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let a = self.lhs.evaluate();
        let b = self.rhs.evaluate();
        {
            let mut scope = out.apply(&dense(&nalgebra::Matrix3::from_diagonal(&b)));
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&dense(&nalgebra::Matrix3::from_diagonal(&a)));
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

/// Application of a rotation expression to a point, `v ↦ C v`.
pub(crate) struct RotateNode {
    pub(crate) rotation: Arc<dyn RotationNode>,
    pub(crate) point: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for RotateNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.rotation.evaluate() * self.point.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let c = self.rotation.evaluate();
        let rotated = c * self.point.evaluate();
        {
            let local = Differential::Matrix(dense(&(-skew(&rotated))));
            let mut scope = apply_differential(out, &local, 3);
            self.rotation.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&dense(&c));
        self.point.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.rotation.design_variables(set);
        self.point.design_variables(set);
    }
}

/// Application of a general matrix expression to a point, `v ↦ A v`.
pub(crate) struct MatrixVectorNode {
    pub(crate) matrix: Arc<dyn MatrixNode>,
    pub(crate) point: Arc<dyn EuclideanNode>,
}

impl EuclideanNode for MatrixVectorNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.matrix.evaluate() * self.point.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let a = self.matrix.evaluate();
        let v = self.point.evaluate();
        {
            // derivative of A v by the column-major entries of A
            let by_entries =
                DMatrix::from_fn(3, 9, |i, k| if k % 3 == i { v[k / 3] } else { 0.0 });
            let mut scope = out.apply(&by_entries);
            self.matrix.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&dense(&a));
        self.point.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.matrix.design_variables(set);
        self.point.design_variables(set);
    }
}

/// Translation part of a transformation expression.
pub(crate) struct TranslationNode {
    pub(crate) transformation: Arc<dyn TransformationNode>,
}

impl EuclideanNode for TranslationNode {
    fn evaluate(&self) -> Vector3<f64> {
        self.transformation.evaluate().translation.vector
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let t = self.evaluate();
        let mut local = DMatrix::zeros(3, 6);
        local
            .view_mut((0, 0), (3, 3))
            .copy_from(&nalgebra::Matrix3::identity());
        local.view_mut((0, 3), (3, 3)).copy_from(&(-skew(&t)));
        let differential = Differential::Matrix(local);
        let mut scope = apply_differential(out, &differential, 6);
        self.transformation.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.transformation.design_variables(set);
    }
}

/// Projection from homogeneous coordinates, `[a; w] ↦ a / w`.
pub(crate) struct FromHomogeneousNode {
    pub(crate) point: Arc<dyn crate::expression::homogeneous::HomogeneousNode>,
}

impl EuclideanNode for FromHomogeneousNode {
    fn evaluate(&self) -> Vector3<f64> {
        let h = self.point.evaluate();
        Vector3::new(h.x, h.y, h.z) / h.w
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let h = self.point.evaluate();
        let a = Vector3::new(h.x, h.y, h.z);
        let w = h.w;
        let mut local = DMatrix::zeros(3, 4);
        local
            .view_mut((0, 0), (3, 3))
            .copy_from(&(nalgebra::Matrix3::identity() / w));
        local
            .view_mut((0, 3), (3, 1))
            .copy_from(&(-a / (w * w)));
        let mut scope = out.apply(&local);
        self.point.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.point.design_variables(set);
    }
}

impl Add for EuclideanExpression {
    type Output = EuclideanExpression;

    fn add(self, rhs: EuclideanExpression) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(AddNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}

impl Sub for EuclideanExpression {
    type Output = EuclideanExpression;

    fn sub(self, rhs: EuclideanExpression) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(SubtractNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}

impl Sub<Vector3<f64>> for EuclideanExpression {
    type Output = EuclideanExpression;

    fn sub(self, rhs: Vector3<f64>) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(SubtractVectorNode {
            lhs: self.root,
            rhs,
        }))
    }
}

impl Neg for EuclideanExpression {
    type Output = EuclideanExpression;

    fn neg(self) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(NegateNode { operand: self.root }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn leaf(x: f64, y: f64, z: f64) -> (Arc<EuclideanPoint>, EuclideanExpression) {
        let dv = Arc::new(EuclideanPoint::new(Vector3::new(x, y, z)));
        let expr = dv.to_expression();
        (dv, expr)
    }

    fn jacobian_of(
        expr: &EuclideanExpression,
        dv: &Arc<EuclideanPoint>,
    ) -> DMatrix<f64> {
        let mut jc = JacobianContainer::new(3);
        expr.evaluate_jacobians(&mut jc);
        let dv: Arc<dyn DesignVariable> = dv.clone();
        jc.jacobian(&dv).cloned().unwrap_or_else(|| DMatrix::zeros(3, 3))
    }

    #[test]
    fn test_add_and_subtract() {
        let (a, ae) = leaf(1.0, 2.0, 3.0);
        let (b, be) = leaf(0.5, -1.0, 2.0);

        let sum = ae.clone() + be.clone();
        assert_eq!(sum.evaluate(), Vector3::new(1.5, 1.0, 5.0));
        assert_eq!(jacobian_of(&sum, &a), DMatrix::identity(3, 3));
        assert_eq!(jacobian_of(&sum, &b), DMatrix::identity(3, 3));

        let difference = ae - be;
        assert_eq!(jacobian_of(&difference, &b), -DMatrix::identity(3, 3));
    }

    #[test]
    fn test_cross_product_jacobians() {
        let (a, ae) = leaf(1.0, 0.0, 0.0);
        let (b, be) = leaf(0.0, 1.0, 0.0);
        let crossed = ae.cross(&be);
        assert_eq!(crossed.evaluate(), Vector3::new(0.0, 0.0, 1.0));

        let ja = jacobian_of(&crossed, &a);
        let jb = jacobian_of(&crossed, &b);
        assert_eq!(ja, dense(&(-skew(&Vector3::new(0.0, 1.0, 0.0)))));
        assert_eq!(jb, dense(&skew(&Vector3::new(1.0, 0.0, 0.0))));
    }

    #[test]
    fn test_two_paths_to_one_variable_accumulate() {
        let (a, ae) = leaf(1.0, 2.0, 3.0);
        let doubled = ae.clone() + ae;
        assert_eq!(doubled.evaluate(), Vector3::new(2.0, 4.0, 6.0));
        assert_eq!(jacobian_of(&doubled, &a), DMatrix::identity(3, 3) * 2.0);
    }

    #[test]
    fn test_scaled_by_scalar_expression() {
        let (p, pe) = leaf(1.0, -2.0, 0.5);
        let s = Arc::new(crate::design_variable::Scalar::new(3.0));
        let scaled = pe.scaled(&s.to_expression());
        assert_eq!(scaled.evaluate(), Vector3::new(3.0, -6.0, 1.5));

        assert_eq!(jacobian_of(&scaled, &p), DMatrix::identity(3, 3) * 3.0);

        let mut jc = JacobianContainer::new(3);
        scaled.evaluate_jacobians(&mut jc);
        let s_dv: Arc<dyn DesignVariable> = s;
        let js = jc.jacobian(&s_dv).unwrap();
        assert_eq!(js, &DMatrix::from_column_slice(3, 1, &[1.0, -2.0, 0.5]));
    }

    #[test]
    fn test_component_mul_uses_diagonals() {
        let (a, ae) = leaf(1.0, 2.0, 3.0);
        let (_b, be) = leaf(4.0, 5.0, 6.0);
        let product = ae.component_mul(&be);
        assert_eq!(product.evaluate(), Vector3::new(4.0, 10.0, 18.0));
        let ja = jacobian_of(&product, &a);
        assert_eq!(ja, dense(&nalgebra::Matrix3::from_diagonal(&Vector3::new(4.0, 5.0, 6.0))));
    }

    #[test]
    fn test_dot_and_squared_norm() {
        let (a, ae) = leaf(1.0, 2.0, 3.0);
        let (_b, be) = leaf(-1.0, 0.5, 2.0);

        let dot = ae.dot(&be);
        assert_relative_eq!(dot.evaluate(), 6.0, epsilon = 1e-12);

        let mut jc = JacobianContainer::new(1);
        dot.evaluate_jacobians(&mut jc);
        let a_dv: Arc<dyn DesignVariable> = a.clone();
        assert_eq!(
            jc.jacobian(&a_dv).unwrap(),
            &DMatrix::from_row_slice(1, 3, &[-1.0, 0.5, 2.0])
        );

        let norm = ae.squared_norm();
        assert_relative_eq!(norm.evaluate(), 14.0, epsilon = 1e-12);
        let mut jc = JacobianContainer::new(1);
        norm.evaluate_jacobians(&mut jc);
        assert_eq!(
            jc.jacobian(&a_dv).unwrap(),
            &DMatrix::from_row_slice(1, 3, &[2.0, 4.0, 6.0])
        );
    }

    #[test]
    fn test_subtract_constant_vector() {
        let (a, ae) = leaf(5.0, 5.0, 5.0);
        let residual = ae - Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(residual.evaluate(), Vector3::new(4.0, 3.0, 2.0));
        assert_eq!(jacobian_of(&residual, &a), DMatrix::identity(3, 3));
    }
}
