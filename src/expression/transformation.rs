//! Rigid transformation (SE(3)) expressions.
//!
//! A transformation expression evaluates to an isometry. Its tangent space is
//! R⁶ ordered `[translation; rotation]` under the left perturbation
//! `T ← Exp(δ) T`.

use std::ops::Mul;
use std::sync::Arc;

use nalgebra::{DMatrix, Isometry3, Matrix6, Rotation3, Translation3, UnitQuaternion};

use crate::design_variable::DesignVariableSet;
use crate::differential::{apply_differential, Differential};
use crate::expression::euclidean::{EuclideanExpression, EuclideanNode, TranslationNode};
use crate::expression::homogeneous::{HomogeneousExpression, TransformNode};
use crate::expression::rotation::{RotationExpression, RotationNode};
use crate::expression::{dense, skew};
use crate::jacobian::JacobianContainer;

/// A node in a transformation expression DAG.
pub trait TransformationNode: Send + Sync {
    fn evaluate(&self) -> Isometry3<f64>;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// The SE(3) adjoint of `t` for `[translation; rotation]`-ordered tangents.
pub(crate) fn adjoint(t: &Isometry3<f64>) -> Matrix6<f64> {
    let c = t.rotation.to_rotation_matrix().into_inner();
    let translation = t.translation.vector;
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&c);
    ad.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(skew(&translation) * c));
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&c);
    ad
}

/// A transformation-valued expression over design variables and constants.
#[derive(Clone)]
pub struct TransformationExpression {
    root: Arc<dyn TransformationNode>,
}

impl TransformationExpression {
    pub fn from_node(root: Arc<dyn TransformationNode>) -> Self {
        TransformationExpression { root }
    }

    /// A constant transformation with no design variable dependency.
    pub fn constant(t: Isometry3<f64>) -> Self {
        Self::from_node(Arc::new(ConstantNode { t }))
    }

    /// Assemble a transformation from rotation and translation expressions.
    pub fn from_rotation_translation(
        rotation: &RotationExpression,
        translation: &EuclideanExpression,
    ) -> Self {
        Self::from_node(Arc::new(BasicNode {
            rotation: rotation.root().clone(),
            translation: translation.root().clone(),
        }))
    }

    pub fn evaluate(&self) -> Isometry3<f64> {
        self.root.evaluate()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.root.evaluate_jacobians(out);
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> TransformationExpression {
        Self::from_node(Arc::new(InverseNode {
            operand: self.root.clone(),
        }))
    }

    /// The rotation part.
    pub fn rotation(&self) -> RotationExpression {
        RotationExpression::from_node(Arc::new(ExtractRotationNode {
            transformation: self.root.clone(),
        }))
    }

    /// The translation part.
    pub fn translation(&self) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(TranslationNode {
            transformation: self.root.clone(),
        }))
    }

    /// Apply this transformation to a homogeneous expression.
    pub fn transform(&self, point: &HomogeneousExpression) -> HomogeneousExpression {
        HomogeneousExpression::from_node(Arc::new(TransformNode {
            transformation: self.root.clone(),
            point: point.root().clone(),
        }))
    }
}

struct ConstantNode {
    t: Isometry3<f64>,
}

impl TransformationNode for ConstantNode {
    fn evaluate(&self) -> Isometry3<f64> {
        self.t
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

/// `T = (C, t)` built from a rotation and a translation expression.
struct BasicNode {
    rotation: Arc<dyn RotationNode>,
    translation: Arc<dyn EuclideanNode>,
}

impl TransformationNode for BasicNode {
    fn evaluate(&self) -> Isometry3<f64> {
        let c = self.rotation.evaluate();
        let t = self.translation.evaluate();
        Isometry3::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(c)),
        )
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let t = self.translation.evaluate();
        {
            // rotating the frame about the world origin drags the origin:
            // ρ_out = [t]× ω, ω_out = ω
            let mut local = DMatrix::zeros(6, 3);
            local.view_mut((0, 0), (3, 3)).copy_from(&skew(&t));
            local
                .view_mut((3, 0), (3, 3))
                .copy_from(&nalgebra::Matrix3::identity());
            let differential = Differential::Matrix(local);
            let mut scope = apply_differential(out, &differential, 3);
            self.rotation.evaluate_jacobians(&mut scope);
        }
        let mut local = DMatrix::zeros(6, 3);
        local
            .view_mut((0, 0), (3, 3))
            .copy_from(&nalgebra::Matrix3::identity());
        let differential = Differential::Matrix(local);
        let mut scope = apply_differential(out, &differential, 3);
        self.translation.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.rotation.design_variables(set);
        self.translation.design_variables(set);
    }
}

struct ComposeNode {
    lhs: Arc<dyn TransformationNode>,
    rhs: Arc<dyn TransformationNode>,
}

impl TransformationNode for ComposeNode {
    fn evaluate(&self) -> Isometry3<f64> {
        self.lhs.evaluate() * self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        {
            let mut scope = apply_differential(out, &Differential::Identity, 6);
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let local = Differential::Matrix(dense(&adjoint(&self.lhs.evaluate())));
        let mut scope = apply_differential(out, &local, 6);
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct InverseNode {
    operand: Arc<dyn TransformationNode>,
}

impl TransformationNode for InverseNode {
    fn evaluate(&self) -> Isometry3<f64> {
        self.operand.evaluate().inverse()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        // δ_out = -Ad(T⁻¹) δ
        let local = Differential::Matrix(dense(&(-adjoint(&self.evaluate()))));
        let mut scope = apply_differential(out, &local, 6);
        self.operand.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.operand.design_variables(set);
    }
}

/// Rotation part of a transformation.
struct ExtractRotationNode {
    transformation: Arc<dyn TransformationNode>,
}

impl RotationNode for ExtractRotationNode {
    fn evaluate(&self) -> nalgebra::Matrix3<f64> {
        self.transformation
            .evaluate()
            .rotation
            .to_rotation_matrix()
            .into_inner()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        // ω_out = ω, the translation part drops out
        let mut local = DMatrix::zeros(3, 6);
        local
            .view_mut((0, 3), (3, 3))
            .copy_from(&nalgebra::Matrix3::identity());
        let differential = Differential::Matrix(local);
        let mut scope = apply_differential(out, &differential, 6);
        self.transformation.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.transformation.design_variables(set);
    }
}

impl Mul for TransformationExpression {
    type Output = TransformationExpression;

    fn mul(self, rhs: TransformationExpression) -> TransformationExpression {
        TransformationExpression::from_node(Arc::new(ComposeNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}
