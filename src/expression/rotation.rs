//! Rotation-valued expressions.
//!
//! A rotation expression evaluates to a 3x3 rotation matrix. Its tangent
//! space is R³ under the left (world-frame) perturbation
//! `C ← exp(ω̂) C`, matching the update convention of
//! [`RotationQuaternion`].

use std::ops::Mul;
use std::sync::Arc;

use nalgebra::Matrix3;

use crate::design_variable::{DesignVariable, DesignVariableSet, RotationQuaternion};
use crate::differential::{apply_differential, Differential};
use crate::expression::dense;
use crate::expression::euclidean::{EuclideanExpression, RotateNode};
use crate::jacobian::JacobianContainer;

/// A node in a rotation expression DAG.
pub trait RotationNode: Send + Sync {
    /// The rotation matrix of this node.
    fn evaluate(&self) -> Matrix3<f64>;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// A rotation-valued expression over design variables and constants.
#[derive(Clone)]
pub struct RotationExpression {
    root: Arc<dyn RotationNode>,
}

impl RotationExpression {
    pub fn from_node(root: Arc<dyn RotationNode>) -> Self {
        RotationExpression { root }
    }

    /// A constant rotation with no design variable dependency.
    pub fn constant(c: Matrix3<f64>) -> Self {
        Self::from_node(Arc::new(ConstantNode { c }))
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

    pub(crate) fn root(&self) -> &Arc<dyn RotationNode> {
        &self.root
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> RotationExpression {
        Self::from_node(Arc::new(InverseNode {
            operand: self.root.clone(),
        }))
    }

    /// Apply this rotation to a Euclidean expression.
    pub fn rotate(&self, point: &EuclideanExpression) -> EuclideanExpression {
        EuclideanExpression::from_node(Arc::new(RotateNode {
            rotation: self.root.clone(),
            point: point.root().clone(),
        }))
    }
}

impl RotationQuaternion {
    /// View this design variable as a rotation expression leaf.
    pub fn to_expression(self: &Arc<Self>) -> RotationExpression {
        RotationExpression::from_node(Arc::new(LeafNode {
            variable: self.clone(),
        }))
    }
}

struct ConstantNode {
    c: Matrix3<f64>,
}

impl RotationNode for ConstantNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.c
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

struct LeafNode {
    variable: Arc<RotationQuaternion>,
}

impl RotationNode for LeafNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.variable.rotation_matrix()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        Differential::Identity.add_to_jacobian_container(out, &dv);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        let dv: Arc<dyn DesignVariable> = self.variable.clone();
        set.insert(&dv);
    }
}

struct InverseNode {
    operand: Arc<dyn RotationNode>,
}

impl RotationNode for InverseNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.operand.evaluate().transpose()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        // ω_out = -Cᵀ ω for C_out = Cᵀ
        let c_inv = self.evaluate();
        let local = Differential::Matrix(dense(&(-c_inv)));
        let mut scope = apply_differential(out, &local, 3);
        self.operand.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.operand.design_variables(set);
    }
}

struct ComposeNode {
    lhs: Arc<dyn RotationNode>,
    rhs: Arc<dyn RotationNode>,
}

impl RotationNode for ComposeNode {
    fn evaluate(&self) -> Matrix3<f64> {
        self.lhs.evaluate() * self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        // a world-frame wiggle of the left factor is a wiggle of the product
        {
            let mut scope = apply_differential(out, &Differential::Identity, 3);
            self.lhs.evaluate_jacobians(&mut scope);
        }
        // a wiggle of the right factor is conjugated through the left one
        let local = Differential::Matrix(dense(&self.lhs.evaluate()));
        let mut scope = apply_differential(out, &local, 3);
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

impl Mul for RotationExpression {
    type Output = RotationExpression;

    fn mul(self, rhs: RotationExpression) -> RotationExpression {
        RotationExpression::from_node(Arc::new(ComposeNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}
