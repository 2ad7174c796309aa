//! Scalar-valued expressions.

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::design_variable::{DesignVariable, DesignVariableSet, Scalar};
use crate::expression::dense;
use crate::expression::euclidean::EuclideanNode;
use crate::jacobian::JacobianContainer;

/// A node in a scalar expression DAG.
pub trait ScalarNode: Send + Sync {
    fn evaluate(&self) -> f64;
    fn evaluate_jacobians(&self, out: &mut JacobianContainer);
    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// A scalar-valued expression over design variables and constants.
#[derive(Clone)]
pub struct ScalarExpression {
    root: Arc<dyn ScalarNode>,
}

impl ScalarExpression {
    pub fn from_node(root: Arc<dyn ScalarNode>) -> Self {
        ScalarExpression { root }
    }

    /// A constant expression with no design variable dependency.
    pub fn constant(value: f64) -> Self {
        Self::from_node(Arc::new(ConstantNode { value, name: None }))
    }

    /// A constant carrying a diagnostic name.
    pub fn named_constant(name: &str, value: f64) -> Self {
        Self::from_node(Arc::new(ConstantNode {
            value,
            name: Some(name.to_string()),
        }))
    }

    pub fn evaluate(&self) -> f64 {
        self.root.evaluate()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.root.evaluate_jacobians(out);
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    pub(crate) fn root(&self) -> &Arc<dyn ScalarNode> {
        &self.root
    }

    fn unary(&self, value_fn: fn(f64) -> f64, derivative_fn: fn(f64) -> f64) -> Self {
        Self::from_node(Arc::new(UnaryNode {
            arg: self.root.clone(),
            value_fn,
            derivative_fn,
        }))
    }

    pub fn sqrt(&self) -> Self {
        self.unary(f64::sqrt, |x| 0.5 / x.sqrt())
    }

    pub fn exp(&self) -> Self {
        self.unary(f64::exp, f64::exp)
    }

    pub fn ln(&self) -> Self {
        self.unary(f64::ln, |x| 1.0 / x)
    }

    pub fn sin(&self) -> Self {
        self.unary(f64::sin, f64::cos)
    }

    pub fn cos(&self) -> Self {
        self.unary(f64::cos, |x| -x.sin())
    }
}

impl Scalar {
    /// View this design variable as a scalar expression leaf.
    pub fn to_expression(self: &Arc<Self>) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(LeafNode {
            variable: self.clone(),
        }))
    }
}

struct ConstantNode {
    value: f64,
    #[allow(dead_code)]
    name: Option<String>,
}

impl ScalarNode for ConstantNode {
    fn evaluate(&self) -> f64 {
        self.value
    }

    fn evaluate_jacobians(&self, _out: &mut JacobianContainer) {}

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

struct LeafNode {
    variable: Arc<Scalar>,
}

impl ScalarNode for LeafNode {
    fn evaluate(&self) -> f64 {
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

/// `lhs + rhs_multiplier * rhs`; subtraction is addition with multiplier -1.
struct AddNode {
    lhs: Arc<dyn ScalarNode>,
    rhs: Arc<dyn ScalarNode>,
    rhs_multiplier: f64,
}

impl ScalarNode for AddNode {
    fn evaluate(&self) -> f64 {
        self.lhs.evaluate() + self.rhs_multiplier * self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        self.lhs.evaluate_jacobians(out);
        let mut scope = out.apply_scalar(self.rhs_multiplier);
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct MultiplyNode {
    lhs: Arc<dyn ScalarNode>,
    rhs: Arc<dyn ScalarNode>,
}

impl ScalarNode for MultiplyNode {
    fn evaluate(&self) -> f64 {
        self.lhs.evaluate() * self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        {
            let mut scope = out.apply_scalar(self.rhs.evaluate());
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply_scalar(self.lhs.evaluate());
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct DivideNode {
    lhs: Arc<dyn ScalarNode>,
    rhs: Arc<dyn ScalarNode>,
}

impl ScalarNode for DivideNode {
    fn evaluate(&self) -> f64 {
        self.lhs.evaluate() / self.rhs.evaluate()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let denominator = self.rhs.evaluate();
        {
            let mut scope = out.apply_scalar(1.0 / denominator);
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let mut scope =
            out.apply_scalar(-self.lhs.evaluate() / (denominator * denominator));
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

struct NegateNode {
    operand: Arc<dyn ScalarNode>,
}

impl ScalarNode for NegateNode {
    fn evaluate(&self) -> f64 {
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

/// A unary operation supplied as a value/derivative function pair.
struct UnaryNode {
    arg: Arc<dyn ScalarNode>,
    value_fn: fn(f64) -> f64,
    derivative_fn: fn(f64) -> f64,
}

impl ScalarNode for UnaryNode {
    fn evaluate(&self) -> f64 {
        (self.value_fn)(self.arg.evaluate())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let mut scope = out.apply_scalar((self.derivative_fn)(self.arg.evaluate()));
        self.arg.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.arg.design_variables(set);
    }
}

/// Inner product of two Euclidean expressions.
pub(crate) struct DotNode {
    pub(crate) lhs: Arc<dyn EuclideanNode>,
    pub(crate) rhs: Arc<dyn EuclideanNode>,
}

impl ScalarNode for DotNode {
    fn evaluate(&self) -> f64 {
        self.lhs.evaluate().dot(&self.rhs.evaluate())
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let a = self.lhs.evaluate();
        let b = self.rhs.evaluate();
        {
            let mut scope = out.apply(&dense(&b.transpose()));
            self.lhs.evaluate_jacobians(&mut scope);
        }
        let mut scope = out.apply(&dense(&a.transpose()));
        self.rhs.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

/// Squared Euclidean norm, `vᵀv`.
pub(crate) struct SquaredNormNode {
    pub(crate) arg: Arc<dyn EuclideanNode>,
}

impl ScalarNode for SquaredNormNode {
    fn evaluate(&self) -> f64 {
        self.arg.evaluate().norm_squared()
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) {
        let v = self.arg.evaluate();
        let gradient: DMatrix<f64> = dense(&(2.0 * v.transpose()));
        let mut scope = out.apply(&gradient);
        self.arg.evaluate_jacobians(&mut scope);
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.arg.design_variables(set);
    }
}

impl Add for ScalarExpression {
    type Output = ScalarExpression;

    fn add(self, rhs: ScalarExpression) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(AddNode {
            lhs: self.root,
            rhs: rhs.root,
            rhs_multiplier: 1.0,
        }))
    }
}

impl Add<f64> for ScalarExpression {
    type Output = ScalarExpression;

    fn add(self, rhs: f64) -> ScalarExpression {
        self + ScalarExpression::constant(rhs)
    }
}

impl Sub for ScalarExpression {
    type Output = ScalarExpression;

    fn sub(self, rhs: ScalarExpression) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(AddNode {
            lhs: self.root,
            rhs: rhs.root,
            rhs_multiplier: -1.0,
        }))
    }
}

impl Sub<f64> for ScalarExpression {
    type Output = ScalarExpression;

    fn sub(self, rhs: f64) -> ScalarExpression {
        self - ScalarExpression::constant(rhs)
    }
}

impl Mul for ScalarExpression {
    type Output = ScalarExpression;

    fn mul(self, rhs: ScalarExpression) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(MultiplyNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}

impl Mul<f64> for ScalarExpression {
    type Output = ScalarExpression;

    fn mul(self, rhs: f64) -> ScalarExpression {
        self * ScalarExpression::constant(rhs)
    }
}

impl Div for ScalarExpression {
    type Output = ScalarExpression;

    fn div(self, rhs: ScalarExpression) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(DivideNode {
            lhs: self.root,
            rhs: rhs.root,
        }))
    }
}

impl Div<f64> for ScalarExpression {
    type Output = ScalarExpression;

    fn div(self, rhs: f64) -> ScalarExpression {
        self / ScalarExpression::constant(rhs)
    }
}

impl Neg for ScalarExpression {
    type Output = ScalarExpression;

    fn neg(self) -> ScalarExpression {
        ScalarExpression::from_node(Arc::new(NegateNode { operand: self.root }))
    }
}
