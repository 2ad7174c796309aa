//! # Tangent Solver
//!
//! An expression-graph backend for nonlinear least squares optimization.
//! Residuals are built by composing typed expressions (scalars, 3-vectors,
//! rotations, homogeneous points, rigid transformations, matrices) over
//! shared design variables; Jacobians are never derived by hand but obtained
//! by reverse-mode propagation through the expression DAG.
//!
//! ## Components
//!
//! - **Design variables**: mutable parameter blocks with minimal-coordinate
//!   updates and a single-level undo buffer
//! - **Expressions**: an immutable-after-construction DAG whose nodes
//!   evaluate forward values and push local derivatives into a Jacobian
//!   accumulator
//! - **Differentials**: composable local linear maps that defer matrix
//!   materialization until a design variable is reached
//! - **Error terms**: weighted squared errors with pluggable robust
//!   (M-estimator) reweighting and Hessian/gradient scatter
//! - **Rprop optimizers**: gradient-sign iteration with per-parameter
//!   adaptive step sizes in four backtracking variants
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tangent_solver::{
//!     ExpressionErrorTerm, Problem, RpropMethod, RpropOptimizer, RpropOptions, Scalar,
//! };
//!
//! let x = Arc::new(Scalar::new(0.0));
//! let mut problem = Problem::new();
//! problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
//!     x.to_expression() - 5.0,
//! ))));
//!
//! let options = RpropOptions::default()
//!     .with_method(RpropMethod::RpropMinus)
//!     .with_convergence(0.0, 1e-8, 0.0);
//! let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
//! let status = optimizer.optimize();
//! assert!(status.success());
//! assert!((x.value() - 5.0).abs() < 1e-3);
//! ```

pub mod design_variable;
pub mod differential;
pub mod error;
pub mod error_term;
pub mod expression;
pub mod jacobian;
pub mod logger;
pub mod m_estimator;
pub mod optimizer;
pub mod problem;

// Re-export the core surface
pub use design_variable::{
    DesignVariable, DesignVariableSet, EuclideanPoint, MatrixTransformation, RotationQuaternion,
    Scalar, VariableKey,
};
pub use differential::{apply_differential, Differential};
pub use error::{TangentError, TangentResult};
pub use error_term::{ErrorTerm, ExpressionErrorTerm};
pub use expression::{
    EuclideanExpression, HomogeneousExpression, MatrixExpression, RotationExpression,
    ScalarExpression, TransformationExpression, VectorFunction,
};
pub use jacobian::{ChainRuleScope, JacobianBlock, JacobianContainer};
pub use logger::{init_logger, init_logger_with_level};
pub use m_estimator::{
    CauchyMEstimator, GemanMcClureMEstimator, HuberMEstimator, MEstimator, NoMEstimator,
};
pub use optimizer::{
    ConvergenceStatus, OptimizerStatus, RpropMethod, RpropOptimizer, RpropOptions,
};
pub use problem::Problem;
