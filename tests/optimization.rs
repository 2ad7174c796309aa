//! End-to-end Rprop optimization scenarios covering all four variants, the
//! convergence criteria, robust reweighting and the regularizer.

use std::sync::Arc;

use nalgebra::Vector3;

use tangent_solver::{
    CauchyMEstimator, ConvergenceStatus, DesignVariable, ErrorTerm, EuclideanExpression,
    EuclideanPoint, ExpressionErrorTerm, Problem, RotationQuaternion, RpropMethod, RpropOptimizer,
    RpropOptions, Scalar,
};

fn scalar_problem(value: f64, target: f64) -> (Arc<Scalar>, Problem) {
    let x = Arc::new(Scalar::new(value));
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
        x.to_expression() - target,
    ))));
    (x, problem)
}

#[test]
fn rprop_minus_converges_on_the_canonical_scalar_problem() {
    // (x - 5) from x = 0 under RPROP_MINUS
    let (x, problem) = scalar_problem(0.0, 5.0);
    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_delta(0.1, 1e-12, 5.0)
        .with_convergence(0.0, 1e-6, 0.0);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize().clone();

    assert_eq!(status.convergence, ConvergenceStatus::DeltaX);
    assert!(status.success());
    assert!(
        (x.value() - 5.0).abs() < 1e-3,
        "converged to {} instead of 5",
        x.value()
    );
    assert!(status.num_iterations > 1);
    assert_eq!(status.num_jacobian_evaluations, status.num_iterations);
    // only IRPROP+ evaluates the objective
    assert_eq!(status.num_error_evaluations, 0);
}

#[test]
fn gradient_norm_convergence_fires_on_the_first_iteration() {
    // already at the optimum: the true gradient norm is zero
    let (_x, problem) = scalar_problem(5.0, 5.0);
    let options = RpropOptions::default(); // convergence_gradient_norm = 1e-3
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();

    assert_eq!(status.convergence, ConvergenceStatus::GradientNorm);
    assert_eq!(status.num_iterations, 1);
}

#[test]
fn step_sizes_adapt_by_eta_factors_after_one_sign_switch() {
    // x overshoots its nearby target and switches sign; y keeps marching
    let x = Arc::new(Scalar::new(0.0));
    let y = Arc::new(Scalar::new(0.0));
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
        x.to_expression() - 0.5,
    ))));
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
        y.to_expression() - 10.0,
    ))));

    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_eta(0.5, 1.2)
        .with_delta(1.0, 1e-12, 5.0)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(2);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize().clone();

    assert_eq!(status.convergence, ConvergenceStatus::MaxIterations);
    assert_eq!(status.num_iterations, 2);
    // switched dimension shrank by etaMinus, held dimension grew by etaPlus
    assert!((optimizer.delta()[0] - 0.5).abs() < 1e-12);
    assert!((optimizer.delta()[1] - 1.2).abs() < 1e-12);
}

#[test]
fn rprop_plus_reverts_the_previous_step_on_a_switch() {
    let (x, problem) = scalar_problem(0.0, 0.5);
    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropPlus)
        .with_eta(0.5, 1.2)
        .with_delta(1.0, 1e-12, 5.0)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(3);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    optimizer.optimize();

    // it1: step +1 to x=1; it2: switch, revert to x=0; it3: neutral, +0.5
    assert!((x.value() - 0.5).abs() < 1e-12, "x = {}", x.value());
}

#[test]
fn irprop_minus_holds_position_on_a_switch() {
    let (x, problem) = scalar_problem(0.0, 0.5);
    let options = RpropOptions::default()
        .with_method(RpropMethod::IRpropMinus)
        .with_eta(0.5, 1.2)
        .with_delta(1.0, 1e-12, 5.0)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(3);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    optimizer.optimize();

    // it1: +1 to x=1; it2: switch, hold; it3: -0.5 back to the optimum
    assert!((x.value() - 0.5).abs() < 1e-12, "x = {}", x.value());
}

#[test]
fn irprop_plus_reverts_only_when_the_objective_increased() {
    // a huge first step makes the objective explode; IRPROP+ undoes it
    let (x, problem) = scalar_problem(0.4, 0.5);
    let options = RpropOptions::default()
        .with_method(RpropMethod::IRpropPlus)
        .with_eta(0.5, 1.2)
        .with_delta(10.0, 1e-12, 20.0)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(2);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize().clone();

    // it1: 0.4 -> 10.4; it2: sign switch and the error increased -> revert
    assert!((x.value() - 0.4).abs() < 1e-12, "x = {}", x.value());
    assert_eq!(status.num_error_evaluations, 2);
}

#[test]
fn irprop_plus_takes_a_zero_step_when_the_objective_did_not_increase() {
    let (x, problem) = scalar_problem(0.0, 0.5);
    let options = RpropOptions::default()
        .with_method(RpropMethod::IRpropPlus)
        .with_eta(0.5, 1.2)
        .with_delta(1.0, 1e-12, 5.0)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(3);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize().clone();

    // it2 switches but the objective stayed flat, so the step is zero;
    // it3 then walks to the optimum with the shrunk delta
    assert!((x.value() - 0.5).abs() < 1e-12, "x = {}", x.value());
    assert_eq!(status.num_error_evaluations, 3);
}

#[test]
fn irprop_plus_delta_objective_convergence() {
    let (_x, problem) = scalar_problem(0.0, 0.5);
    let options = RpropOptions::default()
        .with_method(RpropMethod::IRpropPlus)
        .with_eta(0.5, 1.2)
        .with_delta(1.0, 1e-12, 5.0)
        // stop as soon as the objective stalls between iterations
        .with_convergence(1e-12, 0.0, 1e-9)
        .with_max_iterations(50);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();

    // it1 steps 0 -> 1; the error is 0.25 on both evaluations
    assert_eq!(status.convergence, ConvergenceStatus::DeltaObjective);
    assert_eq!(status.num_iterations, 2);
}

#[test]
fn max_iterations_is_reported_as_a_status() {
    let (_x, problem) = scalar_problem(0.0, 100.0);
    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_convergence(1e-12, 0.0, 0.0)
        .with_max_iterations(3);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();

    assert_eq!(status.convergence, ConvergenceStatus::MaxIterations);
    assert_eq!(status.num_iterations, 3);
    assert!(!status.success());
    assert!(!status.failure());
}

#[test]
fn reset_allows_a_second_run_from_scratch() {
    let (x, problem) = scalar_problem(0.0, 5.0);
    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_convergence(0.0, 1e-6, 0.0);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    optimizer.optimize();
    let first_iterations = optimizer.status().num_iterations;
    assert!((x.value() - 5.0).abs() < 1e-3);

    // move the variable away and run again
    x.set_parameters(&[-3.0]);
    optimizer.reset();
    assert_eq!(optimizer.status().num_iterations, 0);
    let status = optimizer.optimize();
    assert!(status.success());
    assert!((x.value() - 5.0).abs() < 1e-3);
    assert!(first_iterations > 0);
}

#[test]
fn regularizer_gradient_shifts_the_optimum() {
    // objective (x-5)² plus regularizer x²: the stationary point is 2.5
    let x = Arc::new(Scalar::new(0.0));
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
        x.to_expression() - 5.0,
    ))));

    let regularizer = x.to_expression() * x.to_expression();
    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_convergence(0.0, 1e-7, 0.0)
        .with_regularizer(regularizer);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();

    assert!(status.success());
    assert!(
        (x.value() - 2.5).abs() < 1e-3,
        "regularized optimum at {}, expected 2.5",
        x.value()
    );
}

#[test]
fn cauchy_reweighting_suppresses_an_outlier_term() {
    let x = Arc::new(Scalar::new(10.0));
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
        x.to_expression(),
    ))));
    let outlier = ExpressionErrorTerm::new(Box::new(x.to_expression() - 100.0))
        .with_m_estimator(Box::new(CauchyMEstimator::new(1.0).unwrap()));
    problem.add_error_term(Box::new(outlier));

    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_convergence(0.0, 1e-7, 0.0);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    optimizer.optimize();

    // without reweighting the minimum sits at 50; the robust problem pulls
    // x almost all the way to the inlier target
    assert!(
        x.value().abs() < 1.0,
        "robust optimum at {}, outlier not suppressed",
        x.value()
    );
}

#[test]
fn multithreaded_aggregation_reaches_the_same_optimum() {
    let build = |threads: usize| {
        let x = Arc::new(Scalar::new(0.0));
        let mut problem = Problem::new();
        for target in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0] {
            problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(
                x.to_expression() - target,
            ))));
        }
        let mut options = RpropOptions::default()
            .with_method(RpropMethod::RpropMinus)
            .with_convergence(0.0, 1e-7, 0.0);
        options.num_threads_jacobian = threads;
        options.num_threads_error = threads;
        let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
        optimizer.optimize();
        x.value()
    };

    let sequential = build(1);
    let threaded = build(4);
    assert!((sequential - threaded).abs() < 1e-9);
    assert!((sequential - 4.5).abs() < 1e-3);
}

#[test]
fn rotation_alignment_end_to_end() {
    // find a rotation mapping e_x onto e_y
    let q = Arc::new(RotationQuaternion::identity());
    let residual = q
        .to_expression()
        .rotate(&EuclideanExpression::constant(Vector3::x()))
        - Vector3::y();
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(residual))));

    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_delta(0.1, 1e-12, 0.5)
        .with_convergence(0.0, 1e-8, 0.0)
        .with_max_iterations(2000);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();
    assert!(status.success(), "status: {}", status);

    let aligned = q.rotation_matrix() * Vector3::x();
    assert!(
        (aligned - Vector3::y()).norm() < 1e-2,
        "rotation maps e_x to {aligned}"
    );
}

#[test]
fn pose_graph_translation_end_to_end() {
    // two poses and a relative translation measurement, first pose held fixed
    let t0 = Arc::new(EuclideanPoint::new(Vector3::zeros()));
    let t1 = Arc::new(EuclideanPoint::new(Vector3::new(4.0, -1.0, 2.0)));
    let t0_dv: Arc<dyn tangent_solver::DesignVariable> = t0.clone();
    t0_dv.set_active(false);

    let measured = Vector3::new(1.0, 2.0, 3.0);
    let residual = t1.to_expression() - t0.to_expression() - measured;
    let mut problem = Problem::new();
    problem.add_error_term(Box::new(ExpressionErrorTerm::new(Box::new(residual))));

    let options = RpropOptions::default()
        .with_method(RpropMethod::RpropMinus)
        .with_convergence(0.0, 1e-7, 0.0);
    let mut optimizer = RpropOptimizer::new(problem, options).unwrap();
    let status = optimizer.optimize();

    assert!(status.success());
    assert!((t1.value() - measured).norm() < 1e-3);
    // the fixed pose never moved
    assert_eq!(t0.value(), Vector3::zeros());
}

#[test]
fn design_variable_update_revert_roundtrip() {
    let p = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 2.0, 3.0)));
    let before = p.value();
    p.update(&[0.25, -0.5, 0.125]);
    p.revert();
    assert_eq!(p.value(), before);
    // a second revert without an update is a no-op
    p.revert();
    assert_eq!(p.value(), before);
}

#[test]
fn error_term_accessors_expose_raw_and_weighted_values() {
    let x = Arc::new(Scalar::new(4.0));
    let mut term = ExpressionErrorTerm::new(Box::new(x.to_expression()))
        .with_m_estimator(Box::new(CauchyMEstimator::new(2.0).unwrap()));
    let raw = term.update_raw_squared_error();
    assert!((raw - 16.0).abs() < 1e-12);

    let weight = term.current_m_estimator_weight();
    assert!((term.weighted_squared_error() - weight * 16.0).abs() < 1e-12);
    assert!((term.squared_error(false) - 16.0).abs() < 1e-12);
    // the effective squared error returned by evaluate_error is weighted
    assert!((term.evaluate_error() - weight * 16.0).abs() < 1e-12);
}
