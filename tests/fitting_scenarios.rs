//! Integration tests for model fitting across solvers and structures
//!
//! These tests drive `HmmProblem::fit` end to end and check the properties
//! every solver must keep: bounded, stochastic parameters, monotone objective
//! for line-search rules, honest termination reporting and component blocking.

use knowledge_hmm::{
    BlockFitting, FitConfig, HmmProblem, ParameterBounds, SequenceStore, SingleSkillMode,
    SliceStatus, Solver, SolverId, Structure,
};

/// Three skills practised by five students, with a learning trend: later
/// attempts are more often correct (symbol 0).
fn classroom() -> SequenceStore {
    let mut obs = Vec::new();
    let mut group = Vec::new();
    let mut skill = Vec::new();
    for g in 0..5usize {
        for t in 0..8usize {
            for k in 0..3usize {
                let threshold = if t < 3 { 3 } else { 1 };
                let wrong = (g * 7 + k * 3 + t * t) % 5 < threshold;
                obs.push(Some(usize::from(wrong)));
                group.push(g);
                skill.push(Some(k));
            }
        }
        // one unlabelled attempt per student
        obs.push(Some(g % 2));
        group.push(g);
        skill.push(None);
    }
    SequenceStore::from_columns(2, obs, group, skill).unwrap()
}

fn single_sequence(obs: &[usize]) -> SequenceStore {
    SequenceStore::from_columns(
        2,
        obs.iter().map(|&o| Some(o)).collect(),
        vec![0; obs.len()],
        vec![Some(0); obs.len()],
    )
    .unwrap()
}

fn assert_stochastic(problem: &HmmProblem) {
    for block in problem.blocks() {
        assert!(block.satisfies(problem.bounds()), "{:?}", block);
        assert!((block.pi().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for i in 0..block.n_states() {
            assert!((block.a().row(i).iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!((block.b().row(i).iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }
}

/// Test scenario: Baum-Welch on one short BKT sequence
///
/// With no bounds and zero tolerance, running one more EM iteration must never
/// make the objective worse.
#[test]
fn test_baum_welch_objective_trace_is_non_increasing() {
    let store = single_sequence(&[0, 0, 1, 0]);
    let mut trace = Vec::new();
    for max_iter in 1..=12 {
        let mut config = FitConfig::bkt();
        config.lower = vec![0.0; 10];
        config.upper = vec![1.0; 10];
        config.solver = Solver::BaumWelch;
        config.tol = 0.0;
        config.max_iter = max_iter;

        let mut problem = HmmProblem::new(config, &store).unwrap();
        let summary = problem.fit(&store);
        let result = summary.slice(0).unwrap();
        assert_eq!(result.iterations, max_iter);
        assert_eq!(result.status, SliceStatus::MaxIterations);
        assert!(!result.converged);
        assert_stochastic(&problem);
        trace.push(result.final_nll);
    }
    for w in trace.windows(2) {
        assert!(w[1] <= w[0] + 1e-10, "objective increased: {:?}", trace);
    }
}

/// Test scenario: PI is blocked, so only A and B may move
///
/// PI must hold its initial value after every iteration count, while A and B
/// are re-estimated from the first iteration on.
#[test]
fn test_blocked_component_keeps_initial_values() {
    let store = single_sequence(&[0, 0, 1, 0, 1, 0, 0]);
    for max_iter in 1..=8 {
        let mut config = FitConfig::bkt();
        config.lower = vec![0.0; 10];
        config.upper = vec![1.0; 10];
        config.solver = Solver::BaumWelch;
        config.tol = 0.0;
        config.max_iter = max_iter;
        config.block_fitting = BlockFitting {
            pi: true,
            ..BlockFitting::none()
        };
        let initial = config.initial_block().unwrap();

        let mut problem = HmmProblem::new(config, &store).unwrap();
        problem.fit(&store);
        let fitted = problem.block(0).unwrap();
        assert_eq!(fitted.pi(), initial.pi(), "PI moved after {} iterations", max_iter);
        assert_ne!(fitted.a(), initial.a(), "A frozen after {} iterations", max_iter);
        assert_ne!(fitted.b(), initial.b(), "B frozen after {} iterations", max_iter);
    }
}

/// Test scenario: every solver on both structures terminates within the cap
/// and reports its termination honestly.
#[test]
fn test_every_solver_terminates_and_stays_feasible() {
    let store = classroom();
    let ids = [
        "1.1", "1.2", "1.3.1", "1.3.2", "1.3.3", "1.4", "1.5", "2.1", "2.2", "2.3", "2.4", "2.5",
    ];
    for id in ids {
        let mut config = FitConfig::bkt().with_solver_id(id).unwrap();
        config.max_iter = 25;
        let gradient_rule = config.solver.uses_gradient();

        let mut problem = HmmProblem::new(config, &store).unwrap();
        let summary = problem.fit(&store);
        assert!(summary.total_nll.is_finite(), "{}", id);
        assert!(summary.skipped.is_empty(), "{}", id);
        for report in &summary.slices {
            let r = &report.result;
            assert!(r.iterations >= 1 && r.iterations <= 25, "{}: {:?}", id, r);
            assert_eq!(r.converged, r.status == SliceStatus::Converged, "{}", id);
            if gradient_rule {
                assert!(r.final_nll <= r.initial_nll + 1e-9, "{}: {:?}", id, r);
            }
        }
        assert_stochastic(&problem);
    }
}

/// Test scenario: projected gradient descent never accepts an uphill step, so
/// allowing more iterations can only help.
#[test]
fn test_gradient_descent_more_iterations_never_hurt() {
    let store = classroom();
    let mut previous = f64::INFINITY;
    for max_iter in [1, 2, 4, 8, 16] {
        let mut config = FitConfig::bkt();
        config.solver = Solver::GradientDescent;
        config.tol = 0.0;
        config.max_iter = max_iter;
        let mut problem = HmmProblem::new(config, &store).unwrap();
        let total = problem.fit(&store).total_nll;
        assert!(total <= previous + 1e-9, "{} after {} iterations, was {}", total, max_iter, previous);
        previous = total;
    }
}

/// Test scenario: blocking a group removes it from fitting and from the
/// null-skill likelihood.
#[test]
fn test_blocked_group_is_excluded() {
    let mut store = classroom();
    let config = FitConfig::bkt().with_solver_id("2.2").unwrap();

    store.block_group(3);
    let mut problem = HmmProblem::new(config, &store).unwrap();
    let summary = problem.fit(&store);
    assert_eq!(summary.skipped, vec![3]);
    assert_eq!(problem.block(3), Some(&FitConfig::bkt().initial_block().unwrap()));
    store.unblock_group(3);
    assert!(store.sequences().iter().all(|s| !s.is_blocked()));
}

/// Test scenario: a forced single-skill fit shares one block across skills
#[test]
fn test_forced_single_skill_shares_parameters() {
    let store = classroom();
    let mut config = FitConfig::bkt();
    config.single_skill = SingleSkillMode::Force;
    let mut problem = HmmProblem::new(config, &store).unwrap();
    let summary = problem.fit(&store);

    assert!(summary.pooled.is_some());
    assert!(summary.slices.is_empty());
    let first = problem.block(0).unwrap();
    assert!(problem.blocks().iter().all(|b| b == first));
}

/// Test scenario: a larger, unconstrained model with three observation symbols
#[test]
fn test_three_state_model_fits() {
    let obs = [0, 1, 2, 2, 1, 0, 0, 2, 1, 1, 2, 0];
    let store = SequenceStore::from_columns(
        3,
        obs.iter().map(|&o| Some(o)).collect(),
        vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1],
        vec![Some(0); 12],
    )
    .unwrap();
    let mut config = FitConfig::unbounded(3, 3);
    config.solver = Solver::ConjugateGradient(Default::default());
    config.max_iter = 30;
    let mut problem = HmmProblem::new(config, &store).unwrap();
    let summary = problem.fit(&store);
    let r = summary.slice(0).unwrap();
    assert!(r.final_nll <= r.initial_nll + 1e-9);
    assert_eq!(problem.bounds(), &ParameterBounds::unbounded(3, 3));
    assert_stochastic(&problem);
}

#[test]
fn test_solver_id_round_trip() {
    for text in ["1.1", "1.2", "1.3.1", "2.3.3", "2.5"] {
        let id: SolverId = text.parse().unwrap();
        assert_eq!(id.to_string(), text);
    }
    let id: SolverId = "2.4".parse().unwrap();
    assert_eq!(id.structure, Structure::ByGroup);
    assert_eq!(id.solver, Solver::GradientDescentLagrange);
}

#[cfg(feature = "serde")]
#[test]
fn test_config_serde_round_trip() {
    let config = FitConfig::bkt().with_solver_id("1.3.2").unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let back: FitConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
