//! Integration tests for the group-stratified cross-validation workflow

use knowledge_hmm::{
    cross_validate, CrossValidationConfig, FitConfig, HmmError, SequenceStore, Structure,
};

/// Six students, two skills, a handful of null-skill rows
fn store() -> SequenceStore {
    let mut obs = Vec::new();
    let mut group = Vec::new();
    let mut skill = Vec::new();
    for g in 0..6usize {
        for t in 0..6usize {
            let k = t % 2;
            let correct = t >= 2 || (g + t) % 3 == 0;
            obs.push(Some(if correct { 0 } else { 1 }));
            group.push(g);
            skill.push(Some(k));
        }
        if g % 2 == 0 {
            obs.push(Some(g % 4 / 2));
            group.push(g);
            skill.push(None);
        }
    }
    SequenceStore::from_columns(2, obs, group, skill).unwrap()
}

/// Test scenario: seeded cross-validation is reproducible and leaves the
/// store unblocked
#[test]
fn test_seeded_cross_validation_is_reproducible() {
    let mut store = store();
    let mut config = FitConfig::bkt();
    config.max_iter = 30;
    let cv = CrossValidationConfig {
        folds: 3,
        seed: Some(2024),
    };

    let first = cross_validate(&config, &mut store, &cv).unwrap();
    let second = cross_validate(&config, &mut store, &cv).unwrap();
    assert_eq!(first, second);

    assert!(store.sequences().iter().all(|s| !s.is_blocked()));
    assert!((0..store.n_groups()).all(|g| !store.is_null_blocked(g)));

    assert_eq!(first.metrics.n_rows, store.n_rows());
    assert_eq!(first.metrics.n_null_rows, 3);
    assert_eq!(first.metrics.n_parameters, 8.0);
    assert!(first.metrics.as_array().iter().all(|v| v.is_finite()));
    assert!(first.metrics.rmse > 0.0 && first.metrics.rmse < 1.0);
}

/// Test scenario: every group is held out exactly once
#[test]
fn test_folds_partition_groups() {
    let mut store = store();
    let cv = CrossValidationConfig {
        folds: 4,
        seed: Some(9),
    };
    let result = cross_validate(&FitConfig::bkt(), &mut store, &cv).unwrap();

    let mut held_out: Vec<usize> = result.folds.iter().flat_map(|f| f.groups.iter().copied()).collect();
    held_out.sort_unstable();
    assert_eq!(held_out, (0..6).collect::<Vec<_>>());
    assert!(result.folds.iter().all(|f| !f.groups.is_empty()));
}

/// Test scenario: with one block per group, the held-out groups are exactly
/// the slices a fold skips
#[test]
fn test_by_group_folds_skip_held_out_groups() {
    let mut store = store();
    let mut config = FitConfig::bkt();
    config.structure = Structure::ByGroup;
    let cv = CrossValidationConfig {
        folds: 2,
        seed: Some(5),
    };
    let result = cross_validate(&config, &mut store, &cv).unwrap();
    for fold in &result.folds {
        assert_eq!(fold.summary.skipped, fold.groups);
        assert_eq!(fold.summary.slices.len(), 6 - fold.groups.len());
    }
}

#[test]
fn test_invalid_fold_counts() {
    let mut store = store();
    let config = FitConfig::bkt();
    let too_few = CrossValidationConfig {
        folds: 1,
        seed: None,
    };
    assert!(matches!(
        cross_validate(&config, &mut store, &too_few),
        Err(HmmError::InsufficientData { required: 2, actual: 1 })
    ));
    let too_many = CrossValidationConfig {
        folds: 7,
        seed: None,
    };
    assert!(matches!(
        cross_validate(&config, &mut store, &too_many),
        Err(HmmError::InsufficientData { required: 7, actual: 6 })
    ));
}
