//! Shipped config files load, validate and agree with the test defaults.

use aegis_core::{config::AegisConfig, error::AegisError};

#[test]
fn shipped_config_loads() {
    let loaded = AegisConfig::load("../data").expect("data/config loads");
    let defaults = AegisConfig::default_test();

    assert!((loaded.risk.weights.sum() - 1.0).abs() < 1e-9);
    assert_eq!(loaded.predictor.min_training_rows, defaults.predictor.min_training_rows);
    assert_eq!(loaded.predictor.elasticity_scenarios, defaults.predictor.elasticity_scenarios);
    assert_eq!(loaded.optimizer.step, defaults.optimizer.step);
    assert_eq!(loaded.optimizer.min_risk_index, defaults.optimizer.min_risk_index);
    assert_eq!(loaded.strategies.reserve_fraction, defaults.strategies.reserve_fraction);
    assert!(loaded.optimizer.time_limit_ms.is_some());
}

#[test]
fn missing_directory_is_an_error() {
    assert!(AegisConfig::load("./no-such-dir").is_err());
}

#[test]
fn weights_must_sum_to_one() {
    let mut config = AegisConfig::default_test();
    config.validate().expect("defaults are valid");

    config.risk.weights.retention_deficit += 0.1;
    assert!(matches!(config.validate(), Err(AegisError::InvalidConfig(_))));
}

#[test]
fn reserve_fraction_must_leave_a_general_pool() {
    let mut config = AegisConfig::default_test();
    config.strategies.reserve_fraction = 1.0;
    assert!(matches!(config.validate(), Err(AegisError::InvalidConfig(_))));
}
