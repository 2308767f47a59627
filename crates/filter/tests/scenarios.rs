use approx::assert_abs_diff_eq;
use kalmar_filter::{
    AdaptationPolicy, AdaptiveConfig, AdaptiveKalmanFilter, EnsembleConfig, EnsembleFilter,
    LinearKalmanFilter, OptimizerConfig, ParameterOptimizer, Series, StateEstimator,
    StateSpaceModel,
};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

#[test]
fn test_price_scenario_tracks_last_value() {
    let series = Series::scalar(&[100.0, 101.0, 99.0, 102.0, 98.0, 103.0]).unwrap();
    let result = LinearKalmanFilter::new(StateSpaceModel::local_level())
        .fit(&series)
        .unwrap();
    assert_eq!(result.fitted()[[0, 0]], 100.0);
    assert!((result.fitted()[[5, 0]] - 103.0).abs() < 3.0);
    assert_eq!(result.residuals()[[0, 0]], 0.0);
    assert!(result.aic().is_finite() && result.bic().is_finite());
}

#[test]
fn test_constant_series_converges_and_noise_vanishes() {
    let series = Series::scalar(&[42.0; 150]).unwrap();
    let model = StateSpaceModel::local_level();

    let outcome = ParameterOptimizer::new(OptimizerConfig::default())
        .unwrap()
        .optimize(&model, &series)
        .unwrap();
    let r = outcome.model().observation_noise()[[0, 0]];
    assert!(r < 1e-3, "R = {r}");

    let result = LinearKalmanFilter::new(outcome.into_model())
        .fit(&series)
        .unwrap();
    assert_abs_diff_eq!(result.fitted()[[149, 0]], 42.0, epsilon = 1e-9);
}

#[test]
fn test_adaptive_reacts_to_volatility_jump() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(2024);
    let calm = Normal::new(0.0, 1.0).unwrap();
    let wild = Normal::new(0.0, 10.0).unwrap();
    let jump_at = 80;
    let values: Vec<f64> = (0..jump_at + 20)
        .map(|t| {
            let noise = if t < jump_at {
                calm.sample(&mut rng)
            } else {
                wild.sample(&mut rng)
            };
            100.0 + noise
        })
        .collect();
    let series = Series::scalar(&values).unwrap();

    let mut akf =
        AdaptiveKalmanFilter::new(StateSpaceModel::local_level(), AdaptiveConfig::new()).unwrap();
    let out = akf.fit_adaptive(&series).unwrap();
    let before = out.observation_noise()[jump_at];
    let after = out.observation_noise()[jump_at + 19];
    assert!(after > 3.0 * before, "R went from {before} to {after}");
    assert!(out.changepoints().iter().any(|&t| t > jump_at));
}

#[test]
fn test_every_adaptive_policy_runs_through_trait() {
    let values: Vec<f64> = (0..60).map(|t| 10.0 + (t as f64 * 0.3).sin()).collect();
    let series = Series::scalar(&values).unwrap();
    for policy in AdaptationPolicy::ALL {
        let config = AdaptiveConfig::new().with_policy(policy);
        let mut akf = AdaptiveKalmanFilter::new(StateSpaceModel::local_trend(), config).unwrap();
        let result = StateEstimator::fit(&mut akf, &series).unwrap();
        assert_eq!(result.name(), format!("adaptive_{}", policy.name()));
        assert_eq!(StateEstimator::forecast(&akf, 5).unwrap().horizon(), 5);
    }
}

#[test]
fn test_ensemble_weights_sum_to_one_with_optimisation() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let values: Vec<f64> = (0..120)
        .map(|t| 20.0 + 0.1 * t as f64 + noise.sample(&mut rng))
        .collect();
    let series = Series::scalar(&values).unwrap();
    let config = EnsembleConfig::new().with_optimizer(OptimizerConfig::new().with_max_iters(100));
    let mut ens = EnsembleFilter::new(config).unwrap();
    let out = ens.fit_ensemble(&series).unwrap();
    assert_eq!(out.members().len(), 3);
    assert_abs_diff_eq!(out.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    assert!(out.members().iter().all(|m| m.error().is_none()));
    assert_eq!(out.result().name(), "ensemble");
    assert_eq!(ens.forecast(10).unwrap().horizon(), 10);
}

#[test]
fn test_estimator_trait_drives_generic_code() {
    fn fit_and_forecast<E: StateEstimator>(e: &mut E, s: &Series) -> usize {
        e.fit(s).ok();
        e.forecast(3).map(|f| f.horizon()).unwrap_or(0)
    }
    let series = Series::scalar(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_trend());
    assert_eq!(fit_and_forecast(&mut kf, &series), 3);
}
