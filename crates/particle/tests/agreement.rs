use kalmar_filter::{LinearKalmanFilter, Series, StateEstimator, StateSpaceModel};
use kalmar_particle::{
    LinearGaussian, ParticleConfig, ParticleFilter, StochasticVolatility, effective_sample_size,
};

/// Deterministic pseudo-noise so the fixture does not depend on an RNG.
fn wobbly_prices(n: usize) -> Vec<f64> {
    (0..n)
        .map(|t| {
            let t = t as f64;
            100.0 + 0.05 * t + 1.5 * (0.7 * t).sin() + 0.8 * (2.3 * t).cos()
        })
        .collect()
}

#[test]
fn test_particle_matches_kalman_on_linear_gaussian() {
    let series = Series::scalar(&wobbly_prices(60)).unwrap();
    let model = StateSpaceModel::local_level();

    let kalman = LinearKalmanFilter::new(model.clone()).fit(&series).unwrap();

    let config = ParticleConfig::new().with_n_particles(1000).with_seed(Some(42));
    let mut pf = ParticleFilter::new(LinearGaussian::new(model).unwrap(), config).unwrap();
    let particle = pf.fit_particles(&series).unwrap();

    for t in 0..series.len() {
        let k = kalman.fitted()[[t, 0]];
        let p = particle.result().fitted()[[t, 0]];
        assert!(
            (p - k).abs() <= 0.05 * k.abs(),
            "step {t}: particle {p} vs kalman {k}"
        );
    }
    let ll_k = kalman.log_likelihood();
    let ll_p = particle.result().log_likelihood();
    assert!((ll_p - ll_k).abs() < 0.05 * ll_k.abs(), "{ll_p} vs {ll_k}");
}

#[test]
fn test_seeded_runs_are_identical() {
    let series = Series::scalar(&wobbly_prices(30)).unwrap();
    let run = || {
        let config = ParticleConfig::new().with_n_particles(256).with_seed(Some(9));
        let model = LinearGaussian::new(StateSpaceModel::local_trend()).unwrap();
        ParticleFilter::new(model, config)
            .unwrap()
            .fit_particles(&series)
            .unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.result().fitted(), b.result().fitted());
    assert_eq!(a.resampling_steps(), b.resampling_steps());
    assert_eq!(a.ess(), b.ess());
}

#[test]
fn test_ess_bounds_and_resampling_resets() {
    let series = Series::scalar(&wobbly_prices(40)).unwrap();
    let config = ParticleConfig::new()
        .with_n_particles(500)
        .with_resample_threshold(0.9)
        .with_seed(Some(1));
    let model = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
    let mut pf = ParticleFilter::new(model, config).unwrap();
    let out = pf.fit_particles(&series).unwrap();
    assert!(out.ess().iter().all(|&e| (1.0 - 1e-9..=500.0 + 1e-6).contains(&e)));
    assert!(!out.resampling_steps().is_empty());
    let uniform = vec![1.0 / 500.0; 500];
    assert!((effective_sample_size(&uniform) - 500.0).abs() < 1e-6);
}

#[test]
fn test_bands_bracket_fitted_values() {
    let series = Series::scalar(&wobbly_prices(25)).unwrap();
    let config = ParticleConfig::new().with_n_particles(400).with_seed(Some(5));
    let model = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
    let mut pf = ParticleFilter::new(model, config).unwrap();
    let result = StateEstimator::fit(&mut pf, &series).unwrap();
    let bands = result.bands();
    for t in 0..series.len() {
        assert!(bands.lower()[[t, 0]] <= result.fitted()[[t, 0]] + 1e-9);
        assert!(bands.upper()[[t, 0]] >= result.fitted()[[t, 0]] - 1e-9);
    }
    assert_eq!(result.name(), "particle");
    assert_eq!(StateEstimator::forecast(&pf, 4).unwrap().horizon(), 4);
}

#[test]
fn test_stochastic_volatility_tracks_variance_regime() {
    // Calm returns then a burst of ±3 moves.
    let returns: Vec<f64> = (0..80)
        .map(|t| {
            let sign = if t % 2 == 0 { 1.0 } else { -1.0 };
            if t < 50 { 0.1 * sign } else { 3.0 * sign }
        })
        .collect();
    let series = Series::scalar(&returns).unwrap();
    let sv = StochasticVolatility::new(-2.0, 0.95, 0.3).unwrap();
    let config = ParticleConfig::new().with_n_particles(800).with_seed(Some(11));
    let mut pf = ParticleFilter::new(sv, config).unwrap();
    let out = pf.fit_particles(&series).unwrap();
    let h = |t: usize| out.result().filtered_states()[t].mean()[0];
    assert!(h(79) > h(49) + 1.0, "h[49] = {}, h[79] = {}", h(49), h(79));
    assert!(out.result().log_likelihood().is_finite());
}
