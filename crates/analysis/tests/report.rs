use kalmar_analysis::{
    AnalysisConfig, AnalysisError, Analyzer, CandidateDetail, RiskTier, Transform, TrendDirection,
    Variant, VolatilityRegime, to_json,
};
use kalmar_filter::{EnsembleConfig, ModelFamily, OptimizerConfig, Series};
use kalmar_particle::ParticleConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Geometric random walk with drift, seeded.
fn random_walk_prices(n: usize, drift: f64, vol: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, vol).unwrap();
    let mut log_p = 100f64.ln();
    (0..n)
        .map(|_| {
            log_p += drift + normal.sample(&mut rng);
            log_p.exp()
        })
        .collect()
}

fn fast_optimizer() -> OptimizerConfig {
    OptimizerConfig::new().with_max_iters(150).with_n_starts(2)
}

#[test]
fn test_full_analysis_with_every_variant() {
    let series = Series::scalar(&random_walk_prices(120, 0.004, 0.01, 3)).unwrap();
    let config = AnalysisConfig::new()
        .with_variants(Variant::ALL.to_vec())
        .with_optimizer(fast_optimizer())
        .with_ensemble(EnsembleConfig::new().with_optimizer(fast_optimizer()))
        .with_particle(ParticleConfig::new().with_n_particles(300))
        .with_seed(Some(17))
        .with_horizon(20);
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();

    assert_eq!(report.candidates().len() + report.failures().len(), 7);
    assert!(report.comparison().rows().len() >= 1);
    let best = report.comparison().best();
    assert_eq!(report.comparison().by_aic()[0], best);
    assert_eq!(report.comparison().row(best).unwrap().aic_rank, 1);

    let forecast = report.insights().forecast.as_ref().unwrap();
    assert_eq!(forecast.short_term.horizon, 5);
    assert_eq!(forecast.medium_term.horizon, 15);
    assert_eq!(forecast.long_term.horizon, 20);
    assert!(forecast.long_term.expected_return_pct.is_some());

    if let Some(ensemble) = report.candidate("ensemble") {
        let CandidateDetail::Ensemble { weights, .. } = ensemble.detail() else {
            panic!("ensemble detail expected");
        };
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_upward_trend_is_detected() {
    // Strong drift with small noise: the local-trend slope must be positive.
    let series = Series::scalar(&random_walk_prices(150, 0.01, 0.002, 8)).unwrap();
    let config = AnalysisConfig::new()
        .with_variants(vec![Variant::Linear])
        .with_families(vec![ModelFamily::LocalTrend])
        .with_optimizer(fast_optimizer());
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
    let trend = report.insights().trend.as_ref().unwrap();
    assert_eq!(trend.direction, TrendDirection::Upward);
    assert!(trend.current_slope > 0.0);
}

#[test]
fn test_volatility_jump_reads_as_high_regime() {
    let mut values = random_walk_prices(140, 0.0, 0.002, 21);
    // Multiply the last 40 returns by 10.
    let base = values[99];
    let burst = random_walk_prices(40, 0.0, 0.02, 22);
    for (i, p) in burst.iter().enumerate() {
        values[100 + i] = base * p / 100.0;
    }
    let series = Series::scalar(&values).unwrap();
    let config = AnalysisConfig::new()
        .with_variants(vec![Variant::Adaptive])
        .with_optimizer(fast_optimizer());
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
    let innovation = report
        .insights()
        .volatility
        .iter()
        .find(|v| v.source == "adaptive_innovation")
        .unwrap();
    assert_eq!(innovation.regime, VolatilityRegime::High);
}

#[test]
fn test_identical_ensemble_members_are_low_risk() {
    let series = Series::scalar(&random_walk_prices(60, 0.0, 0.01, 5)).unwrap();
    let members = vec![
        kalmar_filter::StateSpaceModel::local_level(),
        kalmar_filter::StateSpaceModel::local_level(),
    ];
    let config = AnalysisConfig::new()
        .with_variants(vec![Variant::Ensemble])
        .with_ensemble(EnsembleConfig::new().with_members(members).with_optimize(false));
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
    assert_eq!(report.insights().risk.as_ref().unwrap().tier, RiskTier::Low);
}

#[test]
fn test_non_positive_prices_fail_under_log() {
    let series = Series::scalar(&[10.0, 11.0, -1.0]).unwrap();
    let err = Analyzer::new(AnalysisConfig::new())
        .unwrap()
        .analyze(&series)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NonPositiveForLog { index: 2, .. }));
}

#[test]
fn test_raw_returns_without_transform() {
    let returns: Vec<f64> = (0..50).map(|t| 0.01 * ((t as f64) * 1.3).sin()).collect();
    let series = Series::scalar(&returns).unwrap();
    let config = AnalysisConfig::new()
        .with_variants(vec![Variant::Linear])
        .with_transform(Transform::None)
        .with_optimize(false);
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
    let forecast = report.insights().forecast.as_ref().unwrap();
    assert!(forecast.short_term.expected_return_pct.is_none());
}

#[test]
fn test_report_json_contains_sections() {
    let series = Series::scalar(&random_walk_prices(50, 0.002, 0.01, 13)).unwrap();
    let config = AnalysisConfig::new()
        .with_optimize(false)
        .with_ensemble(EnsembleConfig::new().with_optimize(false))
        .with_horizon(10);
    let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
    let json = to_json(&report).unwrap();
    assert!(json.contains("\"transform\": \"log\""));
    assert!(json.contains("\"n_obs\": 50"));
    assert!(json.contains("\"best_model\""));
    assert!(json.contains("\"by_aic\""));
    assert!(json.contains("\"type\": \"adaptive\""));
    assert!(json.contains("\"policy\": \"likelihood\""));
    assert!(json.contains("\"horizon\": 10"));

    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let fitted = &value["candidates"][0]["fitted"][0];
    // Back on the price scale.
    let first = fitted[0].as_f64().unwrap();
    assert!(first > 50.0 && first < 200.0, "first fitted value {first}");
}
