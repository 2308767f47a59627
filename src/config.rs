use serde::Deserialize;

/// Top-level Kalmar configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct KalmarConfig {
    /// Global RNG seed.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Which variants run and how results are reported.
    #[serde(default)]
    pub analysis: AnalysisToml,

    /// Linear Kalman filter settings.
    #[serde(default)]
    pub linear: LinearToml,

    /// Adaptive filter settings.
    #[serde(default)]
    pub adaptive: AdaptiveToml,

    /// Ensemble settings.
    #[serde(default)]
    pub ensemble: EnsembleToml,

    /// Particle filter settings.
    #[serde(default)]
    pub particle: ParticleToml,

    /// Noise optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisToml {
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_transform")]
    pub transform: String,
}

impl Default for AnalysisToml {
    fn default() -> Self {
        Self {
            variants: default_variants(),
            horizon: default_horizon(),
            confidence: default_confidence(),
            transform: default_transform(),
        }
    }
}

fn default_variants() -> Vec<String> {
    ["linear", "adaptive", "ensemble"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_horizon() -> usize {
    30
}
fn default_confidence() -> f64 {
    0.95
}
fn default_transform() -> String {
    "log".to_string()
}
fn default_true() -> bool {
    true
}
fn default_family() -> String {
    "local_level".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearToml {
    #[serde(default = "default_linear_families")]
    pub families: Vec<String>,
    /// Optimise starting noise for linear, adaptive and particle candidates.
    #[serde(default = "default_true")]
    pub optimize: bool,
}

impl Default for LinearToml {
    fn default() -> Self {
        Self {
            families: default_linear_families(),
            optimize: true,
        }
    }
}

fn default_linear_families() -> Vec<String> {
    vec!["local_level".to_string(), "local_trend".to_string()]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveToml {
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default = "default_policies")]
    pub policies: Vec<String>,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_forgetting_factor")]
    pub forgetting_factor: f64,
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,
    #[serde(default)]
    pub adapt_process_noise: bool,
    #[serde(default = "default_changepoint_ratio")]
    pub changepoint_ratio: f64,
}

impl Default for AdaptiveToml {
    fn default() -> Self {
        Self {
            family: default_family(),
            policies: default_policies(),
            window: default_window(),
            forgetting_factor: default_forgetting_factor(),
            noise_floor: default_noise_floor(),
            adapt_process_noise: false,
            changepoint_ratio: default_changepoint_ratio(),
        }
    }
}

fn default_policies() -> Vec<String> {
    ["innovation", "likelihood", "variance"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_window() -> usize {
    20
}
fn default_forgetting_factor() -> f64 {
    0.95
}
fn default_noise_floor() -> f64 {
    1e-6
}
fn default_changepoint_ratio() -> f64 {
    2.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleToml {
    #[serde(default = "default_members")]
    pub members: Vec<String>,
    #[serde(default = "default_true")]
    pub optimize: bool,
}

impl Default for EnsembleToml {
    fn default() -> Self {
        Self {
            members: default_members(),
            optimize: true,
        }
    }
}

fn default_members() -> Vec<String> {
    ["local_level", "local_trend", "seasonal:12"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticleToml {
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default = "default_n_particles")]
    pub n_particles: usize,
    #[serde(default = "default_resample_threshold")]
    pub resample_threshold: f64,
    #[serde(default = "default_jitter_scale")]
    pub jitter_scale: f64,
}

impl Default for ParticleToml {
    fn default() -> Self {
        Self {
            family: default_family(),
            n_particles: default_n_particles(),
            resample_threshold: default_resample_threshold(),
            jitter_scale: default_jitter_scale(),
        }
    }
}

fn default_n_particles() -> usize {
    1000
}
fn default_resample_threshold() -> f64 {
    0.5
}
fn default_jitter_scale() -> f64 {
    0.1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerToml {
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: f64,
    #[serde(default = "default_n_starts")]
    pub n_starts: usize,
}

impl Default for OptimizerToml {
    fn default() -> Self {
        Self {
            lower_bound: default_lower_bound(),
            upper_bound: default_upper_bound(),
            max_iters: default_max_iters(),
            max_seconds: default_max_seconds(),
            n_starts: default_n_starts(),
        }
    }
}

fn default_lower_bound() -> f64 {
    1e-6
}
fn default_upper_bound() -> f64 {
    10.0
}
fn default_max_iters() -> u64 {
    500
}
fn default_max_seconds() -> f64 {
    10.0
}
fn default_n_starts() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: KalmarConfig = toml::from_str("").unwrap();
        assert!(config.seed.is_none());
        assert_eq!(config.analysis.variants, default_variants());
        assert_eq!(config.analysis.horizon, 30);
        assert_eq!(config.adaptive.window, 20);
        assert_eq!(config.ensemble.members.len(), 3);
        assert_eq!(config.particle.n_particles, 1000);
        assert_eq!(config.optimizer.max_iters, 500);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_str = r#"
            seed = 42

            [analysis]
            variants = ["linear", "particle"]
            transform = "none"

            [particle]
            n_particles = 500
        "#;
        let config: KalmarConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.analysis.variants, vec!["linear", "particle"]);
        assert_eq!(config.analysis.confidence, 0.95);
        assert_eq!(config.particle.n_particles, 500);
        assert_eq!(config.particle.resample_threshold, 0.5);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(toml::from_str::<KalmarConfig>("[analysis]\nhorizons = 3").is_err());
        assert!(toml::from_str::<KalmarConfig>("[kalman]\nx = 1").is_err());
    }
}
