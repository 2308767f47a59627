//! Analyze command: fit every configured filter and write a JSON report.

use anyhow::{Context, Result};
use tracing::{info, info_span, warn};

use kalmar_analysis::{Analyzer, to_json};

use crate::cli::AnalyzeArgs;
use crate::config::KalmarConfig;
use crate::convert;
use crate::input;

/// Run the analysis pipeline.
pub fn run(args: AnalyzeArgs) -> Result<()> {
    let _cmd = info_span!("analyze").entered();

    // 1. Load TOML, or fall back to defaults
    let config: KalmarConfig = match &args.config {
        Some(path) => {
            let toml_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&toml_str).context("failed to parse TOML config")?
        }
        None => KalmarConfig::default(),
    };
    let analysis_cfg = convert::build_analysis_config(&config, args.seed, args.horizon)?;

    // 2. Read series
    info!(path = %args.input.display(), "reading series");
    let series = input::read_series(&args.input)?;
    info!(n_obs = series.len(), "series loaded");

    // 3. Run analysis
    let analyzer = Analyzer::new(analysis_cfg).context("invalid analysis configuration")?;
    let report = analyzer.analyze(&series).context("analysis failed")?;
    for failure in report.failures() {
        warn!(candidate = %failure.name, kind = %failure.kind, "{}", failure.message);
    }
    for candidate in report.candidates() {
        for warning in candidate.warnings() {
            warn!(candidate = candidate.name(), "{warning}");
        }
    }
    info!(best = report.comparison().best(), "analysis complete");

    // 4. Write report JSON
    let json = to_json(&report).context("failed to serialise report")?;
    let report_path = args
        .output
        .unwrap_or_else(|| args.input.with_extension("report.json"));
    std::fs::write(&report_path, &json)
        .with_context(|| format!("failed to write report: {}", report_path.display()))?;
    info!(path = %report_path.display(), "report written");

    Ok(())
}
