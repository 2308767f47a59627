//! JSON series input.
//!
//! Accepted shapes:
//!
//! ```json
//! [100.0, 101.5, 99.8]
//! {"values": [100.0, 101.5], "timestamps": ["2024-01-02", "2024-01-03"]}
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use kalmar_filter::Series;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeriesFile {
    Values(Vec<f64>),
    Object(SeriesObject),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeriesObject {
    values: Vec<f64>,
    #[serde(default)]
    timestamps: Option<Vec<String>>,
}

/// Parses a timestamp as `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d %H:%M:%S` or a
/// bare `%Y-%m-%d` date (midnight).
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ts);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("unrecognised timestamp {s:?}"))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(ts) => Ok(ts),
        None => bail!("unrecognised timestamp {s:?}"),
    }
}

/// Parses a series from JSON text.
pub fn parse_series(json: &str) -> Result<Series> {
    let file: SeriesFile = serde_json::from_str(json)
        .context("input must be a JSON array of numbers or an object with \"values\"")?;
    match file {
        SeriesFile::Values(values) => Series::scalar(&values).context("invalid series"),
        SeriesFile::Object(obj) => {
            let series = Series::scalar(&obj.values).context("invalid series")?;
            match obj.timestamps {
                None => Ok(series),
                Some(raw) => {
                    let timestamps = raw
                        .iter()
                        .map(|s| parse_timestamp(s))
                        .collect::<Result<Vec<_>>>()?;
                    series
                        .with_timestamps(timestamps)
                        .context("invalid timestamps")
                }
            }
        }
    }
}

/// Reads and parses a series file.
pub fn read_series(path: &Path) -> Result<Series> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    parse_series(&text).with_context(|| format!("failed to parse input: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let series = parse_series("[1.0, 2.5, 3]").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.row(1)[0], 2.5);
        assert!(series.timestamps().is_none());
    }

    #[test]
    fn test_parse_object_with_timestamps() {
        let json = r#"{"values": [10, 11], "timestamps": ["2024-01-02", "2024-01-03T09:30:00"]}"#;
        let series = parse_series(json).unwrap();
        let ts = series.timestamps().unwrap();
        assert_eq!(ts[0].to_string(), "2024-01-02 00:00:00");
        assert_eq!(ts[1].to_string(), "2024-01-03 09:30:00");
    }

    #[test]
    fn test_parse_object_without_timestamps() {
        let series = parse_series(r#"{"values": [1, 2, 3]}"#).unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_series("[]").is_err());
        assert!(parse_series(r#"{"value": [1]}"#).is_err());
        assert!(parse_series(r#"{"values": [1, 2], "timestamps": ["2024-01-01"]}"#).is_err());
        assert!(parse_series(r#"{"values": [1, 2], "timestamps": ["2024-01-02", "2024-01-01"]}"#).is_err());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
