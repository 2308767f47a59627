//! Validated observation series.

use chrono::NaiveDateTime;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::FilterError;

/// An ordered series of scalar or vector observations.
///
/// Rows are time steps, columns are observation components. The values are
/// guaranteed non-empty and finite; timestamps, when present, are aligned
/// one-to-one with rows and strictly increasing.
///
/// # Example
///
/// ```
/// use kalmar_filter::Series;
///
/// let series = Series::scalar(&[100.0, 101.0, 99.5]).unwrap();
/// assert_eq!(series.len(), 3);
/// assert_eq!(series.dim(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    values: Array2<f64>,
    timestamps: Option<Vec<NaiveDateTime>>,
}

impl Series {
    /// Builds a one-dimensional series.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `EmptyData` | `values` is empty |
    /// | `NonFiniteData` | any value is NaN or infinite |
    pub fn scalar(values: &[f64]) -> Result<Self, FilterError> {
        let n = values.len();
        let values = Array2::from_shape_vec((n, 1), values.to_vec()).map_err(|e| {
            FilterError::DimensionMismatch {
                what: "scalar series",
                expected: format!("{n}x1"),
                got: e.to_string(),
            }
        })?;
        Self::vector(values)
    }

    /// Builds a series from an `n x m` matrix of observations.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `EmptyData` | no rows or no columns |
    /// | `NonFiniteData` | any value is NaN or infinite |
    pub fn vector(values: Array2<f64>) -> Result<Self, FilterError> {
        if values.nrows() == 0 || values.ncols() == 0 {
            return Err(FilterError::EmptyData);
        }
        if let Some(index) = values
            .rows()
            .into_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(FilterError::NonFiniteData { index });
        }
        Ok(Self {
            values,
            timestamps: None,
        })
    }

    /// Attaches timestamps, one per row.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `TimestampMismatch` | length differs from the number of rows |
    /// | `UnorderedTimestamps` | timestamps are not strictly increasing |
    pub fn with_timestamps(mut self, timestamps: Vec<NaiveDateTime>) -> Result<Self, FilterError> {
        if timestamps.len() != self.len() {
            return Err(FilterError::TimestampMismatch {
                timestamps: timestamps.len(),
                observations: self.len(),
            });
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FilterError::UnorderedTimestamps { index: i + 1 });
        }
        self.timestamps = Some(timestamps);
        Ok(self)
    }

    /// Applies `f` to every value and re-validates the result.
    ///
    /// Timestamps are carried over unchanged.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NonFiniteData` | `f` produced a NaN or infinite value |
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Result<Self, FilterError> {
        let mapped = Self::vector(self.values.mapv(f))?;
        Ok(Self {
            timestamps: self.timestamps.clone(),
            ..mapped
        })
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    /// Always false for a constructed series; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    /// Observation dimension (number of columns).
    pub fn dim(&self) -> usize {
        self.values.ncols()
    }

    /// All observations as an `n x m` view.
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Observation at step `t`.
    ///
    /// # Panics
    ///
    /// Panics if `t >= len()`.
    pub fn row(&self, t: usize) -> ArrayView1<'_, f64> {
        self.values.row(t)
    }

    /// Component `j` as an owned vector.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.values.column(j).to_vec()
    }

    /// Timestamp of step `t`, if timestamps were attached.
    pub fn timestamp(&self, t: usize) -> Option<NaiveDateTime> {
        self.timestamps.as_ref().and_then(|ts| ts.get(t).copied())
    }

    /// All timestamps, if attached.
    pub fn timestamps(&self) -> Option<&[NaiveDateTime]> {
        self.timestamps.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn scalar_series() {
        let s = Series::scalar(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.dim(), 1);
        assert_eq!(s.column(0), vec![1.0, 2.0, 3.0]);
        assert!(s.timestamp(0).is_none());
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(Series::scalar(&[]), Err(FilterError::EmptyData));
    }

    #[test]
    fn non_finite_rejected() {
        let err = Series::scalar(&[1.0, f64::NAN, 3.0]).unwrap_err();
        assert_eq!(err, FilterError::NonFiniteData { index: 1 });
        let err = Series::vector(array![[1.0, 2.0], [3.0, f64::INFINITY]]).unwrap_err();
        assert_eq!(err, FilterError::NonFiniteData { index: 1 });
    }

    #[test]
    fn timestamps_aligned() {
        let s = Series::scalar(&[1.0, 2.0])
            .unwrap()
            .with_timestamps(vec![day(1), day(2)])
            .unwrap();
        assert_eq!(s.timestamp(1), Some(day(2)));
        assert_eq!(s.timestamps().map(|t| t.len()), Some(2));
    }

    #[test]
    fn timestamps_length_mismatch() {
        let err = Series::scalar(&[1.0, 2.0])
            .unwrap()
            .with_timestamps(vec![day(1)])
            .unwrap_err();
        assert!(matches!(err, FilterError::TimestampMismatch { .. }));
    }

    #[test]
    fn timestamps_must_increase() {
        let err = Series::scalar(&[1.0, 2.0, 3.0])
            .unwrap()
            .with_timestamps(vec![day(1), day(3), day(3)])
            .unwrap_err();
        assert_eq!(err, FilterError::UnorderedTimestamps { index: 2 });
    }

    #[test]
    fn map_values_keeps_timestamps() {
        let s = Series::scalar(&[1.0, std::f64::consts::E])
            .unwrap()
            .with_timestamps(vec![day(1), day(2)])
            .unwrap();
        let logged = s.map_values(f64::ln).unwrap();
        assert!((logged.row(1)[0] - 1.0).abs() < 1e-12);
        assert_eq!(logged.timestamp(0), Some(day(1)));
    }

    #[test]
    fn map_values_rejects_non_finite() {
        let s = Series::scalar(&[0.0, 1.0]).unwrap();
        assert!(s.map_values(f64::ln).is_err());
    }
}
