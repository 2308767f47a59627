//! Per-step filter output.

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};

/// Snapshot of a filter at one time step.
///
/// Filtered, predicted and smoothed sequences are all vectors of
/// `FilterState`. Once a state has been appended to a sequence it is never
/// modified; the smoothed sequence is a separate vector derived after the
/// forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    step: usize,
    timestamp: Option<NaiveDateTime>,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    log_likelihood: f64,
    innovation: Array1<f64>,
    innovation_covariance: Array2<f64>,
}

impl FilterState {
    /// Creates a state with zero log-likelihood and an empty innovation.
    pub fn new(step: usize, mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        Self {
            step,
            timestamp: None,
            mean,
            covariance,
            log_likelihood: 0.0,
            innovation: Array1::zeros(0),
            innovation_covariance: Array2::zeros((0, 0)),
        }
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: Option<NaiveDateTime>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the log-likelihood contribution of this step.
    pub fn with_log_likelihood(mut self, log_likelihood: f64) -> Self {
        self.log_likelihood = log_likelihood;
        self
    }

    /// Sets the innovation `y - ŷ` and its covariance.
    pub fn with_innovation(mut self, innovation: Array1<f64>, covariance: Array2<f64>) -> Self {
        self.innovation = innovation;
        self.innovation_covariance = covariance;
        self
    }

    /// Returns a copy with a different mean and covariance, keeping the
    /// step, timestamp and innovation data.
    pub fn with_moments(&self, mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        Self {
            mean,
            covariance,
            ..self.clone()
        }
    }

    /// Time step index.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Timestamp of the observation, if known.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    /// State mean.
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// State covariance.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Log-likelihood contribution of this step.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Innovation vector (empty when not applicable).
    pub fn innovation(&self) -> &Array1<f64> {
        &self.innovation
    }

    /// Innovation covariance (empty when not applicable).
    pub fn innovation_covariance(&self) -> &Array2<f64> {
        &self.innovation_covariance
    }
}
