//! Event-time density `f(t) = lambda(t) * exp(-integral of lambda since the
//! last event)` and next-event-time prediction.
//!
//! Prediction first brackets a horizon where the density is in a target
//! band, then takes a weighted Monte Carlo expectation over evenly spaced
//! candidates inside that horizon.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{intervals, mean, variance, Batch};
use crate::config::PredictConfig;
use crate::error::{Result, TppError};
use crate::intensity::IntensityFunction;

/// Horizon chosen by the bracketing search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    /// End of the sampling window
    pub horizon: f64,
    /// Number of horizon adjustments performed
    pub iterations: usize,
}

/// Result of [`ConditionalDensity::predict`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Expected next event time
    pub time: f64,
    /// Bracketing outcome the expectation was sampled under
    pub bracket: Bracket,
}

/// Density sampled on an evenly spaced grid after the last event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityCurve {
    /// Sample times
    pub times: Vec<f64>,
    /// Density at each time multiplied by the grid spacing
    pub values: Vec<f64>,
}

/// Conditional density derived from one intensity function.
pub struct ConditionalDensity<'f> {
    intensity: &'f dyn IntensityFunction,
    config: PredictConfig,
}

impl<'f> ConditionalDensity<'f> {
    /// Wrap an intensity function.
    pub fn new(intensity: &'f dyn IntensityFunction, config: PredictConfig) -> Self {
        Self { intensity, config }
    }

    /// Prediction settings in use
    pub fn config(&self) -> &PredictConfig {
        &self.config
    }

    /// Density at each of `times` (non-decreasing, after the last event).
    pub fn evaluate(&self, batch: &Batch, history: &[f64], times: &[f64]) -> Result<Array1<f64>> {
        let last = last_event(history)?;
        let lambda = self.intensity.evaluate(batch, history, times)?;
        let integral = self.intensity.integral(batch, history, last, times)?;
        assert_eq!(lambda.len(), integral.len(), "intensity and integral lengths differ");

        let clip = self.config.integral_clip;
        Ok(lambda
            .iter()
            .zip(integral.iter())
            .map(|(&l, &i)| l * (-i.clamp(-clip, clip)).exp())
            .collect())
    }

    /// Search for a horizon whose density falls inside the target band.
    ///
    /// Starts one `mean + variance` of the history intervals past the last
    /// event, halves the distance while the density is too low and grows it
    /// by half while it is too high. Gives up after
    /// [`PredictConfig::max_iterations`] adjustments.
    pub fn bracket(&self, batch: &Batch, history: &[f64]) -> Result<Bracket> {
        let scale = history_scale(history)?;
        let last = last_event(history)?;
        let cfg = &self.config;

        let mut horizon = last + scale;
        let mut iterations = 0;
        let mut test = self.density_at(batch, history, horizon)?;

        // NaN densities fail both comparisons and end the search
        while (test < cfg.density_low || test > cfg.density_high) && horizon > last {
            if test < cfg.density_low && horizon > last + cfg.min_horizon {
                horizon = (last + horizon) / 2.0;
            } else if test > cfg.density_high {
                horizon += (horizon - last) / 2.0;
            }
            iterations += 1;
            if iterations >= cfg.max_iterations {
                debug!(
                    pair = ?batch.pair(),
                    horizon,
                    density = test,
                    "bracketing stopped at iteration cap"
                );
                break;
            }
            test = self.density_at(batch, history, horizon)?;
        }

        Ok(Bracket { horizon, iterations })
    }

    /// Expected next event time after `history`.
    ///
    /// Never earlier than the last event as long as the density is
    /// non-negative.
    pub fn predict(&self, batch: &Batch, history: &[f64]) -> Result<Prediction> {
        let bracket = self.bracket(batch, history)?;
        let last = last_event(history)?;
        let samples = self.config.samples.max(1);

        let delta = (bracket.horizon - last).abs() / samples as f64;
        let offsets: Vec<f64> = (1..=samples).map(|i| delta * i as f64).collect();
        let candidates: Vec<f64> = offsets.iter().map(|o| last + o).collect();

        let mass = self.evaluate(batch, history, &candidates)? * delta;
        let total = mass.sum() + self.config.normalization_epsilon;
        let expected_offset: f64 = mass
            .iter()
            .zip(&offsets)
            .map(|(m, o)| (m / total) * o)
            .sum();

        Ok(Prediction {
            time: last + expected_offset,
            bracket,
        })
    }

    /// Density on `points` evenly spaced times covering
    /// `(last, last + mean + variance of history intervals]`, each value
    /// scaled by the spacing.
    pub fn sample_curve(&self, batch: &Batch, history: &[f64], points: usize) -> Result<DensityCurve> {
        if points == 0 {
            return Err(TppError::invalid_input("density curve needs at least one point"));
        }
        let scale = history_scale(history)?;
        let last = last_event(history)?;
        let step = scale / points as f64;

        let times: Vec<f64> = (1..=points).map(|i| last + step * i as f64).collect();
        let values = self.evaluate(batch, history, &times)?.mapv(|f| f * step).to_vec();
        Ok(DensityCurve { times, values })
    }

    fn density_at(&self, batch: &Batch, history: &[f64], t: f64) -> Result<f64> {
        Ok(self.evaluate(batch, history, &[t])?[0])
    }
}

fn last_event(history: &[f64]) -> Result<f64> {
    history
        .last()
        .copied()
        .ok_or_else(|| TppError::invalid_input("density needs a non-empty history"))
}

/// `mean + unbiased variance` of the history's inter-event intervals.
pub(crate) fn history_scale(history: &[f64]) -> Result<f64> {
    if history.len() < 2 {
        return Err(TppError::invalid_input(format!(
            "prediction needs at least 2 history events, got {}",
            history.len()
        )));
    }
    let gaps = intervals(history);
    Ok(mean(&gaps) + variance(&gaps))
}
