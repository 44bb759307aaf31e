//! Point-process log-likelihood of an event sequence.

use crate::batch::Batch;
use crate::error::{Result, TppError};
use crate::intensity::IntensityFunction;

/// Log-likelihood of `timestamps` under `intensity`:
/// `sum_i log lambda(T[i+1] | T[..=i]) - sum_i integral(T[i], T[i+1] | T[..=i])`.
///
/// A zero intensity at an event gives `-inf`; it is not treated as an error.
pub fn log_likelihood(
    intensity: &dyn IntensityFunction,
    batch: &Batch,
    timestamps: &[f64],
) -> Result<f64> {
    if timestamps.len() < 2 {
        return Err(TppError::invalid_input(format!(
            "log-likelihood needs at least 2 timestamps, got {}",
            timestamps.len()
        )));
    }

    let mut log_lambda = 0.0;
    let mut compensator = 0.0;
    for i in 0..timestamps.len() - 1 {
        let history = &timestamps[..=i];
        let next = timestamps[i + 1];
        log_lambda += intensity.evaluate(batch, history, &[next])?[0].ln();
        compensator += intensity.integral(batch, history, timestamps[i], &[next])?[0];
    }
    Ok(log_lambda - compensator)
}

/// Negative log-likelihood of the batch's full sequence.
pub fn criterion(intensity: &dyn IntensityFunction, batch: &Batch) -> Result<f64> {
    Ok(-log_likelihood(intensity, batch, batch.timestamps())?)
}
