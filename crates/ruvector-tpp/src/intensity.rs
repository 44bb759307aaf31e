//! Conditional intensity functions `lambda(t | history)` and their integrals.
//!
//! Both variants borrow a model and keep no state of their own. Every
//! operation is batched: `evaluate` takes a slice of query times and returns
//! one intensity per time; `integral` takes non-decreasing end boundaries and
//! returns the running integral from a single start to each boundary.
//!
//! Calling either with a history that does not precede the query window is a
//! programming error and panics. Degenerate numerics (zero intensities,
//! overflowing exponentials) are returned as-is.

use ndarray::Array1;

use crate::batch::Batch;
use crate::config::IntegralConfig;
use crate::error::Result;
use crate::model::{AttentionModel, HarmonicModel};

/// Conditional intensity of one node pair given its event history.
pub trait IntensityFunction {
    /// Intensity at each of `times`, broadcasting the batch's pair and
    /// `history` across all of them.
    ///
    /// # Panics
    /// If any history timestamp exceeds the smallest query time.
    fn evaluate(&self, batch: &Batch, history: &[f64], times: &[f64]) -> Result<Array1<f64>>;

    /// Running integral: `result[i] = integral of lambda from t_start to t_end[i]`.
    ///
    /// # Panics
    /// If `history` does not precede `t_start`, or `t_end` is not
    /// non-decreasing and at least `t_start`.
    fn integral(
        &self,
        batch: &Batch,
        history: &[f64],
        t_start: f64,
        t_end: &[f64],
    ) -> Result<Array1<f64>>;
}

/// Builds an intensity function bound to a live model.
///
/// Loops hold a binder rather than an intensity so they can rebind after the
/// model's parameters change.
pub trait IntensityBinder<M: ?Sized>: Send + Sync {
    /// Bind to `model` for the duration of the borrow.
    fn bind<'m>(&self, model: &'m M) -> Box<dyn IntensityFunction + 'm>;
}

/// Closed-form harmonic intensity:
/// `lambda(t) = exp(C1) + sum_k cos_mean(t - T_k) + len(T) * alpha(u, v)`.
pub struct ClosedFormIntensity<'m, M: ?Sized> {
    model: &'m M,
}

impl<'m, M: HarmonicModel + ?Sized> ClosedFormIntensity<'m, M> {
    /// Bind to a model.
    pub fn new(model: &'m M) -> Self {
        Self { model }
    }
}

impl<M: HarmonicModel + ?Sized> IntensityFunction for ClosedFormIntensity<'_, M> {
    fn evaluate(&self, batch: &Batch, history: &[f64], times: &[f64]) -> Result<Array1<f64>> {
        if times.is_empty() {
            return Ok(Array1::zeros(0));
        }
        assert_history_precedes(history, min_of(times));

        let pair = batch.pair();
        let encoder = self.model.harmonic();
        let base = self.model.pairwise_constant(pair)?.exp()
            + history.len() as f64 * encoder.alpha(pair)?;

        Ok(times
            .iter()
            .map(|&t| {
                let lags: Vec<f64> = history.iter().map(|&h| t - h).collect();
                base + encoder.cos_encoding_mean(&lags).sum()
            })
            .collect())
    }

    fn integral(
        &self,
        batch: &Batch,
        history: &[f64],
        t_start: f64,
        t_end: &[f64],
    ) -> Result<Array1<f64>> {
        assert_integral_window(history, t_start, t_end);
        if t_end.is_empty() {
            return Ok(Array1::zeros(0));
        }

        let pair = batch.pair();
        let encoder = self.model.harmonic();
        let rate = self.model.pairwise_constant(pair)?.exp()
            + history.len() as f64 * encoder.alpha(pair)?;

        let start_lags: Vec<f64> = history.iter().map(|&h| t_start - h).collect();
        let start_term = encoder.sin_divide_omega_mean(&start_lags).sum();

        Ok(t_end
            .iter()
            .map(|&end| {
                let lags: Vec<f64> = history.iter().map(|&h| end - h).collect();
                rate * (end - t_start) + encoder.sin_divide_omega_mean(&lags).sum() - start_term
            })
            .collect())
    }
}

/// Closed-form harmonic variant binder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormBinder;

impl<M: HarmonicModel + ?Sized> IntensityBinder<M> for ClosedFormBinder {
    fn bind<'m>(&self, model: &'m M) -> Box<dyn IntensityFunction + 'm> {
        Box::new(ClosedFormIntensity::new(model))
    }
}

/// Attention intensity with a composite Monte Carlo integral.
///
/// Query times attend over the encoded history; the attention output is
/// joined with the pair's context at the earliest query time, projected to a
/// scalar and passed through [`soft_plus`] with
/// `phi = sigmoid(<alpha(u), alpha(v)>)`.
pub struct AttentionIntensity<'m, M: ?Sized> {
    model: &'m M,
    config: IntegralConfig,
}

impl<'m, M: AttentionModel + ?Sized> AttentionIntensity<'m, M> {
    /// Bind to a model with the given integration settings.
    pub fn new(model: &'m M, config: IntegralConfig) -> Self {
        Self { model, config }
    }
}

impl<M: AttentionModel + ?Sized> IntensityFunction for AttentionIntensity<'_, M> {
    fn evaluate(&self, batch: &Batch, history: &[f64], times: &[f64]) -> Result<Array1<f64>> {
        if times.is_empty() {
            return Ok(Array1::zeros(0));
        }
        let earliest = min_of(times);
        assert_history_precedes(history, earliest);

        let queries = self.model.encode_time(times);
        let memory = self.model.encode_time(history);
        let attended = self.model.attend(&queries, &memory)?;
        let context = self.model.context(batch, earliest)?;

        let width = attended.ncols();
        let features = ndarray::Array2::from_shape_fn(
            (times.len(), width + context.len()),
            |(i, j)| {
                if j < width {
                    attended[[i, j]]
                } else {
                    context[j - width]
                }
            },
        );

        let phi = sigmoid(self.model.pair_scale(batch.pair())?);
        Ok(self.model.project(&features)?.mapv(|x| soft_plus(phi, x)))
    }

    fn integral(
        &self,
        batch: &Batch,
        history: &[f64],
        t_start: f64,
        t_end: &[f64],
    ) -> Result<Array1<f64>> {
        assert_integral_window(history, t_start, t_end);
        if t_end.is_empty() {
            return Ok(Array1::zeros(0));
        }

        let n = self.config.subdivisions.max(1);
        let mut points = Vec::with_capacity(t_end.len() * n);
        let mut weights = Vec::with_capacity(t_end.len() * n);
        let mut prev = t_start;
        for (i, &end) in t_end.iter().enumerate() {
            let first = if i == 0 { t_start + self.config.start_offset } else { prev };
            points.extend(linspace(first, end, n));
            let width = (end - prev) / n as f64;
            weights.extend(std::iter::repeat(width).take(n));
            prev = end;
        }

        let values = self.evaluate(batch, history, &points)?;
        assert_eq!(
            values.len(),
            weights.len(),
            "batched intensities and interval weights disagree"
        );

        let mut running = 0.0;
        let mut out = Vec::with_capacity(t_end.len());
        for (k, (value, weight)) in values.iter().zip(&weights).enumerate() {
            running += value * weight;
            if (k + 1) % n == 0 {
                out.push(running);
            }
        }
        Ok(Array1::from(out))
    }
}

/// Attention variant binder carrying the integration settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttentionBinder {
    /// Monte Carlo integration settings
    pub integral: IntegralConfig,
}

impl AttentionBinder {
    /// Binder with explicit integration settings.
    pub fn new(integral: IntegralConfig) -> Self {
        Self { integral }
    }
}

impl<M: AttentionModel + ?Sized> IntensityBinder<M> for AttentionBinder {
    fn bind<'m>(&self, model: &'m M) -> Box<dyn IntensityFunction + 'm> {
        Box::new(AttentionIntensity::new(model, self.integral))
    }
}

/// Scaled soft-plus `phi * ln(1.1 + exp(x / phi))`, always positive for
/// positive `phi`.
pub fn soft_plus(phi: f64, x: f64) -> f64 {
    let z = x / phi;
    let log_term = if z > 0.0 {
        // ln(1.1 + e^z) = z + ln(1 + 1.1 e^-z)
        z + (1.1 * (-z).exp()).ln_1p()
    } else {
        (0.1 + z.exp()).ln_1p()
    };
    phi * log_term
}

/// Shifted rectifier `phi + max(x, 0)`.
pub fn relu_plus(phi: f64, x: f64) -> f64 {
    phi + x.max(0.0)
}

/// Logistic sigmoid
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `n` evenly spaced points from `start` to `end`, both included.
/// A single point is placed at `end`.
pub(crate) fn linspace(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (end - start) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |k| if n == 1 || k == n - 1 { end } else { start + step * k as f64 })
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn assert_history_precedes(history: &[f64], start: f64) {
    let latest = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(
        latest <= start,
        "history must precede the query window: max(T) = {latest} > {start}"
    );
}

fn assert_integral_window(history: &[f64], t_start: f64, t_end: &[f64]) {
    assert_history_precedes(history, t_start);
    if let Some(&first) = t_end.first() {
        assert!(first >= t_start, "t_end[0] = {first} precedes t_start = {t_start}");
    }
    assert!(
        t_end.windows(2).all(|w| w[1] >= w[0]),
        "integral boundaries must be non-decreasing"
    );
}
