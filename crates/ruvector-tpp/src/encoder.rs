//! Time encoders.
//!
//! [`HarmonicEncoder`] is a closed-form periodic family: every term is a
//! cosine with a known anti-derivative, which is what makes the closed-form
//! intensity integral exact. [`PositionEncoder`] maps absolute times into a
//! sinusoidal embedding consumed by the attention intensity.

use std::f64::consts::FRAC_PI_2;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::batch::NodePair;
use crate::error::{Result, TppError};

/// Frequencies closer to zero than this are pushed out to it so the
/// sine-over-frequency anti-derivative stays finite.
const MIN_FREQUENCY: f64 = 1e-6;

/// Cosine time encoding with learned frequencies and phases plus a learned
/// per-pair offset `alpha`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicEncoder {
    omega: Array1<f64>,
    phase: Array1<f64>,
    alpha: Array2<f64>,
}

impl HarmonicEncoder {
    /// Create an encoder with `dimension` geometric frequencies spanning
    /// `[1, 1e-4]` and a zero offset for every pair of `num_nodes` nodes.
    pub fn new(dimension: usize, num_nodes: usize) -> Self {
        assert!(dimension > 0, "harmonic encoder needs at least one term");
        let omega = Array1::from_shape_fn(dimension, |j| {
            10f64.powf(-4.0 * j as f64 / dimension.max(2).saturating_sub(1) as f64)
        });
        Self {
            omega,
            phase: Array1::zeros(dimension),
            alpha: Array2::zeros((num_nodes, num_nodes)),
        }
    }

    /// Build from explicit frequencies, phases and pair offsets.
    pub fn from_parts(omega: Array1<f64>, phase: Array1<f64>, alpha: Array2<f64>) -> Result<Self> {
        if omega.len() != phase.len() || omega.is_empty() {
            return Err(TppError::dimension_mismatch(
                format!("{} phases", omega.len()),
                format!("{} phases", phase.len()),
            ));
        }
        if alpha.nrows() != alpha.ncols() {
            return Err(TppError::dimension_mismatch(
                "square pair-offset table",
                format!("{:?}", alpha.dim()),
            ));
        }
        Ok(Self { omega, phase, alpha })
    }

    /// Number of cosine terms
    pub fn dimension(&self) -> usize {
        self.omega.len()
    }

    fn frequency(&self, j: usize) -> f64 {
        let w = self.omega[j];
        if w.abs() < MIN_FREQUENCY {
            MIN_FREQUENCY.copysign(w)
        } else {
            w
        }
    }

    /// Mean over terms of `cos(omega_j * lag + phase_j)`, one value per lag.
    pub fn cos_encoding_mean(&self, lags: &[f64]) -> Array1<f64> {
        let d = self.dimension() as f64;
        lags.iter()
            .map(|&lag| {
                (0..self.dimension())
                    .map(|j| (self.frequency(j) * lag + self.phase[j]).cos())
                    .sum::<f64>()
                    / d
            })
            .collect()
    }

    /// Mean over terms of `sin(omega_j * lag + phase_j) / omega_j`: the
    /// anti-derivative of [`cos_encoding_mean`](Self::cos_encoding_mean).
    pub fn sin_divide_omega_mean(&self, lags: &[f64]) -> Array1<f64> {
        let d = self.dimension() as f64;
        lags.iter()
            .map(|&lag| {
                (0..self.dimension())
                    .map(|j| {
                        let w = self.frequency(j);
                        (w * lag + self.phase[j]).sin() / w
                    })
                    .sum::<f64>()
                    / d
            })
            .collect()
    }

    /// Learned offset for `pair`.
    pub fn alpha(&self, pair: NodePair) -> Result<f64> {
        self.alpha
            .get((pair.u, pair.v))
            .copied()
            .ok_or_else(|| {
                TppError::invalid_input(format!(
                    "pair ({}, {}) outside the {}-node offset table",
                    pair.u,
                    pair.v,
                    self.alpha.nrows()
                ))
            })
    }

    /// Number of learned scalars
    pub fn num_parameters(&self) -> usize {
        self.omega.len() + self.phase.len() + self.alpha.len()
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<f64>) {
        out.extend(self.omega.iter());
        out.extend(self.phase.iter());
        out.extend(self.alpha.iter());
    }

    pub(crate) fn load_from(&mut self, src: &mut impl Iterator<Item = f64>) -> Result<()> {
        for w in self
            .omega
            .iter_mut()
            .chain(self.phase.iter_mut())
            .chain(self.alpha.iter_mut())
        {
            *w = src.next().ok_or_else(|| {
                TppError::invalid_input("parameter vector too short for HarmonicEncoder")
            })?;
        }
        Ok(())
    }
}

/// Sinusoidal embedding of absolute times with learned frequencies and
/// phases, initialized to the usual sine/cosine position code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEncoder {
    frequency: Array1<f64>,
    phase: Array1<f64>,
}

impl PositionEncoder {
    /// Create an encoder producing `dimension`-wide embeddings.
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "position encoder needs a positive dimension");
        let frequency = Array1::from_shape_fn(dimension, |j| {
            1.0 / 10_000f64.powf((2 * (j / 2)) as f64 / dimension as f64)
        });
        let phase = Array1::from_shape_fn(dimension, |j| if j % 2 == 1 { FRAC_PI_2 } else { 0.0 });
        Self { frequency, phase }
    }

    /// Embedding width
    pub fn dimension(&self) -> usize {
        self.frequency.len()
    }

    /// Encode each time into a row: `sin(frequency_j * t + phase_j)`.
    pub fn encode(&self, times: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((times.len(), self.dimension()), |(i, j)| {
            (self.frequency[j] * times[i] + self.phase[j]).sin()
        })
    }

    /// Number of learned scalars
    pub fn num_parameters(&self) -> usize {
        self.frequency.len() + self.phase.len()
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<f64>) {
        out.extend(self.frequency.iter());
        out.extend(self.phase.iter());
    }

    pub(crate) fn load_from(&mut self, src: &mut impl Iterator<Item = f64>) -> Result<()> {
        for w in self.frequency.iter_mut().chain(self.phase.iter_mut()) {
            *w = src.next().ok_or_else(|| {
                TppError::invalid_input("parameter vector too short for PositionEncoder")
            })?;
        }
        Ok(())
    }
}
