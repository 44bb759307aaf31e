//! Shared test helpers for the ruvector-tpp integration test suite.
//!
//! Provides a deterministic generator for event sequences and small fixture
//! models whose intensities are known in closed form.

#![allow(dead_code)]

use ndarray::{array, Array1, Array2};
use ruvector_tpp::{
    AttentionModel, Batch, HarmonicEncoder, HarmonicModel, NodePair, PairModel, PairModelConfig,
    Parameterized, Result, TppError,
};

// ---------------------------------------------------------------------------
// Random number generator (simple LCG for deterministic reproducibility)
// ---------------------------------------------------------------------------

/// A minimal linear congruential generator for deterministic test data.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    /// Create a new LCG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next u64 value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Generate a uniform f64 in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform f64 in [lo, hi).
    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

// ---------------------------------------------------------------------------
// Event sequences
// ---------------------------------------------------------------------------

/// Strictly increasing timestamps starting at 0 with gaps in [0.2, 1.5).
pub fn random_sequence(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    let mut t = 0.0;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(t);
        t += rng.next_f64_range(0.2, 1.5);
    }
    out
}

/// Batches over distinct pairs of a `num_nodes` graph, one per pair index.
pub fn random_batches(count: usize, len: usize, num_nodes: usize, seed: u64) -> Vec<Batch> {
    (0..count)
        .map(|i| {
            let pair = NodePair::new(i % num_nodes, (i + 1) % num_nodes);
            Batch::new(pair, random_sequence(len, seed + i as u64)).unwrap()
        })
        .collect()
}

/// Midpoint-rule integral of samples `f(a + (k + 0.5) h)`.
pub fn midpoint_integral(values: &Array1<f64>, h: f64) -> f64 {
    values.sum() * h
}

/// Midpoints of `steps` equal cells covering [a, b].
pub fn midpoints(a: f64, b: f64, steps: usize) -> (Vec<f64>, f64) {
    let h = (b - a) / steps as f64;
    ((0..steps).map(|k| a + (k as f64 + 0.5) * h).collect(), h)
}

// ---------------------------------------------------------------------------
// Fixture models
// ---------------------------------------------------------------------------

/// Attention fixture with identity attention and no context: the projected
/// feature is `slope * t + intercept`, so
/// `lambda(t) = soft_plus(sigmoid(scale), slope * t + intercept)`.
///
/// With `slope > 0` the intensity is convex in `t`; with `slope == 0` it is
/// constant.
#[derive(Debug, Clone)]
pub struct LinearAttention {
    pub slope: f64,
    pub intercept: f64,
    pub scale: f64,
}

impl LinearAttention {
    pub fn constant(intercept: f64) -> Self {
        Self {
            slope: 0.0,
            intercept,
            scale: 0.0,
        }
    }

    /// Intensity the fixture produces at `t`.
    pub fn lambda(&self, t: f64) -> f64 {
        let phi = 1.0 / (1.0 + (-self.scale).exp());
        ruvector_tpp::soft_plus(phi, self.slope * t + self.intercept)
    }
}

impl AttentionModel for LinearAttention {
    fn encode_time(&self, times: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((times.len(), 1), |(i, _)| times[i])
    }

    fn attend(&self, queries: &Array2<f64>, _memory: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(queries.clone())
    }

    fn context(&self, _batch: &Batch, _time: f64) -> Result<Array1<f64>> {
        Ok(Array1::zeros(0))
    }

    fn pair_scale(&self, _pair: NodePair) -> Result<f64> {
        Ok(self.scale)
    }

    fn project(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(features.column(0).mapv(|t| self.slope * t + self.intercept))
    }
}

impl Parameterized for LinearAttention {
    fn parameters(&self) -> Array1<f64> {
        array![self.slope, self.intercept]
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        if params.len() != 2 {
            return Err(TppError::dimension_mismatch("2", params.len().to_string()));
        }
        self.slope = params[0];
        self.intercept = params[1];
        Ok(())
    }
}

/// Wraps [`LinearAttention`] and runs out of memory whenever the context of
/// `fail_on` is requested.
#[derive(Debug, Clone)]
pub struct FailingAttention {
    pub inner: LinearAttention,
    pub fail_on: NodePair,
}

impl AttentionModel for FailingAttention {
    fn encode_time(&self, times: &[f64]) -> Array2<f64> {
        self.inner.encode_time(times)
    }

    fn attend(&self, queries: &Array2<f64>, memory: &Array2<f64>) -> Result<Array2<f64>> {
        self.inner.attend(queries, memory)
    }

    fn context(&self, batch: &Batch, time: f64) -> Result<Array1<f64>> {
        if batch.pair() == self.fail_on {
            return Err(TppError::resource_exhausted("CUDA out of memory"));
        }
        self.inner.context(batch, time)
    }

    fn pair_scale(&self, pair: NodePair) -> Result<f64> {
        self.inner.pair_scale(pair)
    }

    fn project(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner.project(features)
    }
}

impl Parameterized for FailingAttention {
    fn parameters(&self) -> Array1<f64> {
        self.inner.parameters()
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        self.inner.set_parameters(params)
    }
}

/// Harmonic fixture with one unit-frequency term:
/// `lambda(t) = exp(c1) + len(T) * alpha + sum_k cos(t - T_k)`.
///
/// With `c1 = 0` and `alpha = 1` the intensity is at least 1 everywhere.
#[derive(Debug, Clone)]
pub struct UnitHarmonic {
    pub c1: f64,
    encoder: HarmonicEncoder,
}

impl UnitHarmonic {
    pub fn new(c1: f64, alpha: f64, num_nodes: usize) -> Self {
        let encoder = HarmonicEncoder::from_parts(
            array![1.0],
            array![0.0],
            Array2::from_elem((num_nodes, num_nodes), alpha),
        )
        .unwrap();
        Self { c1, encoder }
    }

    /// Positive fixture over 4 nodes.
    pub fn positive() -> Self {
        Self::new(0.0, 1.0, 4)
    }
}

impl HarmonicModel for UnitHarmonic {
    fn pairwise_constant(&self, _pair: NodePair) -> Result<f64> {
        Ok(self.c1)
    }

    fn harmonic(&self) -> &HarmonicEncoder {
        &self.encoder
    }
}

impl Parameterized for UnitHarmonic {
    fn parameters(&self) -> Array1<f64> {
        array![self.c1]
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        self.c1 = params[0];
        Ok(())
    }
}

/// A small reference model, cheap enough for finite-difference gradients.
pub fn small_pair_model(num_nodes: usize, seed: u64) -> PairModel {
    PairModel::new(PairModelConfig {
        num_nodes,
        embedding_dim: 2,
        hidden_dim: 2,
        harmonic_terms: 2,
        time_dim: 2,
        num_heads: 1,
        alpha_dim: 2,
        context_dim: 0,
        seed,
    })
    .unwrap()
}
