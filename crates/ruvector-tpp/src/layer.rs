//! Learned building blocks used by the reference pair model.
//!
//! Linear maps and multi-head cross attention over time embeddings. Every
//! layer can flatten its parameters into a single vector and load them back,
//! which is how optimizers and gradient sources see the model.

use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TppError};

/// Linear transformation layer (weight matrix multiplication)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Linear {
    /// Create a new linear layer with Xavier/Glorot initialization
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        // Xavier initialization: scale = sqrt(2.0 / (input_dim + output_dim))
        let scale = (2.0 / (input_dim + output_dim).max(1) as f64).sqrt();
        let weights = Array2::from_shape_fn((output_dim, input_dim), |_| {
            rng.sample::<f64, _>(StandardNormal) * scale
        });
        let bias = Array1::zeros(output_dim);

        Self { weights, bias }
    }

    /// Build from explicit weights and bias
    pub fn from_parts(weights: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        if weights.nrows() != bias.len() {
            return Err(TppError::dimension_mismatch(
                format!("bias of length {}", weights.nrows()),
                format!("bias of length {}", bias.len()),
            ));
        }
        Ok(Self { weights, bias })
    }

    /// Forward pass: y = Wx + b
    pub fn forward(&self, input: ArrayView1<'_, f64>) -> Array1<f64> {
        self.weights.dot(&input) + &self.bias
    }

    /// Row-wise forward pass: Y = X W^T + b
    pub fn forward_rows(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights.t()) + &self.bias
    }

    /// Get input dimension
    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Get output dimension
    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Number of learned scalars
    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<f64>) {
        out.extend(self.weights.iter());
        out.extend(self.bias.iter());
    }

    pub(crate) fn load_from(&mut self, src: &mut impl Iterator<Item = f64>) -> Result<()> {
        for w in self.weights.iter_mut().chain(self.bias.iter_mut()) {
            *w = src
                .next()
                .ok_or_else(|| TppError::invalid_input("parameter vector too short for Linear"))?;
        }
        Ok(())
    }
}

/// Multi-head cross attention: queries attend over a memory sequence.
///
/// Used with query = encoded query times and key = value = encoded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossAttention {
    num_heads: usize,
    head_dim: usize,
    q_linear: Linear,
    k_linear: Linear,
    v_linear: Linear,
    out_linear: Linear,
}

impl CrossAttention {
    /// Create a new cross-attention layer
    pub fn new<R: Rng + ?Sized>(embed_dim: usize, num_heads: usize, rng: &mut R) -> Self {
        assert!(
            num_heads > 0 && embed_dim % num_heads == 0,
            "Embedding dimension must be divisible by number of heads"
        );

        Self {
            num_heads,
            head_dim: embed_dim / num_heads,
            q_linear: Linear::new(embed_dim, embed_dim, rng),
            k_linear: Linear::new(embed_dim, embed_dim, rng),
            v_linear: Linear::new(embed_dim, embed_dim, rng),
            out_linear: Linear::new(embed_dim, embed_dim, rng),
        }
    }

    /// Embedding dimension
    pub fn embed_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Forward pass: one output row per query row.
    ///
    /// # Arguments
    /// * `queries` - `(n, embed_dim)` query embeddings
    /// * `memory` - `(m, embed_dim)` key/value embeddings
    ///
    /// # Returns
    /// `(n, embed_dim)` attention-weighted outputs. An empty memory returns
    /// the queries unchanged.
    pub fn forward(&self, queries: &Array2<f64>, memory: &Array2<f64>) -> Result<Array2<f64>> {
        let dim = self.embed_dim();
        if queries.ncols() != dim || memory.ncols() != dim {
            return Err(TppError::dimension_mismatch(
                format!("embedding width {dim}"),
                format!("queries {}, memory {}", queries.ncols(), memory.ncols()),
            ));
        }
        if memory.nrows() == 0 {
            return Ok(queries.clone());
        }

        // Project queries, keys, and values
        let q = self.q_linear.forward_rows(queries);
        let k = self.k_linear.forward_rows(memory);
        let v = self.v_linear.forward_rows(memory);

        let scale = (self.head_dim as f64).sqrt();
        let mut concat = Array2::<f64>::zeros((queries.nrows(), dim));

        for h in 0..self.num_heads {
            let (lo, hi) = (h * self.head_dim, (h + 1) * self.head_dim);
            let q_h = q.slice(s![.., lo..hi]);
            let k_h = k.slice(s![.., lo..hi]);
            let v_h = v.slice(s![.., lo..hi]);

            // Scaled dot-product scores, (n, m)
            let mut scores = q_h.dot(&k_h.t()) / scale;

            // Row-wise softmax with epsilon guard against division by zero
            for mut row in scores.axis_iter_mut(Axis(0)) {
                let max_score = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                row.mapv_inplace(|s| (s - max_score).exp());
                let sum_exp = row.sum().max(1e-10);
                row.mapv_inplace(|e| e / sum_exp);
            }

            // Weighted sum of values
            concat.slice_mut(s![.., lo..hi]).assign(&scores.dot(&v_h));
        }

        // Final linear projection
        Ok(self.out_linear.forward_rows(&concat))
    }

    /// Number of learned scalars
    pub fn num_parameters(&self) -> usize {
        self.q_linear.num_parameters()
            + self.k_linear.num_parameters()
            + self.v_linear.num_parameters()
            + self.out_linear.num_parameters()
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<f64>) {
        self.q_linear.flatten_into(out);
        self.k_linear.flatten_into(out);
        self.v_linear.flatten_into(out);
        self.out_linear.flatten_into(out);
    }

    pub(crate) fn load_from(&mut self, src: &mut impl Iterator<Item = f64>) -> Result<()> {
        self.q_linear.load_from(src)?;
        self.k_linear.load_from(src)?;
        self.v_linear.load_from(src)?;
        self.out_linear.load_from(src)
    }
}
