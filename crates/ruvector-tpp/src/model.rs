//! Model contracts consumed by the intensity functions, and a small
//! reference model implementing all of them.
//!
//! The intensity variants only see a model through [`HarmonicModel`] or
//! [`AttentionModel`]; the training loop only sees it through
//! [`Parameterized`]. Any embedding network that can answer those calls can
//! be trained with this crate.

use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Device, NodeId, NodePair};
use crate::encoder::{HarmonicEncoder, PositionEncoder};
use crate::error::{Result, TppError};
use crate::layer::{CrossAttention, Linear};

/// Model surface needed by the closed-form harmonic intensity.
pub trait HarmonicModel {
    /// Learned pairwise scalar `C1(u, v)`; the base rate is `exp(C1)`.
    fn pairwise_constant(&self, pair: NodePair) -> Result<f64>;

    /// Cosine time encoder with its per-pair offsets.
    fn harmonic(&self) -> &HarmonicEncoder;
}

/// Model surface needed by the attention intensity.
pub trait AttentionModel {
    /// Embed each time into one row of a shared time-embedding space.
    fn encode_time(&self, times: &[f64]) -> Array2<f64>;

    /// Cross attention of `queries` over `memory` (key = value = memory).
    fn attend(&self, queries: &Array2<f64>, memory: &Array2<f64>) -> Result<Array2<f64>>;

    /// Graph/context representation of the batch's pair evaluated at `time`.
    fn context(&self, batch: &Batch, time: f64) -> Result<Array1<f64>>;

    /// Raw pair scale `<alpha(u), alpha(v)>`, squashed by the caller.
    fn pair_scale(&self, pair: NodePair) -> Result<f64>;

    /// Map each feature row to a pre-activation scalar.
    fn project(&self, features: &Array2<f64>) -> Result<Array1<f64>>;
}

/// A model whose learned state can be read and written as one flat vector.
pub trait Parameterized {
    /// Current parameters, flattened in a fixed order.
    fn parameters(&self) -> Array1<f64>;

    /// Overwrite every parameter from a vector produced by
    /// [`parameters`](Self::parameters).
    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()>;

    /// Length of the flat parameter vector.
    fn num_parameters(&self) -> usize {
        self.parameters().len()
    }

    /// Move the model to a compute device.
    fn to_device(&mut self, _device: Device) {}
}

/// Sizes and seed for [`PairModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairModelConfig {
    /// Number of nodes in the graph
    pub num_nodes: usize,
    /// Node embedding width
    pub embedding_dim: usize,
    /// Hidden representation width
    pub hidden_dim: usize,
    /// Number of cosine terms in the harmonic encoder
    pub harmonic_terms: usize,
    /// Position encoding width (also the attention width)
    pub time_dim: usize,
    /// Attention heads; must divide `time_dim`
    pub num_heads: usize,
    /// Width of the per-node alpha vectors
    pub alpha_dim: usize,
    /// Width of the graph context carried by each batch (0 for none)
    pub context_dim: usize,
    /// Seed for parameter initialization
    pub seed: u64,
}

impl Default for PairModelConfig {
    fn default() -> Self {
        Self {
            num_nodes: 16,
            embedding_dim: 8,
            hidden_dim: 8,
            harmonic_terms: 8,
            time_dim: 8,
            num_heads: 1,
            alpha_dim: 4,
            context_dim: 0,
            seed: 42,
        }
    }
}

/// Reference pair model.
///
/// Holds node embeddings, hidden representations and alpha vectors, the
/// pairwise maps producing `C1`, a harmonic and a position time encoder,
/// cross attention over encoded history, a context map and the output map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairModel {
    config: PairModelConfig,
    embedding: Array2<f64>,
    hidden: Array2<f64>,
    alpha: Array2<f64>,
    w_s: Linear,
    w_e: Linear,
    context_map: Linear,
    harmonic: HarmonicEncoder,
    position: PositionEncoder,
    attention: CrossAttention,
    w_h: Linear,
    device: Device,
}

impl PairModel {
    /// Build a freshly initialized model.
    pub fn new(config: PairModelConfig) -> Result<Self> {
        if config.num_nodes == 0 {
            return Err(TppError::config("num_nodes must be positive"));
        }
        if config.embedding_dim == 0 || config.hidden_dim == 0 || config.alpha_dim == 0 {
            return Err(TppError::config("embedding, hidden and alpha widths must be positive"));
        }
        if config.harmonic_terms == 0 {
            return Err(TppError::config("harmonic_terms must be positive"));
        }
        if config.time_dim == 0 || config.num_heads == 0 || config.time_dim % config.num_heads != 0 {
            return Err(TppError::config(format!(
                "time_dim {} must be a positive multiple of num_heads {}",
                config.time_dim, config.num_heads
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let n = config.num_nodes;
        let e = config.embedding_dim;

        let embedding = small_normal((n, e), &mut rng);
        let hidden = small_normal((n, config.hidden_dim), &mut rng);
        let alpha = small_normal((n, config.alpha_dim), &mut rng);
        let w_s = Linear::new(2 * config.hidden_dim, 1, &mut rng);
        let w_e = Linear::new(2 * e, 1, &mut rng);
        let context_map = Linear::new(2 * e + 1 + config.context_dim, e, &mut rng);
        let attention = CrossAttention::new(config.time_dim, config.num_heads, &mut rng);
        let w_h = Linear::new(config.time_dim + e, 1, &mut rng);

        Ok(Self {
            harmonic: HarmonicEncoder::new(config.harmonic_terms, n),
            position: PositionEncoder::new(config.time_dim),
            config,
            embedding,
            hidden,
            alpha,
            w_s,
            w_e,
            context_map,
            attention,
            w_h,
            device: Device::Cpu,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &PairModelConfig {
        &self.config
    }

    /// Device the model was last moved to
    pub fn device(&self) -> Device {
        self.device
    }

    /// Node embedding row
    pub fn embedding(&self, node: NodeId) -> Result<ArrayView1<'_, f64>> {
        table_row(&self.embedding, node, "embedding")
    }

    /// Per-node hidden representation row
    pub fn hidden_rep(&self, node: NodeId) -> Result<ArrayView1<'_, f64>> {
        table_row(&self.hidden, node, "hidden representation")
    }

    fn pair_embedding(&self, pair: NodePair) -> Result<Array1<f64>> {
        let emb_u = self.embedding(pair.u)?;
        let emb_v = self.embedding(pair.v)?;
        Ok(concatenate![Axis(0), emb_u, emb_v])
    }
}

fn small_normal(shape: (usize, usize), rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn(shape, |_| rng.sample::<f64, _>(StandardNormal) * 0.1)
}

fn table_row<'a>(table: &'a Array2<f64>, node: NodeId, name: &str) -> Result<ArrayView1<'a, f64>> {
    if node >= table.nrows() {
        return Err(TppError::invalid_input(format!(
            "node {node} outside the {}-row {name} table",
            table.nrows()
        )));
    }
    Ok(table.row(node))
}

impl HarmonicModel for PairModel {
    fn pairwise_constant(&self, pair: NodePair) -> Result<f64> {
        let hid = concatenate![Axis(0), self.hidden_rep(pair.u)?, self.hidden_rep(pair.v)?];
        let emb = self.pair_embedding(pair)?;
        Ok(self.w_s.forward(hid.view())[0] + self.w_e.forward(emb.view())[0])
    }

    fn harmonic(&self) -> &HarmonicEncoder {
        &self.harmonic
    }
}

impl AttentionModel for PairModel {
    fn encode_time(&self, times: &[f64]) -> Array2<f64> {
        self.position.encode(times)
    }

    fn attend(&self, queries: &Array2<f64>, memory: &Array2<f64>) -> Result<Array2<f64>> {
        self.attention.forward(queries, memory)
    }

    fn context(&self, batch: &Batch, time: f64) -> Result<Array1<f64>> {
        let graph = batch.context();
        if graph.len() != self.config.context_dim {
            return Err(TppError::dimension_mismatch(
                format!("{} graph context features", self.config.context_dim),
                format!("{} graph context features", graph.len()),
            ));
        }
        let mut input = self.pair_embedding(batch.pair())?.to_vec();
        // Signed log keeps large absolute times in range
        input.push(time.signum() * time.abs().ln_1p());
        input.extend_from_slice(graph);
        let input = Array1::from(input);
        Ok(self.context_map.forward(input.view()).mapv(f64::tanh))
    }

    fn pair_scale(&self, pair: NodePair) -> Result<f64> {
        let a_u = table_row(&self.alpha, pair.u, "alpha")?;
        let a_v = table_row(&self.alpha, pair.v, "alpha")?;
        Ok(a_u.dot(&a_v))
    }

    fn project(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        if features.ncols() != self.w_h.input_dim() {
            return Err(TppError::dimension_mismatch(
                format!("{} feature columns", self.w_h.input_dim()),
                format!("{} feature columns", features.ncols()),
            ));
        }
        Ok(self.w_h.forward_rows(features).column(0).to_owned())
    }
}

impl Parameterized for PairModel {
    fn parameters(&self) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        flat.extend(self.embedding.iter());
        flat.extend(self.hidden.iter());
        flat.extend(self.alpha.iter());
        self.w_s.flatten_into(&mut flat);
        self.w_e.flatten_into(&mut flat);
        self.context_map.flatten_into(&mut flat);
        self.harmonic.flatten_into(&mut flat);
        self.position.flatten_into(&mut flat);
        self.attention.flatten_into(&mut flat);
        self.w_h.flatten_into(&mut flat);
        Array1::from(flat)
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        let expected = self.num_parameters();
        if params.len() != expected {
            return Err(TppError::dimension_mismatch(
                format!("{expected} parameters"),
                format!("{} parameters", params.len()),
            ));
        }

        let mut src = params.iter().copied();
        for w in self
            .embedding
            .iter_mut()
            .chain(self.hidden.iter_mut())
            .chain(self.alpha.iter_mut())
        {
            // Length was checked above
            *w = src.next().unwrap_or_default();
        }
        self.w_s.load_from(&mut src)?;
        self.w_e.load_from(&mut src)?;
        self.context_map.load_from(&mut src)?;
        self.harmonic.load_from(&mut src)?;
        self.position.load_from(&mut src)?;
        self.attention.load_from(&mut src)?;
        self.w_h.load_from(&mut src)
    }

    fn num_parameters(&self) -> usize {
        self.embedding.len()
            + self.hidden.len()
            + self.alpha.len()
            + self.w_s.num_parameters()
            + self.w_e.num_parameters()
            + self.context_map.num_parameters()
            + self.harmonic.num_parameters()
            + self.position.num_parameters()
            + self.attention.num_parameters()
            + self.w_h.num_parameters()
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
    }
}
