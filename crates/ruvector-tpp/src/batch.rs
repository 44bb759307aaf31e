//! Node-pair event batches and compute placement.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TppError};

/// Index of a node in the model's embedding tables.
pub type NodeId = usize;

/// An ordered pair of interacting nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePair {
    /// Source node
    pub u: NodeId,
    /// Target node
    pub v: NodeId,
}

impl NodePair {
    /// Create a node pair
    pub fn new(u: NodeId, v: NodeId) -> Self {
        Self { u, v }
    }
}

/// Compute target a batch or a model lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host CPU
    #[default]
    Cpu,
    /// CUDA device ordinal
    Cuda(usize),
}

impl Device {
    /// Map a configured GPU ordinal to a device.
    pub fn select(gpu: Option<usize>) -> Self {
        match gpu {
            Some(id) => Device::Cuda(id),
            None => Device::Cpu,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// One node pair with its full event history.
///
/// Timestamps are finite and strictly increasing with at least two entries,
/// so at least one inter-event interval exists. During evaluation the last
/// timestamp is the held-out target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pair: NodePair,
    timestamps: Vec<f64>,
    context: Vec<f64>,
    device: Device,
}

impl Batch {
    /// Create a batch, validating the event sequence.
    pub fn new(pair: NodePair, timestamps: Vec<f64>) -> Result<Self> {
        if timestamps.len() < 2 {
            return Err(TppError::invalid_input(format!(
                "event sequence for ({}, {}) needs at least 2 timestamps, got {}",
                pair.u,
                pair.v,
                timestamps.len()
            )));
        }
        if let Some(bad) = timestamps.iter().find(|t| !t.is_finite()) {
            return Err(TppError::invalid_input(format!("non-finite timestamp {bad}")));
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(TppError::invalid_input(format!(
                "timestamps must be strictly increasing: t[{}]={} >= t[{}]={}",
                i,
                timestamps[i],
                i + 1,
                timestamps[i + 1]
            )));
        }

        Ok(Self {
            pair,
            timestamps,
            context: Vec::new(),
            device: Device::Cpu,
        })
    }

    /// Attach graph context features consumed by the model.
    pub fn with_context(mut self, context: Vec<f64>) -> Self {
        self.context = context;
        self
    }

    /// Copy of this batch placed on `device`.
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            device,
            ..self.clone()
        }
    }

    /// Node pair
    pub fn pair(&self) -> NodePair {
        self.pair
    }

    /// Full event sequence
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Graph context features
    pub fn context(&self) -> &[f64] {
        &self.context
    }

    /// Device the batch lives on
    pub fn device(&self) -> Device {
        self.device
    }

    /// Split into observed history and the held-out final event.
    pub fn split_target(&self) -> (&[f64], f64) {
        let (target, history) = self
            .timestamps
            .split_last()
            .expect("batch invariant: at least two timestamps");
        (history, *target)
    }

    /// Consecutive inter-event intervals of the full sequence.
    pub fn intervals(&self) -> Vec<f64> {
        intervals(&self.timestamps)
    }
}

/// Train/validation/test batch collections.
#[derive(Debug, Clone, Default)]
pub struct DataSplits {
    /// Training batches
    pub train: Vec<Batch>,
    /// Validation batches
    pub val: Vec<Batch>,
    /// Test batches
    pub test: Vec<Batch>,
}

/// Consecutive differences of a timestamp sequence.
pub(crate) fn intervals(timestamps: &[f64]) -> Vec<f64> {
    timestamps.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Mean of a slice; NaN when empty.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; zero for fewer than two values.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}
