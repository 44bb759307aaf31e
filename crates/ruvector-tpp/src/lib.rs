//! # RuVector TPP
//!
//! Temporal point-process training and next-event prediction for node-pair
//! event streams on dynamic graphs.
//!
//! Given the interaction timestamps of a node pair, a model defines a
//! conditional intensity `lambda(t | history)`. From it this crate derives:
//!
//! - **Intensity functions**: a closed-form harmonic variant with an exact
//!   integral, and an attention variant integrated by composite Monte Carlo
//!   sampling ([`intensity`])
//! - **Event-time density and prediction**: `f(t) = lambda(t) exp(-integral)`
//!   and the expected next event time by adaptive bracketing ([`density`])
//! - **Log-likelihood** and the NLL training criterion ([`likelihood`])
//! - **Training** with gradient accumulation and skipping of batches that
//!   exhaust memory ([`train`])
//! - **Evaluation** with optional pooled fan-out and diagnostics ([`eval`])
//!
//! ### Usage Example
//!
//! ```rust,ignore
//! use ruvector_tpp::{
//!     AttentionBinder, Batch, DataSplits, FiniteDifference, MemoryRecorder, NodePair,
//!     PairModel, PairModelConfig, SequentialPool, TrainConfig, train_model,
//! };
//!
//! // Finite-difference gradients cost two loss evaluations per parameter,
//! // so keep the model small or plug in an analytic `GradientSource`.
//! let mut model = PairModel::new(PairModelConfig {
//!     num_nodes: 4,
//!     embedding_dim: 2,
//!     hidden_dim: 2,
//!     harmonic_terms: 2,
//!     time_dim: 2,
//!     alpha_dim: 2,
//!     ..Default::default()
//! })?;
//! let splits = DataSplits {
//!     train: vec![Batch::new(NodePair::new(0, 1), vec![0.0, 1.2, 2.1, 3.5])?],
//!     val: vec![],
//!     test: vec![Batch::new(NodePair::new(2, 3), vec![0.0, 0.7, 1.9, 2.4])?],
//! };
//! let mut recorder = MemoryRecorder::new("run-1");
//! let reports = train_model(
//!     &mut model,
//!     &splits,
//!     &AttentionBinder::default(),
//!     &FiniteDifference::default(),
//!     &SequentialPool,
//!     &mut recorder,
//!     &TrainConfig { epochs: 3, ..Default::default() },
//! )?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod batch;
pub mod config;
pub mod density;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod grad;
pub mod intensity;
pub mod layer;
pub mod likelihood;
pub mod model;
pub mod optim;
pub mod recorder;
pub mod train;

// Re-export commonly used types
pub use batch::{Batch, DataSplits, Device, NodeId, NodePair};
pub use config::{
    EvalConfig, IntegralConfig, OptimizerConfig, OptimizerKind, PredictConfig, TrainConfig,
};
pub use density::{Bracket, ConditionalDensity, DensityCurve, Prediction};
pub use encoder::{HarmonicEncoder, PositionEncoder};
pub use error::{Result, TppError};
pub use eval::{
    batch_evaluate, evaluate, evaluate_checkpoint, BatchEvaluation, Diagnostics, EvalMetrics,
    RayonPool, SequentialPool, WorkerPool,
};
pub use grad::{FiniteDifference, GradientSource};
pub use intensity::{
    relu_plus, soft_plus, AttentionBinder, AttentionIntensity, ClosedFormBinder,
    ClosedFormIntensity, IntensityBinder, IntensityFunction,
};
pub use layer::{CrossAttention, Linear};
pub use likelihood::{criterion, log_likelihood};
pub use model::{AttentionModel, HarmonicModel, PairModel, PairModelConfig, Parameterized};
pub use optim::{AccumulationState, GradientAccumulator, Optimizer};
pub use recorder::{MemoryRecorder, MetricRow, Recorder, RunRecord, Split};
pub use train::{optimize_epoch, train_model, EpochOutcome, EpochReport, TrainPhase};
