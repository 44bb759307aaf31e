//! Configuration types for training, evaluation and the numerical knobs.
//!
//! The Monte Carlo subdivision count, the prediction sample count and the
//! diagnostic curve resolution are independent settings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TppError};

/// Composite Monte Carlo integration settings for intensities without a
/// closed-form integral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegralConfig {
    /// Evaluation points per integration segment.
    pub subdivisions: usize,
    /// Offset applied to the start of the first segment so that the first
    /// query point lies strictly after the last observed event.
    pub start_offset: f64,
}

impl Default for IntegralConfig {
    fn default() -> Self {
        Self {
            subdivisions: 10,
            start_offset: 1e-6,
        }
    }
}

/// Adaptive bracketing and sampling used by next-event-time prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictConfig {
    /// Lower edge of the target density band.
    pub density_low: f64,
    /// Upper edge of the target density band.
    pub density_high: f64,
    /// Maximum number of horizon adjustments.
    pub max_iterations: usize,
    /// The horizon is never shrunk closer than this to the last event.
    pub min_horizon: f64,
    /// Number of candidate times sampled inside the final horizon.
    pub samples: usize,
    /// Added to the mass total before renormalizing.
    pub normalization_epsilon: f64,
    /// Density integrals are clipped to `[-integral_clip, integral_clip]`
    /// before exponentiation.
    pub integral_clip: f64,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            density_low: 1e-3,
            density_high: 0.1,
            max_iterations: 20,
            min_horizon: 1e-2,
            samples: 15,
            normalization_epsilon: 1e-6,
            integral_clip: 100.0,
        }
    }
}

/// Evaluation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Prediction settings.
    pub predict: PredictConfig,
    /// Record a sampled density curve and interval arrays per batch.
    pub diagnostics: bool,
    /// Resolution of the diagnostic density curve.
    pub curve_points: usize,
    /// Stop after batch index `debug_batches` when set.
    pub debug: bool,
    /// Index of the last batch evaluated in debug mode (inclusive).
    pub debug_batches: usize,
    /// Guards the absolute-ratio denominator.
    pub ratio_epsilon: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            predict: PredictConfig::default(),
            diagnostics: false,
            curve_points: 100,
            debug: false,
            debug_batches: 100,
            ratio_epsilon: 1e-6,
        }
    }
}

/// Optimizer family and its hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Stochastic gradient descent
    Sgd {
        /// Momentum coefficient (0.0 = no momentum)
        momentum: f64,
    },
    /// Adam
    Adam {
        /// Exponential decay rate for the first moment
        beta1: f64,
        /// Exponential decay rate for the second moment
        beta2: f64,
        /// Numerical stability term
        epsilon: f64,
    },
}

impl Default for OptimizerKind {
    fn default() -> Self {
        Self::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Fully resolved optimizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Optimizer family
    pub kind: OptimizerKind,
    /// Step size
    pub learning_rate: f64,
    /// L2 penalty folded into the gradient before each step
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::default(),
            learning_rate: 1e-3,
            weight_decay: 0.0,
        }
    }
}

/// Options recognized by the training and evaluation entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of passes over the training batches.
    pub epochs: usize,
    /// Optimizer step size.
    pub learning_rate: f64,
    /// L2 weight decay.
    pub l2: f64,
    /// Optimizer family.
    pub optimizer: OptimizerKind,
    /// Batches accumulated per optimizer step.
    pub accumulation_steps: usize,
    /// Truncate loops for fast iteration.
    pub debug: bool,
    /// Index of the last training batch processed in debug mode (inclusive).
    pub debug_batches: usize,
    /// GPU ordinal; `None` selects the CPU.
    pub gpu: Option<usize>,
    /// Dataset name used to namespace records.
    pub dataset: String,
    /// Identifier of this run.
    pub run_id: String,
    /// Run to load when evaluating a saved checkpoint.
    pub eval_run: Option<String>,
    /// Name of the parameter state to load for checkpoint evaluation.
    pub state_name: String,
    /// Evaluation settings.
    pub eval: EvalConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 1e-3,
            l2: 0.0,
            optimizer: OptimizerKind::default(),
            accumulation_steps: 8,
            debug: false,
            debug_batches: 10,
            gpu: None,
            dataset: String::from("default"),
            run_id: String::from("run"),
            eval_run: None,
            state_name: String::from("best"),
            eval: EvalConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Reject values the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.accumulation_steps == 0 {
            return Err(TppError::config("accumulation_steps must be at least 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TppError::config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(TppError::config(format!("l2 must be non-negative, got {}", self.l2)));
        }
        let predict = &self.eval.predict;
        if predict.samples == 0 {
            return Err(TppError::config("predict.samples must be at least 1"));
        }
        if !(predict.density_low < predict.density_high) {
            return Err(TppError::config(format!(
                "density band [{}, {}] is empty",
                predict.density_low, predict.density_high
            )));
        }
        if self.eval.diagnostics && self.eval.curve_points == 0 {
            return Err(TppError::config("curve_points must be at least 1"));
        }
        Ok(())
    }

    /// Optimizer settings derived from this configuration.
    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            kind: self.optimizer,
            learning_rate: self.learning_rate,
            weight_decay: self.l2,
        }
    }
}
