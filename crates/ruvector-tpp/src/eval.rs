//! Evaluation: per-batch loss and next-event prediction error, aggregated
//! over a split.
//!
//! Batches are independent, so they can be fanned out to a [`WorkerPool`].
//! Results come back in input order and are aggregated the same way
//! whichever pool ran them.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::{mean, Batch, Device, NodePair};
use crate::config::{EvalConfig, TrainConfig};
use crate::density::{ConditionalDensity, DensityCurve};
use crate::error::{Result, TppError};
use crate::intensity::IntensityBinder;
use crate::likelihood::criterion;
use crate::model::Parameterized;
use crate::recorder::{MetricRow, Recorder, Split};

/// Executes independent jobs, returning results in input order.
pub trait WorkerPool {
    /// Run `job` on every item.
    fn run_queue<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send;
}

/// Runs jobs one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPool;

impl WorkerPool for SequentialPool {
    fn run_queue<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        items.iter().map(job).collect()
    }
}

/// Runs jobs on a rayon thread pool.
pub struct RayonPool {
    pool: Option<rayon::ThreadPool>,
}

impl RayonPool {
    /// Dedicated pool with `num_threads` workers (0 = auto-detect).
    ///
    /// Falls back to the global rayon pool if the dedicated one cannot be
    /// built.
    pub fn new(num_threads: usize) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "failed to build thread pool, using the global pool");
                None
            }
        };
        Self { pool }
    }

    /// Use the global rayon pool.
    pub fn global() -> Self {
        Self { pool: None }
    }
}

impl WorkerPool for RayonPool {
    fn run_queue<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(&job).collect()),
            None => items.par_iter().map(&job).collect(),
        }
    }
}

/// Density curve and interval array recorded in diagnostic mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Density sampled after the last history event
    pub curve: DensityCurve,
    /// Observed intervals of the full sequence followed by the predicted one
    pub intervals: Vec<f64>,
}

/// Metrics of one evaluated batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    /// Evaluated pair
    pub pair: NodePair,
    /// Negative log-likelihood of the full sequence
    pub loss: f64,
    /// Predicted next event time
    pub prediction: f64,
    /// Held-out final event time
    pub target: f64,
    /// `(prediction - target)^2`
    pub squared_error: f64,
    /// `|prediction - target|` over the mean interval of the full sequence
    pub abs_ratio: f64,
    /// Present when diagnostics are enabled
    pub diagnostics: Option<Diagnostics>,
}

/// Aggregate metrics of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean loss
    pub loss: f64,
    /// Root mean squared prediction error
    pub rmse: f64,
    /// Mean absolute ratio
    pub abs_ratio: f64,
    /// Batches that produced metrics
    pub evaluated: usize,
    /// Batches dropped because evaluation failed
    pub failed: usize,
}

impl EvalMetrics {
    /// Aggregate per-batch results. Empty input gives NaN metrics.
    pub fn from_batches(results: &[BatchEvaluation], failed: usize) -> Self {
        let losses: Vec<f64> = results.iter().map(|r| r.loss).collect();
        let squared: Vec<f64> = results.iter().map(|r| r.squared_error).collect();
        let ratios: Vec<f64> = results.iter().map(|r| r.abs_ratio).collect();
        Self {
            loss: mean(&losses),
            rmse: mean(&squared).sqrt(),
            abs_ratio: mean(&ratios),
            evaluated: results.len(),
            failed,
        }
    }

    /// Metric row for a recorder.
    pub fn to_row(&self, epoch: Option<usize>) -> MetricRow {
        MetricRow::new(epoch)
            .with("loss", self.loss)
            .with("rmse", self.rmse)
            .with("abs_ratio", self.abs_ratio)
    }
}

/// Evaluate one batch: loss over the full sequence, prediction of the final
/// event from the rest.
pub fn batch_evaluate<M, B>(
    model: &M,
    binder: &B,
    batch: &Batch,
    config: &EvalConfig,
) -> Result<BatchEvaluation>
where
    M: ?Sized,
    B: IntensityBinder<M> + ?Sized,
{
    let intensity = binder.bind(model);
    let loss = criterion(&*intensity, batch)?;

    let (history, target) = batch.split_target();
    let density = ConditionalDensity::new(&*intensity, config.predict);
    let prediction = density.predict(batch, history)?.time;

    let full_intervals = batch.intervals();
    let error = prediction - target;
    let abs_ratio = error.abs() / (mean(&full_intervals) + config.ratio_epsilon);

    let diagnostics = if config.diagnostics {
        let curve = density.sample_curve(batch, history, config.curve_points)?;
        let last = history.last().copied().unwrap_or(target);
        let mut intervals = full_intervals;
        intervals.push(prediction - last);
        Some(Diagnostics { curve, intervals })
    } else {
        None
    };

    Ok(BatchEvaluation {
        pair: batch.pair(),
        loss,
        prediction,
        target,
        squared_error: error * error,
        abs_ratio,
        diagnostics,
    })
}

/// Evaluate every batch and aggregate.
///
/// A batch whose evaluation fails is logged and left out of the aggregates.
/// Diagnostics, when enabled, are appended to `recorder`.
pub fn evaluate<M, B, P>(
    model: &M,
    batches: &[Batch],
    binder: &B,
    pool: &P,
    config: &EvalConfig,
    recorder: Option<&mut dyn Recorder>,
) -> Result<EvalMetrics>
where
    M: Sync + ?Sized,
    B: IntensityBinder<M> + ?Sized,
    P: WorkerPool + ?Sized,
{
    let selected = if config.debug {
        &batches[..batches.len().min(config.debug_batches + 1)]
    } else {
        batches
    };

    let outcomes = pool.run_queue(selected, |batch| batch_evaluate(model, binder, batch, config));

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failed = 0;
    for (batch, outcome) in selected.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(pair = ?batch.pair(), error = %e, "batch evaluation failed, dropping it");
                failed += 1;
            }
        }
    }

    if let Some(recorder) = recorder {
        for result in &results {
            if let Some(diagnostics) = &result.diagnostics {
                recorder.append_diagnostics(result.pair, diagnostics)?;
            }
        }
    }

    Ok(EvalMetrics::from_batches(&results, failed))
}

/// Load a saved parameter state and evaluate it on `batches`.
///
/// The state is looked up under `config.eval_run` (or `config.run_id`) and
/// `config.state_name`.
pub fn evaluate_checkpoint<M, B, P>(
    model: &mut M,
    batches: &[Batch],
    binder: &B,
    pool: &P,
    recorder: &mut dyn Recorder,
    config: &TrainConfig,
) -> Result<EvalMetrics>
where
    M: Parameterized + Sync + ?Sized,
    B: IntensityBinder<M> + ?Sized,
    P: WorkerPool + ?Sized,
{
    config.validate()?;
    let run_id = config.eval_run.as_deref().unwrap_or(&config.run_id);
    let params = recorder
        .load_model(run_id, &config.state_name)?
        .ok_or_else(|| TppError::CheckpointMissing {
            run_id: run_id.to_string(),
            name: config.state_name.clone(),
        })?;
    model.set_parameters(&params)?;

    let device = Device::select(config.gpu);
    model.to_device(device);

    let eval_config = EvalConfig {
        debug: config.debug || config.eval.debug,
        ..config.eval.clone()
    };
    let metrics = evaluate(&*model, batches, binder, pool, &eval_config, Some(&mut *recorder))?;

    recorder.append_full_metrics(Split::Test, metrics.to_row(None))?;
    recorder.save_record()?;
    info!(
        run_id,
        state = %config.state_name,
        %device,
        loss = metrics.loss,
        rmse = metrics.rmse,
        abs_ratio = metrics.abs_ratio,
        "checkpoint evaluated"
    );
    Ok(metrics)
}
