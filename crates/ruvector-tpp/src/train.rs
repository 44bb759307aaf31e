//! Epoch-level training with gradient accumulation and skipping of batches
//! that exhaust compute memory.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{mean, Batch, DataSplits, Device};
use crate::config::{EvalConfig, TrainConfig};
use crate::error::{Result, TppError};
use crate::eval::{evaluate, EvalMetrics, WorkerPool};
use crate::grad::GradientSource;
use crate::intensity::IntensityBinder;
use crate::likelihood::criterion;
use crate::model::Parameterized;
use crate::optim::{AccumulationState, GradientAccumulator, Optimizer};
use crate::recorder::{MetricRow, Recorder, Split};

/// Where the training loop is between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrainPhase {
    /// No epoch in progress
    #[default]
    Idle,
    /// An epoch started and no gradient has been accumulated in it yet
    RunningEpoch,
    /// Gradients are buffered and waiting for the next update
    AccumulatingGradient,
    /// An update was just applied and the buffer cleared
    Stepped,
}

impl TrainPhase {
    /// Phase after a batch's gradient was recorded.
    pub fn after(self, state: AccumulationState) -> Self {
        match state {
            AccumulationState::Pending(_) => TrainPhase::AccumulatingGradient,
            AccumulationState::Ready => TrainPhase::Stepped,
        }
    }
}

/// Result of one pass over the training batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochOutcome {
    /// Mean of the recorded batch losses; NaN when every batch was skipped
    pub mean_loss: f64,
    /// Loss of every batch that completed, in order
    pub losses: Vec<f64>,
    /// Indices of batches skipped for resource exhaustion
    pub skipped: Vec<usize>,
    /// Optimizer updates applied during the epoch
    pub optimizer_steps: usize,
    /// Phase at epoch end; `AccumulatingGradient` means a partial window is
    /// still buffered in the optimizer
    pub end_phase: TrainPhase,
}

/// Per-epoch summary returned by [`train_model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Training pass outcome
    pub train: EpochOutcome,
    /// Test split metrics after the epoch
    pub test: EvalMetrics,
}

/// Run one epoch over `batches`.
///
/// Every batch's NLL gradient is added to the optimizer's buffer; every
/// `config.accumulation_steps` batches the buffered gradient is applied and
/// cleared. A batch failing with [`TppError::ResourceExhausted`] is skipped.
/// Any other failure, including a non-finite loss, aborts the epoch.
pub fn optimize_epoch<M, B, G>(
    model: &mut M,
    batches: &[Batch],
    binder: &B,
    gradients: &G,
    optimizer: &mut Optimizer,
    config: &TrainConfig,
) -> Result<EpochOutcome>
where
    M: Parameterized + ?Sized,
    B: IntensityBinder<M> + ?Sized,
    G: GradientSource<M> + ?Sized,
{
    let device = Device::select(config.gpu);
    let mut accumulator = GradientAccumulator::new(config.accumulation_steps);
    let mut phase = TrainPhase::RunningEpoch;
    let mut losses = Vec::with_capacity(batches.len());
    let mut skipped = Vec::new();
    let steps_before = optimizer.steps_taken();

    for (i, raw) in batches.iter().enumerate() {
        if config.debug && i > config.debug_batches {
            debug!(batch = i, "debug mode: stopping epoch early");
            break;
        }

        let batch = raw.to_device(device);
        match train_batch(model, &batch, i, binder, gradients, optimizer) {
            Ok(loss) => losses.push(loss),
            Err(e) if e.is_resource_exhausted() => {
                warn!(batch = i, pair = ?batch.pair(), error = %e, "skipping batch");
                skipped.push(i);
                continue;
            }
            Err(e) => return Err(e),
        }

        let state = accumulator.record();
        if state == AccumulationState::Ready {
            let mut params = model.parameters();
            optimizer.step(&mut params)?;
            model.set_parameters(&params)?;
            optimizer.zero_grad();
        }
        phase = phase.after(state);
    }

    Ok(EpochOutcome {
        mean_loss: mean(&losses),
        losses,
        skipped,
        optimizer_steps: optimizer.steps_taken() - steps_before,
        end_phase: phase,
    })
}

fn train_batch<M, B, G>(
    model: &mut M,
    batch: &Batch,
    index: usize,
    binder: &B,
    gradients: &G,
    optimizer: &mut Optimizer,
) -> Result<f64>
where
    M: Parameterized + ?Sized,
    B: IntensityBinder<M> + ?Sized,
    G: GradientSource<M> + ?Sized,
{
    let loss = {
        let intensity = binder.bind(&*model);
        criterion(&*intensity, batch)?
    };
    if !loss.is_finite() {
        return Err(TppError::NonFiniteLoss {
            batch: index,
            value: loss,
        });
    }

    let objective = |m: &M| -> Result<f64> {
        let intensity = binder.bind(m);
        criterion(&*intensity, batch)
    };
    let grad = gradients.gradient(model, &objective)?;
    if grad.iter().any(|g| !g.is_finite()) {
        return Err(TppError::NonFiniteGradient { batch: index });
    }
    optimizer.accumulate(&grad)?;
    Ok(loss)
}

/// Train for `config.epochs` epochs, evaluating on the test split and
/// recording after each one.
#[allow(clippy::too_many_arguments)]
pub fn train_model<M, B, G, P>(
    model: &mut M,
    splits: &DataSplits,
    binder: &B,
    gradients: &G,
    pool: &P,
    recorder: &mut dyn Recorder,
    config: &TrainConfig,
) -> Result<Vec<EpochReport>>
where
    M: Parameterized + Sync + ?Sized,
    B: IntensityBinder<M> + ?Sized,
    G: GradientSource<M> + ?Sized,
    P: WorkerPool + ?Sized,
{
    config.validate()?;
    let device = Device::select(config.gpu);
    model.to_device(device);
    let mut optimizer = Optimizer::new(config.optimizer_config());
    let eval_config = EvalConfig {
        debug: config.debug || config.eval.debug,
        ..config.eval.clone()
    };

    info!(
        dataset = %config.dataset,
        run_id = %config.run_id,
        %device,
        epochs = config.epochs,
        train_batches = splits.train.len(),
        test_batches = splits.test.len(),
        "training started"
    );

    let mut reports = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let train = optimize_epoch(model, &splits.train, binder, gradients, &mut optimizer, config)?;
        recorder.save_model(&model.parameters(), epoch)?;

        let test = evaluate(&*model, &splits.test, binder, pool, &eval_config, None)?;
        info!(
            epoch,
            train_loss = train.mean_loss,
            skipped = train.skipped.len(),
            test_loss = test.loss,
            rmse = test.rmse,
            abs_ratio = test.abs_ratio,
            "epoch finished"
        );

        recorder.append_full_metrics(
            Split::Train,
            MetricRow::new(Some(epoch)).with("loss", train.mean_loss),
        )?;
        recorder.append_full_metrics(Split::Test, test.to_row(Some(epoch)))?;
        recorder.save_record()?;

        reports.push(EpochReport { epoch, train, test });
    }

    Ok(reports)
}
