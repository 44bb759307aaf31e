//! Integration tests for the training loop.
//!
//! Tests cover resource-exhaustion skipping, the gradient accumulation
//! cadence, debug truncation, the non-finite loss guard and the multi-epoch
//! entry point.

mod helpers;

use approx::assert_relative_eq;
use ruvector_tpp::{
    optimize_epoch, train_model, AttentionBinder, ClosedFormBinder, DataSplits, FiniteDifference,
    MemoryRecorder, NodePair, OptimizerKind, Optimizer, Parameterized, Recorder, SequentialPool,
    Split, TppError, TrainConfig, TrainPhase,
};

use helpers::{random_batches, small_pair_model, FailingAttention, LinearAttention, UnitHarmonic};

fn sgd_config(accumulation_steps: usize) -> TrainConfig {
    TrainConfig {
        learning_rate: 1e-2,
        optimizer: OptimizerKind::Sgd { momentum: 0.0 },
        accumulation_steps,
        ..Default::default()
    }
}

fn fixture() -> LinearAttention {
    LinearAttention {
        slope: 0.1,
        intercept: 0.2,
        scale: 0.0,
    }
}

#[test]
fn test_resource_exhaustion_skips_exactly_one_batch() {
    let batches = random_batches(5, 5, 5, 100);
    let k = 2;
    let mut model = FailingAttention {
        inner: fixture(),
        fail_on: batches[k].pair(),
    };
    let config = sgd_config(8);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();

    assert_eq!(outcome.skipped, vec![k]);
    assert_eq!(outcome.losses.len(), batches.len() - 1);
    let mean = outcome.losses.iter().sum::<f64>() / (batches.len() - 1) as f64;
    assert_relative_eq!(outcome.mean_loss, mean, epsilon = 1e-12);
}

#[test]
fn test_accumulation_steps_every_k_batches() {
    let batches = random_batches(10, 4, 4, 7);
    let mut model = fixture();
    let config = sgd_config(4);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();

    assert_eq!(outcome.losses.len(), 10);
    assert_eq!(outcome.optimizer_steps, 2);
    assert_eq!(outcome.end_phase, TrainPhase::AccumulatingGradient);
    // Two trailing batches are still buffered
    assert!(optimizer.pending_gradient().is_some());
}

#[test]
fn test_no_update_before_window_fills() {
    let batches = random_batches(5, 4, 4, 3);
    let mut model = fixture();
    let before = model.parameters();
    let config = sgd_config(8);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();

    assert_eq!(outcome.optimizer_steps, 0);
    assert_eq!(model.parameters(), before);
    assert!(optimizer.pending_gradient().is_some());
}

#[test]
fn test_update_changes_parameters() {
    let batches = random_batches(4, 5, 4, 12);
    let mut model = fixture();
    let before = model.parameters();
    let config = sgd_config(2);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();

    assert_eq!(outcome.optimizer_steps, 2);
    assert_eq!(outcome.end_phase, TrainPhase::Stepped);
    assert_ne!(model.parameters(), before);
    assert!(optimizer.pending_gradient().is_none());
}

#[test]
fn test_debug_mode_truncates_epoch() {
    let batches = random_batches(20, 4, 4, 5);
    let mut model = fixture();
    let config = TrainConfig {
        debug: true,
        debug_batches: 3,
        ..sgd_config(8)
    };
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();
    // Batch index 3 is the last one processed
    assert_eq!(outcome.losses.len(), 4);
}

#[test]
fn test_debug_mode_default_boundary() {
    let batches = random_batches(20, 3, 4, 6);
    let mut model = fixture();
    let config = TrainConfig {
        debug: true,
        ..sgd_config(8)
    };
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let outcome = optimize_epoch(
        &mut model,
        &batches,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    )
    .unwrap();
    // Indices 0..=10
    assert_eq!(outcome.losses.len(), 11);
}

#[test]
fn test_non_finite_loss_aborts_epoch() {
    let batches = random_batches(3, 4, 2, 9);
    let mut model = UnitHarmonic::new(0.0, -3.0, 2);
    let config = sgd_config(8);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let result = optimize_epoch(
        &mut model,
        &batches,
        &ClosedFormBinder,
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    );
    assert!(matches!(result, Err(TppError::NonFiniteLoss { batch: 0, .. })));
}

#[test]
fn test_other_failures_abort_epoch() {
    // Pair outside the model's node table
    let mut batches = random_batches(2, 4, 2, 1);
    batches.push(ruvector_tpp::Batch::new(NodePair::new(0, 9), vec![0.0, 1.0, 2.0]).unwrap());
    let mut model = UnitHarmonic::positive();
    let config = sgd_config(8);
    let mut optimizer = Optimizer::new(config.optimizer_config());

    let result = optimize_epoch(
        &mut model,
        &batches,
        &ClosedFormBinder,
        &FiniteDifference::default(),
        &mut optimizer,
        &config,
    );
    assert!(matches!(result, Err(TppError::InvalidInput(_))));
}

#[test]
fn test_train_model_records_every_epoch() {
    let splits = DataSplits {
        train: random_batches(4, 5, 4, 30),
        val: Vec::new(),
        test: random_batches(3, 5, 4, 40),
    };
    let mut model = small_pair_model(4, 1);
    let mut recorder = MemoryRecorder::new("run-e2e");
    let config = TrainConfig {
        epochs: 2,
        run_id: "run-e2e".to_string(),
        gpu: Some(0),
        ..sgd_config(2)
    };

    let reports = train_model(
        &mut model,
        &splits,
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &SequentialPool,
        &mut recorder,
        &config,
    )
    .unwrap();

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.train.mean_loss.is_finite());
        assert_eq!(report.test.evaluated, 3);
        assert!(report.test.rmse.is_finite());
    }
    assert_eq!(model.device(), ruvector_tpp::Device::Cuda(0));
    assert_eq!(recorder.metrics(Split::Train).len(), 2);
    assert_eq!(recorder.metrics(Split::Test).len(), 2);
    assert_eq!(recorder.flushed().len(), 2);
    assert_eq!(
        recorder.load_model("run-e2e", "epoch_1").unwrap(),
        Some(model.parameters())
    );
}

#[test]
fn test_train_model_rejects_invalid_config() {
    let mut model = fixture();
    let mut recorder = MemoryRecorder::new("run");
    let config = TrainConfig {
        accumulation_steps: 0,
        ..Default::default()
    };
    let result = train_model(
        &mut model,
        &DataSplits::default(),
        &AttentionBinder::default(),
        &FiniteDifference::default(),
        &SequentialPool,
        &mut recorder,
        &config,
    );
    assert!(matches!(result, Err(TppError::Config(_))));
}
