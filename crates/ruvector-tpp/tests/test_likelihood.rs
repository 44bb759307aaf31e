//! Integration tests for the point-process log-likelihood.

mod helpers;

use approx::assert_relative_eq;
use ruvector_tpp::{
    criterion, log_likelihood, AttentionBinder, Batch, ClosedFormBinder, IntensityBinder,
    IntensityFunction, NodePair,
};

use helpers::{random_sequence, small_pair_model, LinearAttention, UnitHarmonic};

#[test]
fn test_two_timestamps_decompose() {
    let model = small_pair_model(4, 8);
    let b = Batch::new(NodePair::new(0, 3), vec![1.0, 2.3]).unwrap();

    for intensity in [ClosedFormBinder.bind(&model), AttentionBinder::default().bind(&model)] {
        let ll = log_likelihood(&*intensity, &b, b.timestamps()).unwrap();
        let log_lambda = intensity.evaluate(&b, &[1.0], &[2.3]).unwrap()[0].ln();
        let integral = intensity.integral(&b, &[1.0], 1.0, &[2.3]).unwrap()[0];
        if log_lambda.is_finite() {
            assert_relative_eq!(ll, log_lambda - integral, epsilon = 1e-12);
        } else {
            // A non-positive harmonic intensity propagates as -inf/NaN
            assert!(!ll.is_finite());
        }
    }
}

#[test]
fn test_likelihood_sums_over_prefixes() {
    let model = UnitHarmonic::positive();
    let intensity = ClosedFormBinder.bind(&model);
    let timestamps = random_sequence(6, 4);
    let b = Batch::new(NodePair::new(1, 2), timestamps.clone()).unwrap();

    let mut expected = 0.0;
    for i in 0..timestamps.len() - 1 {
        let history = &timestamps[..=i];
        let next = timestamps[i + 1];
        expected += intensity.evaluate(&b, history, &[next]).unwrap()[0].ln();
        expected -= intensity.integral(&b, history, timestamps[i], &[next]).unwrap()[0];
    }

    let ll = log_likelihood(&*intensity, &b, &timestamps).unwrap();
    assert_relative_eq!(ll, expected, epsilon = 1e-12);
    assert_relative_eq!(criterion(&*intensity, &b).unwrap(), -expected, epsilon = 1e-12);
}

#[test]
fn test_constant_rate_likelihood_is_poisson() {
    let model = LinearAttention::constant(0.7);
    let c = model.lambda(0.0);
    let intensity = AttentionBinder::default().bind(&model);
    let timestamps = vec![0.0, 0.4, 1.9, 2.2, 3.0];
    let b = Batch::new(NodePair::new(0, 1), timestamps.clone()).unwrap();

    let ll = log_likelihood(&*intensity, &b, &timestamps).unwrap();
    assert_relative_eq!(ll, 4.0 * c.ln() - c * 3.0, epsilon = 1e-9);
}

#[test]
fn test_negative_intensity_is_not_an_error() {
    // alpha = -3 gives lambda = 1 - 3 + cos(t - 0) < 0
    let model = UnitHarmonic::new(0.0, -3.0, 2);
    let intensity = ClosedFormBinder.bind(&model);
    let b = Batch::new(NodePair::new(0, 1), vec![0.0, 1.0]).unwrap();

    let ll = log_likelihood(&*intensity, &b, b.timestamps()).unwrap();
    assert!(ll.is_nan());
}
