//! Optimizers over flat parameter vectors and the gradient accumulation
//! counter used by the training loop.

use ndarray::Array1;
use tracing::debug;

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::error::{Result, TppError};

/// Optimizer state storage
#[derive(Debug, Clone)]
enum OptimizerState {
    /// SGD with momentum state
    Sgd {
        /// Momentum buffer (velocity)
        velocity: Option<Array1<f64>>,
    },
    /// Adam optimizer state
    Adam {
        /// First moment estimate (mean of gradients)
        m: Option<Array1<f64>>,
        /// Second moment estimate (uncentered variance of gradients)
        v: Option<Array1<f64>>,
        /// Timestep counter
        t: usize,
    },
}

/// Optimizer with an internal gradient buffer.
///
/// Gradients are summed into the buffer by [`accumulate`](Self::accumulate)
/// and applied by [`step`](Self::step); [`zero_grad`](Self::zero_grad)
/// clears the buffer. The buffer is only cleared explicitly.
#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
    state: OptimizerState,
    grad: Option<Array1<f64>>,
    steps: usize,
}

impl Optimizer {
    /// Create a new optimizer
    pub fn new(config: OptimizerConfig) -> Self {
        let state = match config.kind {
            OptimizerKind::Sgd { .. } => OptimizerState::Sgd { velocity: None },
            OptimizerKind::Adam { .. } => OptimizerState::Adam {
                m: None,
                v: None,
                t: 0,
            },
        };

        Self {
            config,
            state,
            grad: None,
            steps: 0,
        }
    }

    /// Configured step size
    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    /// Number of updates applied so far
    pub fn steps_taken(&self) -> usize {
        self.steps
    }

    /// Gradient currently held in the buffer
    pub fn pending_gradient(&self) -> Option<&Array1<f64>> {
        self.grad.as_ref()
    }

    /// Add `grads` to the gradient buffer.
    pub fn accumulate(&mut self, grads: &Array1<f64>) -> Result<()> {
        match &mut self.grad {
            Some(buf) => {
                if buf.len() != grads.len() {
                    return Err(TppError::dimension_mismatch(
                        format!("{} gradient entries", buf.len()),
                        format!("{} gradient entries", grads.len()),
                    ));
                }
                *buf += grads;
            }
            None => self.grad = Some(grads.clone()),
        }
        Ok(())
    }

    /// Clear the gradient buffer.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// Apply the buffered gradient to `params`.
    ///
    /// The L2 penalty `weight_decay * params` is added to the gradient
    /// before the update. An empty buffer leaves `params` untouched.
    pub fn step(&mut self, params: &mut Array1<f64>) -> Result<()> {
        let Some(buffered) = &self.grad else {
            return Ok(());
        };
        if params.len() != buffered.len() {
            return Err(TppError::dimension_mismatch(
                format!("{} parameters", buffered.len()),
                format!("{} parameters", params.len()),
            ));
        }

        let grads = if self.config.weight_decay > 0.0 {
            buffered + &(params.mapv(|p| p * self.config.weight_decay))
        } else {
            buffered.clone()
        };
        let learning_rate = self.config.learning_rate;

        match (self.config.kind, &mut self.state) {
            (OptimizerKind::Sgd { momentum }, OptimizerState::Sgd { velocity }) => {
                Self::sgd_step_with_momentum(params, &grads, learning_rate, momentum, velocity)
            }
            (
                OptimizerKind::Adam {
                    beta1,
                    beta2,
                    epsilon,
                },
                OptimizerState::Adam { m, v, t },
            ) => Self::adam_step(params, &grads, learning_rate, beta1, beta2, epsilon, m, v, t),
            _ => {
                return Err(TppError::invalid_input(
                    "Optimizer kind and state mismatch",
                ))
            }
        }

        self.steps += 1;
        debug!(step = self.steps, learning_rate, "optimizer step applied");
        Ok(())
    }

    /// SGD step with momentum
    ///
    /// Implements: v_t = momentum * v_{t-1} + learning_rate * grad
    ///             params = params - v_t
    fn sgd_step_with_momentum(
        params: &mut Array1<f64>,
        grads: &Array1<f64>,
        learning_rate: f64,
        momentum: f64,
        velocity: &mut Option<Array1<f64>>,
    ) {
        if momentum == 0.0 {
            *params -= &(grads * learning_rate);
            return;
        }

        let v = velocity.get_or_insert_with(|| Array1::zeros(params.len()));
        *v = v.mapv(|x| x * momentum) + grads * learning_rate;
        *params -= &*v;
    }

    /// Adam step
    ///
    /// 1. m_t = beta1 * m_{t-1} + (1 - beta1) * g_t
    /// 2. v_t = beta2 * v_{t-1} + (1 - beta2) * g_t^2
    /// 3. params -= lr * m_hat / (sqrt(v_hat) + epsilon), with bias-corrected
    ///    m_hat and v_hat
    #[allow(clippy::too_many_arguments)]
    fn adam_step(
        params: &mut Array1<f64>,
        grads: &Array1<f64>,
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        m: &mut Option<Array1<f64>>,
        v: &mut Option<Array1<f64>>,
        t: &mut usize,
    ) {
        let m_buf = m.get_or_insert_with(|| Array1::zeros(params.len()));
        let v_buf = v.get_or_insert_with(|| Array1::zeros(params.len()));

        *t += 1;
        *m_buf = m_buf.mapv(|x| x * beta1) + grads * (1.0 - beta1);
        *v_buf = v_buf.mapv(|x| x * beta2) + grads.mapv(|g| g * g) * (1.0 - beta2);

        let bias_correction1 = 1.0 - beta1.powi(*t as i32);
        let bias_correction2 = 1.0 - beta2.powi(*t as i32);

        for ((param, &m_val), &v_val) in params.iter_mut().zip(m_buf.iter()).zip(v_buf.iter()) {
            let m_hat = m_val / bias_correction1;
            let v_hat = v_val / bias_correction2;
            *param -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }
    }
}

/// Outcome of recording one batch in a [`GradientAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationState {
    /// More batches are needed before the next update; holds the count so far.
    Pending(usize),
    /// The accumulation window is full and the counter was reset.
    Ready,
}

/// Counts batches between optimizer updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientAccumulator {
    every: usize,
    pending: usize,
}

impl GradientAccumulator {
    /// Fire every `every` batches (at least 1).
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            pending: 0,
        }
    }

    /// Window size
    pub fn every(&self) -> usize {
        self.every
    }

    /// Batches recorded since the last update
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Record one accumulated batch.
    pub fn record(&mut self) -> AccumulationState {
        self.pending += 1;
        if self.pending == self.every {
            self.pending = 0;
            AccumulationState::Ready
        } else {
            AccumulationState::Pending(self.pending)
        }
    }

    /// Drop any partial window.
    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sgd(momentum: f64, weight_decay: f64) -> Optimizer {
        Optimizer::new(OptimizerConfig {
            kind: OptimizerKind::Sgd { momentum },
            learning_rate: 0.1,
            weight_decay,
        })
    }

    #[test]
    fn test_sgd_applies_summed_gradient() {
        let mut opt = sgd(0.0, 0.0);
        opt.accumulate(&array![1.0, 2.0]).unwrap();
        opt.accumulate(&array![1.0, 0.0]).unwrap();

        let mut params = array![0.0, 0.0];
        opt.step(&mut params).unwrap();
        assert_abs_diff_eq!(params[0], -0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(params[1], -0.2, epsilon = 1e-12);
        assert_eq!(opt.steps_taken(), 1);
    }

    #[test]
    fn test_step_without_gradient_is_noop() {
        let mut opt = sgd(0.9, 0.0);
        let mut params = array![1.0];
        opt.step(&mut params).unwrap();
        assert_eq!(params, array![1.0]);
        assert_eq!(opt.steps_taken(), 0);
    }

    #[test]
    fn test_sgd_momentum_accumulates_velocity() {
        let mut opt = sgd(0.9, 0.0);
        let mut params = array![0.0];
        opt.accumulate(&array![1.0]).unwrap();
        opt.step(&mut params).unwrap();
        opt.step(&mut params).unwrap();
        // v1 = 0.1, v2 = 0.09 + 0.1
        assert_abs_diff_eq!(params[0], -0.29, epsilon = 1e-12);
    }

    #[test]
    fn test_weight_decay_pulls_towards_zero() {
        let mut opt = sgd(0.0, 0.5);
        let mut params = array![2.0];
        opt.accumulate(&array![0.0]).unwrap();
        opt.step(&mut params).unwrap();
        assert_abs_diff_eq!(params[0], 2.0 - 0.1 * 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut opt = Optimizer::new(OptimizerConfig {
            learning_rate: 0.01,
            ..Default::default()
        });
        let mut params = array![1.0, -1.0];
        opt.accumulate(&array![3.0, -0.5]).unwrap();
        opt.step(&mut params).unwrap();
        // Bias-corrected first step is lr * sign(g)
        assert_abs_diff_eq!(params[0], 0.99, epsilon = 1e-6);
        assert_abs_diff_eq!(params[1], -0.99, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_grad_and_shape_checks() {
        let mut opt = sgd(0.0, 0.0);
        opt.accumulate(&array![1.0, 1.0]).unwrap();
        assert!(opt.accumulate(&array![1.0]).is_err());
        assert!(opt.step(&mut array![0.0]).is_err());
        opt.zero_grad();
        assert!(opt.pending_gradient().is_none());
    }

    #[test]
    fn test_accumulator_fires_every_k() {
        let mut acc = GradientAccumulator::new(3);
        assert_eq!(acc.record(), AccumulationState::Pending(1));
        assert_eq!(acc.record(), AccumulationState::Pending(2));
        assert_eq!(acc.record(), AccumulationState::Ready);
        assert_eq!(acc.pending(), 0);
        acc.record();
        acc.reset();
        assert_eq!(acc.pending(), 0);
        assert_eq!(GradientAccumulator::new(0).every(), 1);
    }
}
