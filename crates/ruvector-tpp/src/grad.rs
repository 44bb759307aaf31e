//! Gradients of a scalar objective with respect to a model's flat
//! parameter vector.
//!
//! The training loop is written against [`GradientSource`], so an autodiff
//! backend can replace the bundled [`FiniteDifference`] estimator without
//! touching the loop.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Parameterized;

/// Computes `d objective / d parameters` at the model's current parameters.
pub trait GradientSource<M: ?Sized>: Send + Sync {
    /// Gradient with one entry per flat parameter.
    ///
    /// The model's parameters are the same on return as on entry, whether
    /// or not the call succeeds.
    fn gradient(
        &self,
        model: &mut M,
        objective: &dyn Fn(&M) -> Result<f64>,
    ) -> Result<Array1<f64>>;
}

/// Central finite differences over every parameter.
///
/// Costs `2 * num_parameters()` objective evaluations per gradient, including
/// parameters the objective does not depend on (such as embedding rows of
/// nodes outside the batch). Only practical for small models; large models
/// need an analytic [`GradientSource`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiniteDifference {
    /// Perturbation applied on each side of a parameter
    pub step: f64,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self { step: 1e-5 }
    }
}

impl FiniteDifference {
    /// Estimator with a custom perturbation
    pub fn new(step: f64) -> Self {
        Self { step }
    }

    fn central_differences<M: Parameterized + ?Sized>(
        &self,
        model: &mut M,
        objective: &dyn Fn(&M) -> Result<f64>,
        base: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        let h = self.step;
        let mut shifted = base.clone();
        let mut grad = Array1::zeros(base.len());

        for i in 0..base.len() {
            shifted[i] = base[i] + h;
            model.set_parameters(&shifted)?;
            let up = objective(model)?;

            shifted[i] = base[i] - h;
            model.set_parameters(&shifted)?;
            let down = objective(model)?;

            shifted[i] = base[i];
            grad[i] = (up - down) / (2.0 * h);
        }
        Ok(grad)
    }
}

impl<M: Parameterized + ?Sized> GradientSource<M> for FiniteDifference {
    fn gradient(
        &self,
        model: &mut M,
        objective: &dyn Fn(&M) -> Result<f64>,
    ) -> Result<Array1<f64>> {
        let base = model.parameters();
        let result = self.central_differences(model, objective, &base);
        let restored = model.set_parameters(&base);
        let grad = result?;
        restored?;
        Ok(grad)
    }
}
