//! Deterministic stand-ins for score models and oracles, for tests.

use burn::prelude::*;
use design_task::{DesignBatch, DesignEvaluator};

use crate::sampler::ScoreModel;

/// Model with a constant drift and constant diffusion coefficient. Ignores
/// guidance and lambda.
#[derive(Debug, Clone)]
pub struct ConstantScoreModel {
    pub drift: f32,
    pub diffusion: f32,
    pub horizon: f64,
}

impl ConstantScoreModel {
    pub fn new(drift: f32, diffusion: f32) -> Self {
        Self {
            drift,
            diffusion,
            horizon: 1.0,
        }
    }

    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = horizon;
        self
    }
}

impl<B: Backend> ScoreModel<B> for ConstantScoreModel {
    fn horizon(&self) -> f64 {
        self.horizon
    }

    fn drift(
        &self,
        _t: f64,
        x: Tensor<B, 2>,
        _cond: Tensor<B, 2>,
        _guidance: f64,
        _lambda: f64,
    ) -> Tensor<B, 2> {
        x.zeros_like().add_scalar(self.drift)
    }

    fn diffusion(&self, _t: f64, x: Tensor<B, 2>, _lambda: f64) -> Tensor<B, 2> {
        x.ones_like().mul_scalar(self.diffusion)
    }
}

/// Zero-drift unit-diffusion model whose drift is NaN on the listed rows.
#[derive(Debug, Clone)]
pub struct PoisonedRowsModel {
    pub rows: Vec<usize>,
}

impl<B: Backend> ScoreModel<B> for PoisonedRowsModel {
    fn horizon(&self) -> f64 {
        1.0
    }

    fn drift(
        &self,
        _t: f64,
        x: Tensor<B, 2>,
        _cond: Tensor<B, 2>,
        _guidance: f64,
        _lambda: f64,
    ) -> Tensor<B, 2> {
        let [n, d] = x.dims();
        let mut values = vec![0.0f32; n * d];
        for &r in self.rows.iter().filter(|&&r| r < n) {
            values[r * d] = f32::NAN;
        }
        Tensor::from_data(TensorData::new(values, [n, d]), &x.device())
    }

    fn diffusion(&self, _t: f64, x: Tensor<B, 2>, _lambda: f64) -> Tensor<B, 2> {
        x.ones_like()
    }
}

/// Oracle scoring each design by the sum of its coordinates.
#[derive(Debug, Clone, Default)]
pub struct LinearOracle;

impl DesignEvaluator for LinearOracle {
    fn name(&self) -> &str {
        "linear"
    }

    fn bounds(&self) -> Option<&[(f32, f32)]> {
        None
    }

    fn evaluate(&self, designs: &DesignBatch) -> anyhow::Result<Vec<f32>> {
        Ok(designs.rows().map(|row| row.iter().sum()).collect())
    }
}
