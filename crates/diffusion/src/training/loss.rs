//! Weighted denoising losses for the conditional score network.
//!
//! Per example, with `t ~ U(t_min, T)`, `ε ~ N(0, I)` and
//! `x_t = m(t)·x₀ + std(t)·ε`:
//!
//! - `Standard`: `½‖a·std(t)/g(t) + ε‖²` (the network output `a` models `g·∇log p`)
//! - `ScoreMatching`: `½‖a·std(t) + ε‖²` (the network output models `∇log p`)
//!
//! The batch loss is the mean of `weight · per-example loss`.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::bridge::{column_tensor, values_to_tensor};
use crate::model::score_net::ScoreNet;
use crate::sampler::draw_standard_normal;

/// Which quantity the score network is trained to output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    Standard,
    ScoreMatching,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::ScoreMatching => write!(f, "score_matching"),
        }
    }
}

impl FromStr for LossKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(Self::Standard),
            "score_matching" => Ok(Self::ScoreMatching),
            other => Err(format!(
                "unknown loss '{other}' (expected 'standard' or 'score_matching')"
            )),
        }
    }
}

/// Random draws for one denoising step, kept on the host.
#[derive(Debug, Clone)]
pub struct DenoisingNoise {
    /// Diffusion time per example.
    pub t: Vec<f32>,
    /// Standard normal noise, row-major `(n, d)`.
    pub eps: Vec<f32>,
    /// 1 keeps the condition, 0 drops it.
    pub keep: Vec<f32>,
}

impl DenoisingNoise {
    pub fn sample(
        rng: &mut impl Rng,
        n: usize,
        d: usize,
        t_min: f64,
        horizon: f64,
        cond_drop_prob: f64,
    ) -> Self {
        let t = (0..n)
            .map(|_| rng.gen_range(t_min..=horizon) as f32)
            .collect();
        let eps = draw_standard_normal(rng, n * d);
        let keep = (0..n)
            .map(|_| if rng.gen_bool(cond_drop_prob.clamp(0.0, 1.0)) { 0.0 } else { 1.0 })
            .collect();
        Self { t, eps, keep }
    }
}

/// Weighted denoising loss over a batch.
///
/// Shapes: `x0` `(n, d)`, `y` and `weights` `(n, 1)`. Returns a scalar tensor `(1,)`.
pub fn denoising_loss<B: Backend>(
    model: &ScoreNet<B>,
    x0: Tensor<B, 2>,
    y: Tensor<B, 2>,
    weights: Tensor<B, 2>,
    noise: &DenoisingNoise,
) -> Tensor<B, 1> {
    let device = x0.device();
    let [n, d] = x0.dims();
    let sde = model.sde();

    let mean: Vec<f32> = noise.t.iter().map(|&t| sde.mean_weight(t as f64) as f32).collect();
    let std: Vec<f32> = noise.t.iter().map(|&t| sde.std(t as f64) as f32).collect();
    let scale: Vec<f32> = match model.loss_kind() {
        LossKind::Standard => noise
            .t
            .iter()
            .zip(&std)
            .map(|(&t, &s)| s / sde.g(t as f64) as f32)
            .collect(),
        LossKind::ScoreMatching => std.clone(),
    };

    let eps = values_to_tensor::<B>(noise.eps.clone(), n, d, &device);
    let x_t = x0 * column_tensor::<B>(&mean, &device)
        + eps.clone() * column_tensor::<B>(&std, &device);

    let a = model.forward(
        x_t,
        column_tensor::<B>(&noise.t, &device),
        y,
        column_tensor::<B>(&noise.keep, &device),
    );
    let residual = a * column_tensor::<B>(&scale, &device) + eps;
    let per_example = residual.powf_scalar(2.0).sum_dim(1).mul_scalar(0.5);

    (per_example * weights).mean()
}
