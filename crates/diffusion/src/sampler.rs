//! Reverse-time Euler–Maruyama sampler.
//!
//! Integrates `dx = mu(t, x, y, w, λ) dt + sigma(t, x, λ) dW` from noise at
//! `t = 0` to designs at `t = T` on a uniform grid. `λ = 0` is the reverse SDE
//! and `λ = 1` the probability-flow ODE. Noise comes from the caller's RNG so
//! a fixed seed gives a fixed trajectory.

use burn::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::model::bridge::values_to_tensor;

/// A trained conditional model queried by the sampler.
///
/// Time `t` is sampler time; implementations map it to their own clock.
pub trait ScoreModel<B: Backend> {
    /// Integration horizon `T`.
    fn horizon(&self) -> f64;

    /// Reverse drift. `x` is `(n, d)`, `cond` is `(n, 1)`; returns `(n, d)`.
    fn drift(
        &self,
        t: f64,
        x: Tensor<B, 2>,
        cond: Tensor<B, 2>,
        guidance: f64,
        lambda: f64,
    ) -> Tensor<B, 2>;

    /// Reverse diffusion coefficient, broadcast to the shape of `x`.
    fn diffusion(&self, t: f64, x: Tensor<B, 2>, lambda: f64) -> Tensor<B, 2>;
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("num_steps must be at least 1")]
    ZeroSteps,

    #[error("{targets} target scores for a batch of {batch}")]
    TargetCountMismatch { targets: usize, batch: usize },

    #[error("lambda must be in [0, 1], got {0}")]
    InvalidLambda(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub num_steps: usize,
    pub guidance_strength: f64,
    /// SDE/ODE interpolation: 0 samples the reverse SDE, 1 follows the
    /// probability-flow ODE without noise.
    pub lambda: f64,
    /// Keep the state after every step instead of only the final one.
    pub keep_all_samples: bool,
}

impl SamplerConfig {
    pub fn new(num_steps: usize, guidance_strength: f64) -> Self {
        Self {
            num_steps,
            guidance_strength,
            lambda: 0.0,
            keep_all_samples: false,
        }
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_keep_all_samples(mut self, keep_all_samples: bool) -> Self {
        self.keep_all_samples = keep_all_samples;
        self
    }
}

/// `n` independent draws from N(0, 1).
pub fn draw_standard_normal(rng: &mut impl Rng, n: usize) -> Vec<f32> {
    (0..n).map(|_| StandardNormal.sample(rng)).collect()
}

/// Run the sampler from `initial_noise` toward `target_scores`.
///
/// Returns `num_steps` states when `keep_all_samples` is set, otherwise only
/// the final state. Non-finite values are passed through untouched.
pub fn euler_maruyama<B: Backend, M: ScoreModel<B>>(
    model: &M,
    initial_noise: Tensor<B, 2>,
    target_scores: Tensor<B, 2>,
    config: &SamplerConfig,
    rng: &mut impl Rng,
) -> Result<Vec<Tensor<B, 2>>, SamplerError> {
    if config.num_steps == 0 {
        return Err(SamplerError::ZeroSteps);
    }
    if !(0.0..=1.0).contains(&config.lambda) {
        return Err(SamplerError::InvalidLambda(config.lambda));
    }
    let [n, d] = initial_noise.dims();
    let targets = target_scores.dims()[0];
    if targets != n {
        return Err(SamplerError::TargetCountMismatch { targets, batch: n });
    }

    let device = initial_noise.device();
    let horizon = model.horizon();
    let delta = horizon / config.num_steps as f64;
    let sqrt_delta = delta.sqrt();
    let capacity = if config.keep_all_samples { config.num_steps } else { 1 };
    let mut states = Vec::with_capacity(capacity);

    let mut x = initial_noise;
    for i in 0..config.num_steps {
        let t = i as f64 / config.num_steps as f64 * horizon;
        let mu = model.drift(
            t,
            x.clone(),
            target_scores.clone(),
            config.guidance_strength,
            config.lambda,
        );
        let sigma = model.diffusion(t, x.clone(), config.lambda);
        let eps = values_to_tensor::<B>(draw_standard_normal(rng, n * d), n, d, &device);

        x = x + mu.mul_scalar(delta) + (sigma * eps).mul_scalar(sqrt_delta);

        if config.keep_all_samples || i + 1 == config.num_steps {
            states.push(x.clone());
        }
    }

    tracing::debug!(
        steps = config.num_steps,
        batch = n,
        kept = states.len(),
        guidance = config.guidance_strength,
        lambda = config.lambda,
        "Sampling finished"
    );
    Ok(states)
}
