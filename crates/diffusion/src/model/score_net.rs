use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;

use crate::model::bridge::constant_column;
use crate::model::sde::{VpSde, VpSdeConfig};
use crate::sampler::ScoreModel;
use crate::training::loss::LossKind;

/// Configuration for the conditional score network.
///
/// ```text
/// (batch, design_dim + 3) = [x, s, y·keep, keep]
///   → Linear(design_dim+3 → hidden_dim) → SiLU → Dropout
///   → (num_hidden_layers − 1) × [Linear(hidden_dim → hidden_dim) → SiLU → Dropout]
///   → Linear(hidden_dim → design_dim)
///   → output: (batch, design_dim)
/// ```
///
/// `keep = 0` is the null condition used for classifier-free guidance.
#[derive(Config, Debug)]
pub struct ScoreNetConfig {
    /// Flattened design dimension.
    pub design_dim: usize,
    #[config(default = 256)]
    pub hidden_dim: usize,
    #[config(default = 3)]
    pub num_hidden_layers: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
    #[config(default = "VpSdeConfig::new()")]
    pub sde: VpSdeConfig,
    /// What the network output parameterizes.
    #[config(default = "LossKind::Standard")]
    pub loss: LossKind,
}

impl ScoreNetConfig {
    /// Initialize a ScoreNet with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ScoreNet<B> {
        let depth = self.num_hidden_layers.max(1);
        let mut layers = Vec::with_capacity(depth);
        layers.push(LinearConfig::new(self.design_dim + 3, self.hidden_dim).init(device));
        for _ in 1..depth {
            layers.push(LinearConfig::new(self.hidden_dim, self.hidden_dim).init(device));
        }
        ScoreNet {
            layers,
            output: LinearConfig::new(self.hidden_dim, self.design_dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            beta_min: self.sde.beta_min,
            beta_max: self.sde.beta_max,
            horizon: self.sde.horizon,
            predicts_score: self.loss == LossKind::ScoreMatching,
        }
    }
}

/// Conditional score network over flattened designs.
#[derive(Module, Debug)]
pub struct ScoreNet<B: Backend> {
    layers: Vec<Linear<B>>,
    output: Linear<B>,
    dropout: Dropout,
    beta_min: f64,
    beta_max: f64,
    horizon: f64,
    /// `true` when trained with the score-matching loss.
    predicts_score: bool,
}

impl<B: Backend> ScoreNet<B> {
    /// Raw network output.
    ///
    /// Shapes: `x` `(n, d)`, `s`, `y` and `keep` `(n, 1)`. Returns `(n, d)`.
    pub fn forward(
        &self,
        x: Tensor<B, 2>,
        s: Tensor<B, 2>,
        y: Tensor<B, 2>,
        keep: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let y = y * keep.clone();
        let mut h = Tensor::cat(vec![x, s, y, keep], 1);
        for layer in &self.layers {
            h = layer.forward(h);
            h = burn::tensor::activation::silu(h);
            h = self.dropout.forward(h);
        }
        self.output.forward(h)
    }

    pub fn sde(&self) -> VpSde {
        VpSde {
            beta_min: self.beta_min,
            beta_max: self.beta_max,
            horizon: self.horizon,
        }
    }

    pub fn loss_kind(&self) -> LossKind {
        if self.predicts_score {
            LossKind::ScoreMatching
        } else {
            LossKind::Standard
        }
    }

    /// Classifier-free guided output at forward time `s`.
    ///
    /// `a_w = a(x, s, ∅) + w·(a(x, s, y) − a(x, s, ∅))`.
    pub fn guided_output(
        &self,
        s: f64,
        x: Tensor<B, 2>,
        cond: Tensor<B, 2>,
        guidance: f64,
    ) -> Tensor<B, 2> {
        let device = x.device();
        let n = x.dims()[0];
        let s_col = constant_column::<B>(s as f32, n, &device);
        let conditional = || {
            self.forward(
                x.clone(),
                s_col.clone(),
                cond.clone(),
                Tensor::ones([n, 1], &device),
            )
        };
        let unconditional = || {
            self.forward(
                x.clone(),
                s_col.clone(),
                Tensor::zeros([n, 1], &device),
                Tensor::zeros([n, 1], &device),
            )
        };

        if guidance == 1.0 {
            return conditional();
        }
        let a_uncond = unconditional();
        if guidance == 0.0 {
            return a_uncond;
        }
        let a_cond = conditional();
        a_uncond.clone() + (a_cond - a_uncond).mul_scalar(guidance)
    }
}

impl<B: Backend> ScoreModel<B> for ScoreNet<B> {
    fn horizon(&self) -> f64 {
        self.horizon
    }

    /// Reverse-time drift at sampler time `t`, i.e. forward time `s = T − t`.
    ///
    /// Standard: `(1 − λ/2)·g(s)·a_w − f(s, x)`.
    /// Score matching: `(1 − λ/2)·g(s)²·a_w − f(s, x)`.
    fn drift(
        &self,
        t: f64,
        x: Tensor<B, 2>,
        cond: Tensor<B, 2>,
        guidance: f64,
        lambda: f64,
    ) -> Tensor<B, 2> {
        let sde = self.sde();
        let s = self.horizon - t;
        let a = self.guided_output(s, x.clone(), cond, guidance);
        let scale = match self.loss_kind() {
            LossKind::Standard => sde.g(s),
            LossKind::ScoreMatching => sde.beta(s),
        };
        a.mul_scalar((1.0 - 0.5 * lambda) * scale) - sde.f(s, x)
    }

    /// `sqrt(1 − λ)·g(s)`; zero on the probability-flow ODE.
    fn diffusion(&self, t: f64, x: Tensor<B, 2>, lambda: f64) -> Tensor<B, 2> {
        let s = self.horizon - t;
        let scale = (1.0 - lambda).max(0.0).sqrt() * self.sde().g(s);
        x.ones_like().mul_scalar(scale)
    }
}
