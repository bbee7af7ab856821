//! Variance-preserving SDE with a linear noise schedule.
//!
//! ```text
//! β(t)   = β_min + (β_max − β_min)·t
//! m(t)   = exp(−¼t²(β_max − β_min) − ½tβ_min)      mean weight of x₀
//! var(t) = 1 − m(t)²
//! f(t,x) = −½β(t)·x                                 forward drift
//! g(t)   = √β(t)                                    forward diffusion
//! ```

use burn::prelude::*;

/// Configuration for [`VpSde`].
#[derive(Config, Debug)]
pub struct VpSdeConfig {
    #[config(default = 0.1)]
    pub beta_min: f64,
    #[config(default = 20.0)]
    pub beta_max: f64,
    /// Integration horizon `T`.
    #[config(default = 1.0)]
    pub horizon: f64,
}

impl VpSdeConfig {
    pub fn init(&self) -> VpSde {
        VpSde {
            beta_min: self.beta_min,
            beta_max: self.beta_max,
            horizon: self.horizon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VpSde {
    pub beta_min: f64,
    pub beta_max: f64,
    pub horizon: f64,
}

impl VpSde {
    pub fn beta(&self, t: f64) -> f64 {
        self.beta_min + (self.beta_max - self.beta_min) * t
    }

    fn log_mean_weight(&self, t: f64) -> f64 {
        -0.25 * t * t * (self.beta_max - self.beta_min) - 0.5 * t * self.beta_min
    }

    /// Weight of `x₀` in the mean of `x_t | x₀`.
    pub fn mean_weight(&self, t: f64) -> f64 {
        self.log_mean_weight(t).exp()
    }

    pub fn var(&self, t: f64) -> f64 {
        1.0 - (2.0 * self.log_mean_weight(t)).exp()
    }

    pub fn std(&self, t: f64) -> f64 {
        self.var(t).max(0.0).sqrt()
    }

    /// Forward diffusion coefficient `g(t)`.
    pub fn g(&self, t: f64) -> f64 {
        self.beta(t).sqrt()
    }

    /// Forward drift `f(t, x) = −½β(t)x`.
    pub fn f<B: Backend>(&self, t: f64, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.mul_scalar(-0.5 * self.beta(t))
    }
}
