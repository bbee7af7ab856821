//! Command-line pipelines for diffusion-based offline model-based optimization.

pub mod config;
pub mod pipeline;
pub mod results;
