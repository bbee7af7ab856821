//! Training pipeline: weighted dataset splitting, denoising losses, metrics
//! with health checks, and the AdamW training loop.

pub mod data;
pub mod loss;
pub mod metrics;
pub mod trainer;
