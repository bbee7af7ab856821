//! Ground-truth design evaluators.
//!
//! Evaluators receive designs in the original (denormalized) design space and
//! clip every coordinate to their declared bounds before scoring.

use std::f64::consts::PI;
use std::sync::Arc;

use crate::types::DesignBatch;

/// Black-box scoring function for a design-optimization benchmark.
pub trait DesignEvaluator: Send + Sync {
    /// Benchmark name.
    fn name(&self) -> &str;

    /// Per-coordinate `(low, high)` bounds, if the oracle declares any.
    fn bounds(&self) -> Option<&[(f32, f32)]>;

    /// Score a batch of designs. Larger is better.
    fn evaluate(&self, designs: &DesignBatch) -> anyhow::Result<Vec<f32>>;
}

/// Clip each coordinate of every design to its bound.
///
/// Bounds are indexed by flattened feature position.
pub fn clip_to_bounds(designs: &DesignBatch, bounds: &[(f32, f32)]) -> anyhow::Result<DesignBatch> {
    let d = designs.row_len();
    if bounds.len() != d {
        anyhow::bail!(
            "oracle declares {} bounds but designs have {d} features",
            bounds.len()
        );
    }
    let values = designs
        .values()
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let (lo, hi) = bounds[i % d];
            v.clamp(lo, hi)
        })
        .collect();
    Ok(DesignBatch::new(values, designs.shape().to_vec())?)
}

/// The two-dimensional Branin–Hoo function, rescaled so better designs score higher.
///
/// Returns `2 * (-branin(x)) + 2` for each design after clipping to
/// `x1 ∈ [-5, 10]`, `x2 ∈ [0, 15]`.
#[derive(Debug, Clone)]
pub struct BraninOracle {
    bounds: [(f32, f32); 2],
}

impl Default for BraninOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl BraninOracle {
    pub fn new() -> Self {
        Self {
            bounds: [(-5.0, 10.0), (0.0, 15.0)],
        }
    }

    /// Raw Branin value (lower is better). Global minimum ≈ 0.397887.
    pub fn raw(x1: f64, x2: f64) -> f64 {
        let a = 1.0;
        let b = 5.1 / (4.0 * PI * PI);
        let c = 5.0 / PI;
        let r = 6.0;
        let s = 10.0;
        let t = 1.0 / (8.0 * PI);
        a * (x2 - b * x1 * x1 + c * x1 - r).powi(2) + s * (1.0 - t) * x1.cos() + s
    }
}

impl DesignEvaluator for BraninOracle {
    fn name(&self) -> &str {
        "branin"
    }

    fn bounds(&self) -> Option<&[(f32, f32)]> {
        Some(&self.bounds)
    }

    fn evaluate(&self, designs: &DesignBatch) -> anyhow::Result<Vec<f32>> {
        let clipped = clip_to_bounds(designs, &self.bounds)?;
        Ok(clipped
            .rows()
            .map(|row| {
                let raw = Self::raw(row[0] as f64, row[1] as f64);
                (2.0 * (-raw) + 2.0) as f32
            })
            .collect())
    }
}

/// Look up the built-in evaluator for a task name.
pub fn evaluator_for(task_name: &str) -> Option<Arc<dyn DesignEvaluator>> {
    match task_name {
        "branin" => Some(Arc::new(BraninOracle::new())),
        _ => None,
    }
}
