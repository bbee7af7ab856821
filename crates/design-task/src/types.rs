//! Data types for design batches, dataset snapshots, and normalization state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Which array of a task a normalization flag refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
        }
    }
}

/// Errors raised while building or transforming a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0} is already normalized")]
    AlreadyNormalized(Axis),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("shape {shape:?} does not match {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("design count {designs} does not match score count {scores}")]
    LengthMismatch { designs: usize, scores: usize },

    #[error("discrete designs must be mapped to logits before x normalization")]
    DiscreteNotLogits,

    #[error("task is not discrete")]
    NotDiscrete,

    #[error("token {token} is outside the vocabulary of size {vocab_size}")]
    TokenOutOfRange { token: f32, vocab_size: usize },
}

/// Whether each axis of a task has been standardized.
///
/// A plain value attached to the task. Transformations produce a new task with
/// a new state instead of flipping flags in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationState {
    pub x: bool,
    pub y: bool,
}

impl NormalizationState {
    /// State with `axis` marked normalized, or an error if it already is.
    pub fn with_normalized(self, axis: Axis) -> Result<Self, TaskError> {
        match axis {
            Axis::X if self.x => Err(TaskError::AlreadyNormalized(Axis::X)),
            Axis::Y if self.y => Err(TaskError::AlreadyNormalized(Axis::Y)),
            Axis::X => Ok(Self { x: true, ..self }),
            Axis::Y => Ok(Self { y: true, ..self }),
        }
    }
}

/// A batch of designs stored row-major.
///
/// `shape[0]` is the batch size; the remaining dimensions describe a single
/// design (`[d]` for continuous tasks, `[L, C]` for discrete logits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignBatch {
    values: Vec<f32>,
    shape: Vec<usize>,
}

impl DesignBatch {
    /// Wrap row-major values with an explicit shape.
    pub fn new(values: Vec<f32>, shape: Vec<usize>) -> Result<Self, TaskError> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != values.len() {
            return Err(TaskError::ShapeMismatch {
                shape,
                len: values.len(),
            });
        }
        Ok(Self { values, shape })
    }

    /// Build an `(n, d)` batch from equal-length rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, TaskError> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(TaskError::ShapeMismatch {
                    shape: vec![rows.len(), dim],
                    len: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(values, vec![rows.len(), dim])
    }

    /// Number of designs in the batch.
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full shape including the batch dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Shape of a single design.
    pub fn item_shape(&self) -> &[usize] {
        &self.shape[1..]
    }

    /// Number of scalar features per design.
    pub fn row_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Flattened view of design `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        let d = self.row_len();
        &self.values[i * d..(i + 1) * d]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let d = self.row_len().max(1);
        self.values.chunks(d).take(self.len())
    }

    /// Whether every value of design `i` is finite.
    pub fn is_row_finite(&self, i: usize) -> bool {
        self.row(i).iter().all(|v| v.is_finite())
    }

    /// Same data viewed as `(n, row_len)`.
    pub fn flatten(self) -> Self {
        let n = self.len();
        let d = self.row_len();
        Self {
            values: self.values,
            shape: vec![n, d],
        }
    }

    /// Same data with a new per-design shape.
    pub fn reshape_items(self, item_shape: &[usize]) -> Result<Self, TaskError> {
        let mut shape = Vec::with_capacity(item_shape.len() + 1);
        shape.push(self.len());
        shape.extend_from_slice(item_shape);
        Self::new(self.values, shape)
    }

    /// Gather designs by index, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let d = self.row_len();
        let mut values = Vec::with_capacity(indices.len() * d);
        for &i in indices {
            values.extend_from_slice(self.row(i));
        }
        let mut shape = self.shape.clone();
        shape[0] = indices.len();
        Self { values, shape }
    }

    /// Contiguous range of designs.
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        let d = self.row_len();
        let values = self.values[range.start * d..range.end * d].to_vec();
        let mut shape = self.shape.clone();
        shape[0] = range.len();
        Self { values, shape }
    }

    /// Append all designs of `other`. Item shapes must agree.
    pub fn extend(&mut self, other: &DesignBatch) -> Result<(), TaskError> {
        if other.item_shape() != self.item_shape() {
            return Err(TaskError::ShapeMismatch {
                shape: other.shape.clone(),
                len: other.values.len(),
            });
        }
        self.values.extend_from_slice(&other.values);
        self.shape[0] += other.len();
        Ok(())
    }
}

/// Per-feature mean and standard deviation.
///
/// Standard deviation is the population value (no Bessel correction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl AxisStats {
    /// Column statistics of a flattened batch.
    pub fn of_batch(batch: &DesignBatch) -> Self {
        let d = batch.row_len();
        let n = batch.len().max(1) as f64;
        let mut sum = vec![0.0f64; d];
        for row in batch.rows() {
            for (acc, &v) in sum.iter_mut().zip(row) {
                *acc += v as f64;
            }
        }
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let mut sq = vec![0.0f64; d];
        for row in batch.rows() {
            for ((acc, &v), m) in sq.iter_mut().zip(row).zip(&mean) {
                let diff = v as f64 - m;
                *acc += diff * diff;
            }
        }
        Self {
            mean: mean.iter().map(|&m| m as f32).collect(),
            std: sq.iter().map(|&s| guard_std((s / n).sqrt()) as f32).collect(),
        }
    }

    /// Statistics of a score vector (a single feature).
    pub fn of_scores(scores: &[f32]) -> Self {
        let batch = DesignBatch {
            values: scores.to_vec(),
            shape: vec![scores.len(), 1],
        };
        Self::of_batch(&batch)
    }

    /// `(v - mean) / std`, feature-wise over a flattened batch.
    pub fn standardize(&self, values: &mut [f32]) {
        let d = self.mean.len();
        for (i, v) in values.iter_mut().enumerate() {
            let j = i % d;
            *v = (*v - self.mean[j]) / self.std[j];
        }
    }

    /// `v * std + mean`, feature-wise over a flattened batch.
    pub fn destandardize(&self, values: &mut [f32]) {
        let d = self.mean.len();
        for (i, v) in values.iter_mut().enumerate() {
            let j = i % d;
            *v = *v * self.std[j] + self.mean[j];
        }
    }
}

/// Constant features would divide by zero; treat them as unit scale.
fn guard_std(std: f64) -> f64 {
    if std > 1e-12 {
        std
    } else {
        1.0
    }
}

/// Representation of a task's designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DesignEncoding {
    /// Real-valued vectors.
    Continuous,
    /// Token sequences over a vocabulary, optionally already mapped to logits.
    Discrete {
        vocab_size: usize,
        sequence_length: usize,
        logits: bool,
    },
}

impl DesignEncoding {
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

/// Raw `(designs, scores)` pair as persisted on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSnapshot {
    /// Designs, shape `(N, design_dim)`. Token indices for discrete datasets.
    pub designs: DesignBatch,
    /// One score per design.
    pub scores: Vec<f32>,
    /// Vocabulary size for discrete datasets; `None` for continuous ones.
    pub vocab_size: Option<usize>,
}

impl DatasetSnapshot {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// One scored design produced by a guidance sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub guidance: f32,
    pub score: f32,
}
