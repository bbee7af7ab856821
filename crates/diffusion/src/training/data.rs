//! Weighted dataset pipeline for score-model training.
//!
//! Splits a `Task` into train/validation sets along one random permutation,
//! attaches importance weights that favour high-scoring designs, and serves
//! shuffled minibatches.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use design_task::{DesignBatch, Task, TaskError};

/// Default importance-weight temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("cannot split an empty dataset")]
    EmptyDataset,

    #[error("validation fraction {0} is outside [0, 1)")]
    InvalidFraction(f64),

    #[error("split leaves no training examples (dataset of {0})")]
    EmptyTrainSet(usize),

    #[error("weighting temperature must be positive and finite, got {0}")]
    InvalidTemperature(f64),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// How the importance-weight temperature is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum TemperatureRule {
    /// Use the value as-is.
    Fixed(f64),
    /// Multiply the value by the dataset size.
    ScaledByLength(f64),
}

impl Default for TemperatureRule {
    fn default() -> Self {
        Self::Fixed(DEFAULT_TEMPERATURE)
    }
}

impl TemperatureRule {
    /// Temperature for a dataset of `n` examples.
    pub fn resolve(&self, n: usize) -> f64 {
        match *self {
            Self::Fixed(t) => t,
            Self::ScaledByLength(k) => k * n as f64,
        }
    }
}

/// Importance weights `exp((s − max s) / temperature)`.
///
/// For a positive temperature all weights are in `(0, 1]` and the best example
/// gets exactly 1. Adding a constant to every score leaves the weights
/// unchanged. Weights too small for `f32` are clamped to `f32::MIN_POSITIVE`.
pub fn get_weights(scores: &[f32], base_temperature: f64) -> Vec<f32> {
    let max = scores
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    scores
        .iter()
        .map(|&s| {
            let w = ((s as f64 - max) / base_temperature).exp() as f32;
            w.max(f32::MIN_POSITIVE)
        })
        .collect()
}

/// A single training example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedExample<'a> {
    pub design: &'a [f32],
    pub score: f32,
    pub weight: f32,
}

/// Flattened designs with their scores and importance weights.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedDataset {
    designs: DesignBatch,
    scores: Vec<f32>,
    weights: Vec<f32>,
}

impl WeightedDataset {
    pub fn new(designs: DesignBatch, scores: Vec<f32>, weights: Vec<f32>) -> anyhow::Result<Self> {
        if designs.len() != scores.len() || scores.len() != weights.len() {
            anyhow::bail!(
                "length mismatch: {} designs, {} scores, {} weights",
                designs.len(),
                scores.len(),
                weights.len()
            );
        }
        Ok(Self {
            designs: designs.flatten(),
            scores,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn design_dim(&self) -> usize {
        self.designs.row_len()
    }

    pub fn get(&self, i: usize) -> WeightedExample<'_> {
        WeightedExample {
            design: self.designs.row(i),
            score: self.scores[i],
            weight: self.weights[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = WeightedExample<'_>> {
        (0..self.len()).map(|i| self.get(i))
    }

    pub fn designs(&self) -> &DesignBatch {
        &self.designs
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            designs: self.designs.slice_rows(range.clone()),
            scores: self.scores[range.clone()].to_vec(),
            weights: self.weights[range].to_vec(),
        }
    }

    /// Gather examples by index into a batch.
    pub fn batch(&self, indices: &[usize]) -> WeightedBatch {
        WeightedBatch {
            designs: self.designs.select_rows(indices),
            scores: indices.iter().map(|&i| self.scores[i]).collect(),
            weights: indices.iter().map(|&i| self.weights[i]).collect(),
        }
    }
}

/// A minibatch in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedBatch {
    /// Shape `(batch, design_dim)`.
    pub designs: DesignBatch,
    pub scores: Vec<f32>,
    pub weights: Vec<f32>,
}

impl WeightedBatch {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Result of [`split_dataset`].
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: WeightedDataset,
    /// Tail of the permutation. Empty when the validation fraction is 0.
    pub validation: WeightedDataset,
    /// `permutation[k]` is the task index of the k-th permuted example.
    pub permutation: Vec<usize>,
    /// Temperature the weights were computed with.
    pub temperature: f64,
}

impl DatasetSplit {
    pub fn has_validation(&self) -> bool {
        !self.validation.is_empty()
    }
}

/// Split a task into weighted train and validation sets.
///
/// One permutation of all examples is drawn from `rng`. Discrete designs are
/// mapped to logits before permuting. Weights are computed over the whole
/// permuted score array and then sliced; the last
/// `floor(N * validation_fraction)` examples form the validation set.
pub fn split_dataset(
    task: &Task,
    validation_fraction: f64,
    temperature: TemperatureRule,
    rng: &mut impl Rng,
) -> Result<DatasetSplit, SplitError> {
    let n = task.len();
    if n == 0 {
        return Err(SplitError::EmptyDataset);
    }
    if !(0.0..1.0).contains(&validation_fraction) {
        return Err(SplitError::InvalidFraction(validation_fraction));
    }

    let temperature = temperature.resolve(n);
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(SplitError::InvalidTemperature(temperature));
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(rng);

    let designs = task.logits_designs()?.select_rows(&permutation);
    let scores: Vec<f32> = permutation.iter().map(|&i| task.scores()[i]).collect();
    let weights = get_weights(&scores, temperature);

    let val_len = (n as f64 * validation_fraction).floor() as usize;
    let train_len = n - val_len;
    if train_len == 0 {
        return Err(SplitError::EmptyTrainSet(n));
    }

    let full = WeightedDataset {
        designs,
        scores,
        weights,
    };
    let split = DatasetSplit {
        train: full.slice(0..train_len),
        validation: full.slice(train_len..n),
        permutation,
        temperature,
    };

    tracing::info!(
        task = task.name(),
        train = split.train.len(),
        validation = split.validation.len(),
        temperature,
        "Split dataset"
    );
    Ok(split)
}

/// Serves minibatches from a weighted dataset.
pub struct BatchSource<'a> {
    dataset: &'a WeightedDataset,
    batch_size: usize,
    shuffle: bool,
}

impl<'a> BatchSource<'a> {
    pub fn new(dataset: &'a WeightedDataset, batch_size: usize, shuffle: bool) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
        }
    }

    /// Number of batches per epoch (the last one may be short).
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// One epoch of batches covering every example exactly once.
    pub fn epoch(&self, rng: &mut impl Rng) -> Vec<WeightedBatch> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| self.dataset.batch(chunk))
            .collect()
    }
}
