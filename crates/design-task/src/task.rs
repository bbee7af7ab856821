//! Design-optimization task: a dataset, its statistics, and its oracle.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::logits::{to_logits, DEFAULT_SOFT_INTERPOLATION};
use crate::oracle::DesignEvaluator;
use crate::reader::SnapshotReader;
use crate::types::{
    Axis, AxisStats, DatasetSnapshot, DesignBatch, DesignEncoding, NormalizationState, TaskError,
};

/// A dataset of `(design, score)` pairs bundled with its evaluator.
///
/// Built once from a snapshot. `map_normalize_x`, `map_normalize_y` and
/// `map_to_logits` consume the task and return a transformed one.
#[derive(Clone)]
pub struct Task {
    name: String,
    designs: DesignBatch,
    scores: Vec<f32>,
    x_stats: AxisStats,
    y_stats: AxisStats,
    normalization: NormalizationState,
    encoding: DesignEncoding,
    evaluator: Arc<dyn DesignEvaluator>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("shape", &self.designs.shape())
            .field("normalization", &self.normalization)
            .field("encoding", &self.encoding)
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}

impl Task {
    /// Build a task from an in-memory snapshot.
    pub fn from_snapshot(
        name: impl Into<String>,
        snapshot: DatasetSnapshot,
        evaluator: Arc<dyn DesignEvaluator>,
    ) -> Result<Self, TaskError> {
        if snapshot.is_empty() {
            return Err(TaskError::EmptyDataset);
        }
        if snapshot.designs.len() != snapshot.scores.len() {
            return Err(TaskError::LengthMismatch {
                designs: snapshot.designs.len(),
                scores: snapshot.scores.len(),
            });
        }

        let designs = snapshot.designs.flatten();
        let encoding = match snapshot.vocab_size {
            Some(vocab_size) => DesignEncoding::Discrete {
                vocab_size,
                sequence_length: designs.row_len(),
                logits: false,
            },
            None => DesignEncoding::Continuous,
        };

        Ok(Self {
            name: name.into(),
            x_stats: AxisStats::of_batch(&designs),
            y_stats: AxisStats::of_scores(&snapshot.scores),
            designs,
            scores: snapshot.scores,
            normalization: NormalizationState::default(),
            encoding,
            evaluator,
        })
    }

    /// Load a snapshot from Parquet and build a task from it.
    pub fn load(
        name: impl Into<String>,
        path: &Path,
        evaluator: Arc<dyn DesignEvaluator>,
    ) -> anyhow::Result<Self> {
        let snapshot = SnapshotReader::read(path)?;
        let task = Self::from_snapshot(name, snapshot, evaluator)?;
        tracing::info!(
            task = %task.name,
            examples = task.len(),
            design_dim = task.design_dim(),
            discrete = task.is_discrete(),
            path = %path.display(),
            "Loaded task"
        );
        Ok(task)
    }

    /// Standardize designs with the task's x statistics.
    pub fn map_normalize_x(mut self) -> Result<Self, TaskError> {
        if matches!(self.encoding, DesignEncoding::Discrete { logits: false, .. }) {
            return Err(TaskError::DiscreteNotLogits);
        }
        self.normalization = self.normalization.with_normalized(Axis::X)?;
        let shape = self.designs.shape().to_vec();
        let mut values = self.designs.into_values();
        self.x_stats.standardize(&mut values);
        self.designs = DesignBatch::new(values, shape)?;
        Ok(self)
    }

    /// Standardize scores with the task's y statistics.
    pub fn map_normalize_y(mut self) -> Result<Self, TaskError> {
        self.normalization = self.normalization.with_normalized(Axis::Y)?;
        self.y_stats.standardize(&mut self.scores);
        Ok(self)
    }

    /// Replace token designs with flattened logits.
    ///
    /// x statistics are recomputed in logits space. No-op for a task that is
    /// already in logits form.
    pub fn map_to_logits(mut self) -> Result<Self, TaskError> {
        let DesignEncoding::Discrete {
            vocab_size,
            sequence_length,
            logits,
        } = self.encoding
        else {
            return Err(TaskError::NotDiscrete);
        };
        if logits {
            return Ok(self);
        }
        self.designs = self.logits_designs()?;
        self.x_stats = AxisStats::of_batch(&self.designs);
        self.encoding = DesignEncoding::Discrete {
            vocab_size,
            sequence_length,
            logits: true,
        };
        Ok(self)
    }

    /// Designs in continuous form, flattened to `(N, feature_dim)`.
    ///
    /// Discrete token designs are mapped to logits without changing the task.
    pub fn logits_designs(&self) -> Result<DesignBatch, TaskError> {
        match self.encoding {
            DesignEncoding::Discrete {
                vocab_size,
                logits: false,
                ..
            } => Ok(to_logits(&self.designs, vocab_size, DEFAULT_SOFT_INTERPOLATION)?.flatten()),
            _ => Ok(self.designs.clone()),
        }
    }

    /// Undo x standardization on a flattened batch. Identity if x is not normalized.
    pub fn denormalize_x(&self, designs: &DesignBatch) -> DesignBatch {
        if !self.normalization.x {
            return designs.clone();
        }
        let shape = designs.shape().to_vec();
        let mut values = designs.values().to_vec();
        self.x_stats.destandardize(&mut values);
        // Shape is unchanged, so this cannot fail.
        DesignBatch::new(values, shape).unwrap_or_else(|_| designs.clone())
    }

    /// Map scores back to the oracle scale. Identity if y is not normalized.
    pub fn denormalize_y(&self, scores: &[f32]) -> Vec<f32> {
        let mut out = scores.to_vec();
        if self.normalization.y {
            self.y_stats.destandardize(&mut out);
        }
        out
    }

    /// Map oracle-scale scores into the task's score space.
    pub fn normalize_y(&self, scores: &[f32]) -> Vec<f32> {
        let mut out = scores.to_vec();
        if self.normalization.y {
            self.y_stats.standardize(&mut out);
        }
        out
    }

    /// Score designs given in the task's current representation.
    ///
    /// Designs may be flat `(n, feature_dim)` or already item-shaped. They are
    /// denormalized, reshaped to the native design shape and passed to the
    /// evaluator. Scores come back in the task's score space.
    pub fn predict(&self, designs: &DesignBatch) -> anyhow::Result<Vec<f32>> {
        if designs.row_len() != self.design_dim() {
            anyhow::bail!(
                "designs have {} features, task {} expects {}",
                designs.row_len(),
                self.name,
                self.design_dim()
            );
        }
        let native = self
            .denormalize_x(&designs.clone().flatten())
            .reshape_items(&self.input_shape())?;
        let scores = self.evaluator.evaluate(&native)?;
        Ok(self.normalize_y(&scores))
    }

    /// Per-design shape in the current representation.
    ///
    /// `[d]` for continuous tasks and discrete tokens, `[L, V - 1]` for logits.
    pub fn input_shape(&self) -> Vec<usize> {
        match self.encoding {
            DesignEncoding::Discrete {
                vocab_size,
                sequence_length,
                logits: true,
            } => vec![sequence_length, vocab_size - 1],
            _ => vec![self.designs.row_len()],
        }
    }

    /// Number of features per flattened design.
    pub fn design_dim(&self) -> usize {
        self.designs.row_len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn designs(&self) -> &DesignBatch {
        &self.designs
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn x_stats(&self) -> &AxisStats {
        &self.x_stats
    }

    pub fn y_stats(&self) -> &AxisStats {
        &self.y_stats
    }

    pub fn normalization(&self) -> NormalizationState {
        self.normalization
    }

    pub fn encoding(&self) -> DesignEncoding {
        self.encoding
    }

    pub fn is_discrete(&self) -> bool {
        self.encoding.is_discrete()
    }

    pub fn evaluator(&self) -> &Arc<dyn DesignEvaluator> {
        &self.evaluator
    }
}
