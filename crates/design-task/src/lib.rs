//! Design-optimization tasks for offline model-based optimization.
//!
//! A task is a fixed dataset of `(design, score)` pairs together with the
//! ground-truth oracle that scores new designs. This crate provides the task
//! type and its normalization, the discrete logits mapping, and Parquet I/O
//! for dataset snapshots and generated designs.

pub mod logits;
pub mod oracle;
pub mod reader;
pub mod task;
pub mod types;
pub mod writer;

pub use logits::{to_logits, to_tokens, DEFAULT_SOFT_INTERPOLATION};
pub use oracle::{clip_to_bounds, evaluator_for, BraninOracle, DesignEvaluator};
pub use reader::SnapshotReader;
pub use task::Task;
pub use types::{
    Axis, AxisStats, DatasetSnapshot, DesignBatch, DesignEncoding, NormalizationState,
    ScoreRecord, TaskError,
};
pub use writer::SnapshotWriter;
