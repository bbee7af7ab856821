//! Writes dataset snapshots and generated designs to Parquet files using Arrow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::types::{DatasetSnapshot, DesignBatch, ScoreRecord};

/// Schema metadata key marking a discrete dataset.
pub const VOCAB_SIZE_KEY: &str = "vocab_size";
/// Schema metadata key holding the per-design shape, comma-separated.
pub const ITEM_SHAPE_KEY: &str = "item_shape";

pub(crate) fn design_list_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, false))
}

/// Arrow schema for dataset snapshots: `design: List<Float32>`, `score: Float32`.
pub fn snapshot_schema(designs: &DesignBatch, vocab_size: Option<usize>) -> Schema {
    let mut metadata = HashMap::new();
    metadata.insert(ITEM_SHAPE_KEY.to_string(), encode_shape(designs.item_shape()));
    if let Some(v) = vocab_size {
        metadata.insert(VOCAB_SIZE_KEY.to_string(), v.to_string());
    }
    Schema::new(vec![
        Field::new("design", DataType::List(design_list_field()), false),
        Field::new("score", DataType::Float32, false),
    ])
    .with_metadata(metadata)
}

/// Arrow schema for generated designs: `guidance: Float32`, `design: List<Float32>`.
pub fn designs_schema(designs: &DesignBatch) -> Schema {
    let mut metadata = HashMap::new();
    metadata.insert(ITEM_SHAPE_KEY.to_string(), encode_shape(designs.item_shape()));
    Schema::new(vec![
        Field::new("guidance", DataType::Float32, false),
        Field::new("design", DataType::List(design_list_field()), false),
    ])
    .with_metadata(metadata)
}

/// Arrow schema for generated scores: `guidance: Float32`, `score: Float32`.
pub fn scores_schema() -> Schema {
    Schema::new(vec![
        Field::new("guidance", DataType::Float32, false),
        Field::new("score", DataType::Float32, false),
    ])
}

/// Static methods for writing Parquet files.
pub struct SnapshotWriter;

impl SnapshotWriter {
    /// Write a `(design, score)` snapshot and return the output path.
    pub fn write(path: &Path, snapshot: &DatasetSnapshot) -> anyhow::Result<PathBuf> {
        if snapshot.designs.len() != snapshot.scores.len() {
            anyhow::bail!(
                "snapshot has {} designs but {} scores",
                snapshot.designs.len(),
                snapshot.scores.len()
            );
        }
        let schema = Arc::new(snapshot_schema(&snapshot.designs, snapshot.vocab_size));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(design_list(&snapshot.designs)),
                Arc::new(Float32Array::from(snapshot.scores.clone())),
            ],
        )?;
        write_batch(path, schema, &batch)?;

        tracing::info!(
            examples = snapshot.len(),
            path = %path.display(),
            "Wrote dataset snapshot"
        );
        Ok(path.to_path_buf())
    }

    /// Write generated designs, one guidance value per row.
    pub fn write_designs(
        path: &Path,
        designs: &DesignBatch,
        guidance: &[f32],
    ) -> anyhow::Result<PathBuf> {
        if designs.len() != guidance.len() {
            anyhow::bail!(
                "{} designs but {} guidance values",
                designs.len(),
                guidance.len()
            );
        }
        let schema = Arc::new(designs_schema(designs));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float32Array::from(guidance.to_vec())),
                Arc::new(design_list(designs)),
            ],
        )?;
        write_batch(path, schema, &batch)?;

        tracing::debug!(rows = designs.len(), path = %path.display(), "Wrote designs");
        Ok(path.to_path_buf())
    }

    /// Write generated scores.
    pub fn write_scores(path: &Path, records: &[ScoreRecord]) -> anyhow::Result<PathBuf> {
        let schema = Arc::new(scores_schema());
        let guidance: Float32Array = records.iter().map(|r| Some(r.guidance)).collect();
        let scores: Float32Array = records.iter().map(|r| Some(r.score)).collect();
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(guidance), Arc::new(scores)])?;
        write_batch(path, schema, &batch)?;

        tracing::debug!(rows = records.len(), path = %path.display(), "Wrote scores");
        Ok(path.to_path_buf())
    }
}

fn design_list(designs: &DesignBatch) -> ListArray {
    let d = designs.row_len();
    let offsets: Vec<i32> = (0..=designs.len()).map(|i| (i * d) as i32).collect();
    ListArray::new(
        design_list_field(),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(designs.values().to_vec())),
        None,
    )
}

fn write_batch(path: &Path, schema: Arc<Schema>, batch: &RecordBatch) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn encode_shape(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn decode_shape(raw: &str) -> anyhow::Result<Vec<usize>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid item shape '{raw}': {e}"))
        })
        .collect()
}
