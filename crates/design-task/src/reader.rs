//! Reads dataset snapshots and generated designs from Parquet files.

use std::path::Path;

use arrow::array::*;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::types::{DatasetSnapshot, DesignBatch, ScoreRecord};
use crate::writer::{decode_shape, ITEM_SHAPE_KEY, VOCAB_SIZE_KEY};

/// Static methods for reading Parquet files written by `SnapshotWriter`.
pub struct SnapshotReader;

impl SnapshotReader {
    /// Read a `(design, score)` snapshot.
    ///
    /// A `vocab_size` schema metadata entry marks the designs as token indices.
    pub fn read(path: &Path) -> anyhow::Result<DatasetSnapshot> {
        let (schema, batches) = read_batches(path)?;

        let vocab_size = match schema.metadata().get(VOCAB_SIZE_KEY) {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|e| anyhow::anyhow!("invalid vocab_size '{raw}': {e}"))?,
            ),
            None => None,
        };

        let mut rows = Vec::new();
        let mut scores = Vec::new();
        for batch in &batches {
            rows.extend(design_rows(batch)?);
            scores.extend_from_slice(float_column(batch, "score")?.values());
        }
        let designs = assemble(rows, &schema)?;

        tracing::debug!(
            examples = scores.len(),
            discrete = vocab_size.is_some(),
            path = %path.display(),
            "Read dataset snapshot"
        );

        Ok(DatasetSnapshot {
            designs,
            scores,
            vocab_size,
        })
    }

    /// Read generated designs and the guidance value of each row.
    pub fn read_designs(path: &Path) -> anyhow::Result<(DesignBatch, Vec<f32>)> {
        let (schema, batches) = read_batches(path)?;
        let mut rows = Vec::new();
        let mut guidance = Vec::new();
        for batch in &batches {
            rows.extend(design_rows(batch)?);
            guidance.extend_from_slice(float_column(batch, "guidance")?.values());
        }
        Ok((assemble(rows, &schema)?, guidance))
    }

    /// Read generated scores.
    pub fn read_scores(path: &Path) -> anyhow::Result<Vec<ScoreRecord>> {
        let (_, batches) = read_batches(path)?;
        let mut records = Vec::new();
        for batch in &batches {
            let guidance = float_column(batch, "guidance")?;
            let scores = float_column(batch, "score")?;
            records.extend(
                guidance
                    .values()
                    .iter()
                    .zip(scores.values().iter())
                    .map(|(&guidance, &score)| ScoreRecord { guidance, score }),
            );
        }
        Ok(records)
    }
}

fn read_batches(path: &Path) -> anyhow::Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((schema, batches))
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a Float32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow::anyhow!("Missing column '{name}'"))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column '{name}' is not Float32Array"))
}

fn design_rows(batch: &RecordBatch) -> anyhow::Result<Vec<Vec<f32>>> {
    let lists = batch
        .column_by_name("design")
        .ok_or_else(|| anyhow::anyhow!("Missing column 'design'"))?
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 'design' is not ListArray"))?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = lists.value(i);
        let floats = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow::anyhow!("List values are not Float32Array"))?;
        rows.push(floats.values().to_vec());
    }
    Ok(rows)
}

fn assemble(rows: Vec<Vec<f32>>, schema: &SchemaRef) -> anyhow::Result<DesignBatch> {
    if let Some(first) = rows.first() {
        let d = first.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != d) {
            anyhow::bail!("Dimension mismatch: row {i} has {} values, expected {d}", row.len());
        }
    }
    let mut batch = DesignBatch::from_rows(&rows)?;
    if let Some(raw) = schema.metadata().get(ITEM_SHAPE_KEY) {
        let item_shape = decode_shape(raw)?;
        batch = batch.reshape_items(&item_shape)?;
    }
    Ok(batch)
}
