//! Tensor bridge: conversions between host-side design batches and burn tensors.
//!
//! Datasets, oracles and Parquet artifacts work on `DesignBatch` / `Vec<f32>`;
//! the score model and sampler need `Tensor<B, 2>`.

use burn::prelude::*;
use burn::tensor::TensorData;
use design_task::DesignBatch;

/// Convert a flattened `(n, d)` design batch to a burn 2D tensor.
pub fn batch_to_tensor<B: Backend>(batch: &DesignBatch, device: &B::Device) -> Tensor<B, 2> {
    let n = batch.len();
    let d = batch.row_len();
    Tensor::from_data(TensorData::new(batch.values().to_vec(), [n, d]), device)
}

/// Convert row-major values of shape `(n, d)` to a burn 2D tensor.
///
/// # Panics
/// Panics if `values.len() != n * d`.
pub fn values_to_tensor<B: Backend>(
    values: Vec<f32>,
    n: usize,
    d: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    assert_eq!(values.len(), n * d, "expected {n}x{d} values, got {}", values.len());
    Tensor::from_data(TensorData::new(values, [n, d]), device)
}

/// Column tensor of shape `(n, 1)`.
pub fn column_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len(), 1]), device)
}

/// Column tensor of shape `(n, 1)` filled with `value`.
pub fn constant_column<B: Backend>(value: f32, n: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 2>::ones([n, 1], device).mul_scalar(value)
}

/// Extract a 2D tensor back into a flattened design batch.
pub fn tensor_to_batch<B: Backend>(tensor: Tensor<B, 2>) -> anyhow::Result<DesignBatch> {
    let [n, d] = tensor.dims();
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor data: {e:?}"))?;
    Ok(DesignBatch::new(values, vec![n, d])?)
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}
