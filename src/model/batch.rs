//! Moves epochs and targets between `ndarray` and batch tensors.
use burn::prelude::*;
use burn::tensor::TensorData;
use ndarray::{Array2, Array3, Axis};

use crate::error::{Error, Result};

/// Rows of `[N, C, T]` as a `[rows, 1, C, T]` batch.
pub fn signal_batch<B: Backend>(x: &Array3<f32>, rows: &[usize], device: &B::Device) -> Tensor<B, 4> {
    let (_, c, t) = x.dim();
    let mut values: Vec<f32> = Vec::with_capacity(rows.len() * c * t);
    for &i in rows {
        values.extend(x.index_axis(Axis(0), i).iter());
    }
    Tensor::from_data(TensorData::new(values, [rows.len(), 1, c, t]), device)
}

pub fn target_batch<B: Backend>(y: &Array2<f32>, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
    let mut values: Vec<f32> = Vec::with_capacity(rows.len() * y.ncols());
    for &i in rows {
        values.extend(y.row(i).iter());
    }
    Tensor::from_data(TensorData::new(values, [rows.len(), y.ncols()]), device)
}

pub fn to_array<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{:?}", e)))?;
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}
