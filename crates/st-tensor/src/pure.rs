// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust row-major tensor with only lightweight external dependencies.
//!
//! Every operator here is written in safe Rust and works on a dense 2-D
//! buffer. Higher-rank data (images, channel stacks) is flattened into rows by
//! the callers, so the batch axis is always the row axis.

use core::fmt;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::{current_num_threads, prelude::*};
use spiral_config::determinism;
use std::error::Error;
use std::sync::Arc;

/// Result alias used throughout the pure module.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor utilities.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor or operator does not match the tensor shape.
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// A row or column index fell outside the tensor.
    IndexOutOfRange { index: usize, len: usize },
    /// Computation received an empty input which would otherwise trigger a panic.
    EmptyInput(&'static str),
    /// Attempted to load or update a parameter that was missing from the state dict.
    MissingParameter { name: String },
    /// Wrapper around I/O failures when persisting or restoring tensors.
    IoError { message: String },
    /// Wrapper around serde failures when deserialising tensors.
    SerializationError { message: String },
    /// Numeric guard detected a non-finite value that would otherwise propagate NaNs.
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    InvalidValue { label: &'static str },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::InvalidDimensions { rows, cols } => {
                write!(
                    f,
                    "invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero"
                )
            }
            TensorError::DataLength { expected, got } => {
                write!(f, "data length mismatch: expected {expected}, got {got}")
            }
            TensorError::ShapeMismatch { left, right } => {
                write!(
                    f,
                    "shape mismatch: left={:?}, right={:?} cannot be combined",
                    left, right
                )
            }
            TensorError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} is out of range for length {len}")
            }
            TensorError::EmptyInput(label) => write!(f, "{label} received an empty input"),
            TensorError::MissingParameter { name } => {
                write!(f, "parameter '{name}' was not present in the state dict")
            }
            TensorError::IoError { message } => write!(f, "i/o error: {message}"),
            TensorError::SerializationError { message } => {
                write!(f, "serialization error: {message}")
            }
            TensorError::NonFiniteValue { label, value } => {
                write!(f, "{label} produced a non-finite value ({value})")
            }
            TensorError::InvalidValue { label } => write!(f, "invalid value for {label}"),
        }
    }
}

impl Error for TensorError {}

/// A simple row-major 2D tensor backed by a shared `Vec<f32>`.
///
/// Clones are cheap; the buffer is copied on the first mutation of a shared
/// tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Arc<Vec<f32>>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    fn seedable_rng(seed: Option<u64>, label: &str) -> StdRng {
        determinism::rng_from_optional(seed, label)
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::from_vec(rows, cols, vec![0.0; rows * cols])
    }

    /// Create a tensor from raw data. The provided vector must match
    /// `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if data.len() != rows * cols {
            return Err(TensorError::DataLength {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self {
            data: Arc::new(data),
            rows,
            cols,
        })
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic which makes tests
    /// reproducible. Otherwise the process-wide determinism settings decide.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let mut rng = Self::seedable_rng(seed, "st-tensor/tensor/uniform");
        let distribution = Uniform::new(min, max);
        let data = (0..rows * cols)
            .map(|_| distribution.sample(&mut rng))
            .collect();
        Self::from_vec(rows, cols, data)
    }

    /// Construct a tensor by sampling a normal distribution with the provided
    /// mean and standard deviation.
    pub fn random_normal(
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if std <= 0.0 {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let mut rng = Self::seedable_rng(seed, "st-tensor/tensor/normal");
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut rng);
                mean + std * sample as f32
            })
            .collect();
        Self::from_vec(rows, cols, data)
    }

    /// Construct a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self::from_vec(rows, cols, data)
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements stored in the tensor.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Tensors can never be empty; kept for clippy's `len_without_is_empty`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Borrows a single row.
    pub fn row(&self, index: usize) -> PureResult<&[f32]> {
        if index >= self.rows {
            return Err(TensorError::IndexOutOfRange {
                index,
                len: self.rows,
            });
        }
        let offset = index * self.cols;
        Ok(&self.data[offset..offset + self.cols])
    }

    fn ensure_same_shape(&self, other: &Tensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Matrix multiply (`self @ other`).
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (rows, inner, cols) = (self.rows, self.cols, other.cols);
        let mut out = vec![0.0; rows * cols];
        if should_parallelize(rows, inner, cols) {
            out.par_chunks_mut(cols)
                .zip(self.data.par_chunks(inner))
                .for_each(|(dst_row, lhs_row)| {
                    matmul_row(dst_row, lhs_row, other.data(), inner, cols)
                });
        } else {
            for (dst_row, lhs_row) in out.chunks_mut(cols).zip(self.data.chunks(inner)) {
                matmul_row(dst_row, lhs_row, other.data(), inner, cols);
            }
        }
        Tensor::from_vec(rows, cols, out)
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_map(other, |a, b| a + b)
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Element-wise product (Hadamard) between two tensors of identical shape.
    pub fn hadamard(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_map(other, |a, b| a * b)
    }

    /// Returns a new tensor where every element is scaled by `value`.
    pub fn scale(&self, value: f32) -> Tensor {
        self.map(|a| a * value)
    }

    /// Applies `f` to every element.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            data: Arc::new(self.data.iter().map(|&v| f(v)).collect()),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Combines two tensors of identical shape element by element.
    pub fn zip_map<F>(&self, other: &Tensor, f: F) -> PureResult<Tensor>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.ensure_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Add a scaled tensor to this tensor (`self += scale * other`).
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        self.ensure_same_shape(other)?;
        let data = Arc::make_mut(&mut self.data);
        for (a, b) in data.iter_mut().zip(other.data.iter()) {
            *a += scale * b;
        }
        Ok(())
    }

    /// Add the provided row vector to every row (`self[row] += bias`).
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::DataLength {
                expected: self.cols,
                got: bias.len(),
            });
        }
        let cols = self.cols;
        let data = Arc::make_mut(&mut self.data);
        for row in data.chunks_mut(cols) {
            for (value, b) in row.iter_mut().zip(bias) {
                *value += b;
            }
        }
        Ok(())
    }

    /// Returns the transpose of the tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0; self.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            data: Arc::new(data),
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Returns the sum over rows for each column.
    pub fn sum_axis0(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols) {
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += value;
            }
        }
        sums
    }

    /// Returns the sum over columns for each row.
    pub fn sum_axis1(&self) -> Vec<f32> {
        self.data
            .chunks(self.cols)
            .map(|row| row.iter().sum())
            .collect()
    }

    /// Concatenates tensors row-wise producing a new tensor whose row count is the sum
    /// of the inputs while preserving the shared column dimension.
    pub fn cat_rows(tensors: &[Tensor]) -> PureResult<Tensor> {
        let first = tensors.first().ok_or(TensorError::EmptyInput("Tensor::cat_rows"))?;
        let cols = first.cols;
        let mut total_rows = 0usize;
        for tensor in tensors {
            if tensor.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: tensor.shape(),
                    right: (tensor.rows, cols),
                });
            }
            total_rows += tensor.rows;
        }
        let mut data = Vec::with_capacity(total_rows * cols);
        for tensor in tensors {
            data.extend_from_slice(tensor.data());
        }
        Tensor::from_vec(total_rows, cols, data)
    }

    /// Concatenates two tensors column-wise (`[self | other]`).
    pub fn concat_cols(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.rows != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let cols = self.cols + other.cols;
        let mut data = Vec::with_capacity(self.rows * cols);
        for (left, right) in self
            .data
            .chunks(self.cols)
            .zip(other.data.chunks(other.cols))
        {
            data.extend_from_slice(left);
            data.extend_from_slice(right);
        }
        Tensor::from_vec(self.rows, cols, data)
    }

    /// Copies the column range `[start, end)` into a new tensor.
    pub fn slice_cols(&self, start: usize, end: usize) -> PureResult<Tensor> {
        if end > self.cols {
            return Err(TensorError::IndexOutOfRange {
                index: end,
                len: self.cols,
            });
        }
        if start >= end {
            return Err(TensorError::InvalidDimensions {
                rows: self.rows,
                cols: end.saturating_sub(start),
            });
        }
        let mut data = Vec::with_capacity(self.rows * (end - start));
        for row in self.data.chunks(self.cols) {
            data.extend_from_slice(&row[start..end]);
        }
        Tensor::from_vec(self.rows, end - start, data)
    }

    /// Gathers the given rows, in order, into a new tensor.
    pub fn select_rows(&self, indices: &[usize]) -> PureResult<Tensor> {
        if indices.is_empty() {
            return Err(TensorError::EmptyInput("Tensor::select_rows"));
        }
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &index in indices {
            data.extend_from_slice(self.row(index)?);
        }
        Tensor::from_vec(indices.len(), self.cols, data)
    }

    /// Numerically stable row-wise softmax.
    pub fn row_softmax(&self) -> PureResult<Tensor> {
        let mut data = Vec::with_capacity(self.len());
        for row in self.data.chunks(self.cols) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if !max.is_finite() {
                return Err(TensorError::NonFiniteValue {
                    label: "row_softmax",
                    value: max,
                });
            }
            let start = data.len();
            let mut sum = 0.0f32;
            for &value in row {
                let e = (value - max).exp();
                sum += e;
                data.push(e);
            }
            for value in &mut data[start..] {
                *value /= sum;
            }
        }
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Index of the largest entry of every row. Ties resolve to the first index
    /// and NaNs are skipped.
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.data
            .chunks(self.cols)
            .map(|row| {
                let mut best = 0usize;
                let mut best_value = f32::NEG_INFINITY;
                for (index, &value) in row.iter().enumerate() {
                    if value > best_value {
                        best = index;
                        best_value = value;
                    }
                }
                best
            })
            .collect()
    }

    /// One-hot mask marking the argmax of every row.
    pub fn row_hardmax(&self) -> PureResult<Tensor> {
        let mut data = vec![0.0; self.len()];
        for (row, index) in self.argmax_rows().into_iter().enumerate() {
            data[row * self.cols + index] = 1.0;
        }
        Tensor::from_vec(self.rows, self.cols, data)
    }
}

const PARALLEL_GEMM_THRESHOLD: usize = 32 * 32 * 32;

#[inline]
fn should_parallelize(rows: usize, inner: usize, cols: usize) -> bool {
    if current_num_threads() <= 1 {
        return false;
    }
    rows.saturating_mul(inner).saturating_mul(cols) >= PARALLEL_GEMM_THRESHOLD
}

#[inline]
fn matmul_row(dst_row: &mut [f32], lhs_row: &[f32], rhs: &[f32], inner: usize, cols: usize) {
    dst_row.fill(0.0);
    for k in 0..inner {
        let scale = lhs_row[k];
        if scale == 0.0 {
            continue;
        }
        let rhs_row = &rhs[k * cols..(k + 1) * cols];
        for (dst, &value) in dst_row.iter_mut().zip(rhs_row) {
            *dst += scale * value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn constructors_validate_shape() {
        assert_eq!(
            Tensor::from_vec(0, 3, vec![]).unwrap_err(),
            TensorError::InvalidDimensions { rows: 0, cols: 3 }
        );
        assert_eq!(
            Tensor::from_vec(2, 2, vec![1.0; 3]).unwrap_err(),
            TensorError::DataLength {
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn matmul_matches_manual_product() {
        let a = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
        assert!(matches!(
            a.matmul(&a),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn parallel_matmul_agrees_with_serial() {
        let a = Tensor::random_uniform(64, 48, -1.0, 1.0, Some(1)).unwrap();
        let b = Tensor::random_uniform(48, 40, -1.0, 1.0, Some(2)).unwrap();
        let c = a.matmul(&b).unwrap();
        for r in [0usize, 17, 63] {
            for col in [0usize, 9, 39] {
                let expected: f32 = (0..48)
                    .map(|k| a.data()[r * 48 + k] * b.data()[k * 40 + col])
                    .sum();
                assert!((c.data()[r * 40 + col] - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn column_slicing_and_concat_are_inverse() {
        let t = Tensor::from_fn(3, 4, |r, c| (r * 4 + c) as f32).unwrap();
        let left = t.slice_cols(0, 2).unwrap();
        let right = t.slice_cols(2, 4).unwrap();
        assert_eq!(left.data(), &[0.0, 1.0, 4.0, 5.0, 8.0, 9.0]);
        assert_eq!(left.concat_cols(&right).unwrap(), t);
        assert!(t.slice_cols(3, 5).is_err());
    }

    #[test]
    fn select_rows_preserves_requested_order() {
        let t = Tensor::from_fn(4, 2, |r, _| r as f32).unwrap();
        let picked = t.select_rows(&[3, 0, 3]).unwrap();
        assert_eq!(picked.data(), &[3.0, 3.0, 0.0, 0.0, 3.0, 3.0]);
        assert!(matches!(
            t.select_rows(&[4]),
            Err(TensorError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn softmax_rows_sum_to_one_and_hardmax_is_one_hot() {
        let t = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 500.0, -2.0, 0.0]).unwrap();
        let soft = t.row_softmax().unwrap();
        for s in soft.sum_axis1() {
            assert!(approx(s, 1.0));
        }
        let hard = t.row_hardmax().unwrap();
        assert_eq!(hard.data(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn shared_buffers_copy_on_write() {
        let a = Tensor::zeros(2, 2).unwrap();
        let mut b = a.clone();
        b.data_mut()[0] = 1.0;
        assert_eq!(a.data()[0], 0.0);
        assert_eq!(b.data()[0], 1.0);
    }

    #[test]
    fn reductions_and_bias() {
        let mut t = Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.sum_axis0(), vec![4.0, 6.0]);
        assert_eq!(t.sum_axis1(), vec![3.0, 7.0]);
        t.add_row_inplace(&[1.0, -1.0]).unwrap();
        assert_eq!(t.data(), &[2.0, 1.0, 4.0, 3.0]);
        assert_eq!(t.transpose().data(), &[2.0, 4.0, 1.0, 3.0]);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let a = Tensor::random_normal(3, 3, 0.0, 1.0, Some(9)).unwrap();
        let b = Tensor::random_normal(3, 3, 0.0, 1.0, Some(9)).unwrap();
        assert_eq!(a, b);
        let u = Tensor::random_uniform(10, 10, 0.0, 1.0, Some(3)).unwrap();
        assert!(u.data().iter().all(|&v| (0.0..1.0).contains(&v)));
    }
}
