//! Tensor Operations for Neural Networks
//!
//! This module provides a minimal dense tensor library sized for GPT-2
//! inference. Tensors store multi-dimensional arrays with shape and stride
//! information for row-major indexing.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, seq, dim]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Broadcasting
//!
//! Binary element-wise operations (`add`, `sub`, `mul`, `div`, `masked_fill`)
//! follow NumPy rules: shapes are aligned from the right and each pair of
//! dimensions must be equal or one of them must be 1. This covers every
//! pattern the transformer needs:
//!
//! - `[batch, seq, dim] + [dim]` (bias, layer norm gamma/beta)
//! - `[batch, seq, dim] - [batch, seq, 1]` (subtracting a per-row mean)
//! - `[batch, seq, seq]` masked by `[1, seq, seq]` (causal mask over the batch)
//!
//! ## Errors
//!
//! Operations whose inputs violate the shape contract return
//! [`Error::ShapeMismatch`] instead of panicking, so a bad weight file or a
//! mask built for the wrong sequence length surfaces as a typed failure.
//!
//! ## Example
//!
//! ```rust
//! # fn main() -> touchstone::Result<()> {
//! use touchstone::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::new(data, vec![2, 3]);
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let result = tensor.matmul(&other)?;
//! assert_eq!(result.shape, vec![2, 2]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Performance and Determinism
//!
//! Matrix multiplication, element-wise maps and per-row reductions run in
//! parallel via Rayon. Every output element is produced by exactly one task
//! and accumulated in a fixed order, so results are bit-for-bit identical
//! across runs regardless of thread scheduling.

use crate::error::{Error, Result};
use rayon::prelude::*;

/// Block size for the cache-blocked matmul kernel (8×8 f32 = 256 bytes).
const BLOCK_SIZE: usize = 8;

/// Work threshold (m·n·k) above which matmul is split across threads.
const PARALLEL_MATMUL_THRESHOLD: usize = 1_000;

/// A multi-dimensional array for neural network computations
///
/// Tensors store data in a contiguous `Vec<f32>` with shape and stride information
/// for efficient multi-dimensional indexing. All operations use row-major (C-style)
/// memory layout and return a new tensor; nothing mutates its inputs.
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as: `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
///
/// Strides would be `[3, 1]` meaning:
/// - Moving one step in dimension 0 (rows) advances 3 positions in data
/// - Moving one step in dimension 1 (cols) advances 1 position in data
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length.
    /// Buffers that come from outside the crate (weight files) are validated
    /// before they reach this constructor.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use touchstone::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with a constant value
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Create an `n × n` identity matrix
    ///
    /// # Example
    ///
    /// ```rust
    /// # use touchstone::Tensor;
    /// let eye = Tensor::eye(2);
    /// assert_eq!(eye.data, vec![1.0, 0.0, 0.0, 1.0]);
    /// ```
    pub fn eye(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self::new(data, vec![n, n])
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Resolve a possibly-negative axis index (`-1` is the last axis)
    fn resolve_axis(&self, axis: isize) -> Result<usize> {
        let rank = self.rank() as isize;
        let resolved = if axis < 0 { rank + axis } else { axis };
        if resolved < 0 || resolved >= rank {
            return Err(Error::shape(
                "axis",
                format!("axis {} out of range for shape {:?}", axis, self.shape),
            ));
        }
        Ok(resolved as usize)
    }

    /// Split the shape around `axis` into `(outer, dim, inner)` extents
    fn lanes(&self, axis: usize) -> (usize, usize, usize) {
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        (outer, self.shape[axis], inner)
    }

    //
    // ========================================================================
    // MATRIX MULTIPLICATION
    // ========================================================================
    //

    /// SIMD-friendly inner loop for matrix multiplication
    ///
    /// Computes: result[j] += a_val * b[j] for all j. Written as a plain zip
    /// so LLVM auto-vectorizes it.
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Cache-blocked kernel: `out[rows, n] += a[rows, k] @ b[k, n]`
    ///
    /// Each output element accumulates over `k` in ascending order, which
    /// keeps the result independent of how rows are distributed to threads.
    fn matmul_rows(a: &[f32], b: &[f32], out: &mut [f32], rows: usize, n: usize, k: usize) {
        for j_start in (0..n).step_by(BLOCK_SIZE) {
            let j_end = (j_start + BLOCK_SIZE).min(n);
            for k_start in (0..k).step_by(BLOCK_SIZE) {
                let k_end = (k_start + BLOCK_SIZE).min(k);
                for i in 0..rows {
                    let out_row = &mut out[i * n + j_start..i * n + j_end];
                    for k_idx in k_start..k_end {
                        Self::matmul_inner_simd(
                            a[i * k + k_idx],
                            &b[k_idx * n + j_start..k_idx * n + j_end],
                            out_row,
                        );
                    }
                }
            }
        }
    }

    /// Plain 2-D product `[m, k] @ [k, n]` over raw buffers
    ///
    /// Small problems run sequentially; larger ones split the output into
    /// `BLOCK_SIZE`-row bands processed in parallel.
    fn matmul_2d(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
        let mut result = vec![0.0; m * n];
        if m == 0 || n == 0 {
            return result;
        }

        if m * n * k >= PARALLEL_MATMUL_THRESHOLD {
            result
                .par_chunks_mut(BLOCK_SIZE * n)
                .enumerate()
                .for_each(|(block_i, band)| {
                    let i_start = block_i * BLOCK_SIZE;
                    let rows = band.len() / n;
                    Self::matmul_rows(&a[i_start * k..(i_start + rows) * k], b, band, rows, n, k);
                });
        } else {
            Self::matmul_rows(a, b, &mut result, m, n, k);
        }

        result
    }

    /// Matrix multiplication
    ///
    /// Supports:
    /// - **2D × 2D**: `[m, k] @ [k, n] -> [m, n]`
    /// - **ND × 2D**: `[..., m, k] @ [k, n] -> [..., m, n]` (a weight matrix
    ///   applied to every position, as in a linear layer)
    /// - **ND × ND**: batched product with identical leading dimensions,
    ///   `[..., m, k] @ [..., k, n] -> [..., m, n]` (attention scores and
    ///   weighted values)
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the inner dimensions or batch dimensions
    /// disagree, or the ranks are not one of the supported combinations.
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn main() -> touchstone::Result<()> {
    /// # use touchstone::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let c = a.matmul(&Tensor::eye(2))?;
    /// assert_eq!(c.data, a.data);
    /// # Ok(())
    /// # }
    /// ```
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let mismatch = || {
            Error::shape(
                "matmul",
                format!("{:?} @ {:?}", self.shape, other.shape),
            )
        };

        let (ra, rb) = (self.rank(), other.rank());
        if ra < 2 || rb < 2 {
            return Err(mismatch());
        }

        let m = self.shape[ra - 2];
        let k = self.shape[ra - 1];
        let n = other.shape[rb - 1];
        if other.shape[rb - 2] != k {
            return Err(mismatch());
        }

        // === WEIGHT MATRIX: every leading index shares the same [k, n] ===
        if rb == 2 {
            let rows: usize = self.shape[..ra - 1].iter().product();
            let result = Self::matmul_2d(&self.data, &other.data, rows, n, k);
            let mut shape = self.shape.clone();
            shape[ra - 1] = n;
            return Ok(Tensor::new(result, shape));
        }

        // === BATCHED: [..., m, k] @ [..., k, n] ===
        if ra != rb || self.shape[..ra - 2] != other.shape[..rb - 2] {
            return Err(mismatch());
        }
        let batch: usize = self.shape[..ra - 2].iter().product();
        let mut result = vec![0.0; batch * m * n];
        if m * n > 0 {
            result
                .par_chunks_mut(m * n)
                .enumerate()
                .for_each(|(bi, out)| {
                    let a = &self.data[bi * m * k..(bi + 1) * m * k];
                    let b = &other.data[bi * k * n..(bi + 1) * k * n];
                    Self::matmul_rows(a, b, out, m, n, k);
                });
        }

        let mut shape = self.shape.clone();
        shape[ra - 1] = n;
        Ok(Tensor::new(result, shape))
    }

    //
    // ========================================================================
    // ELEMENT-WISE OPERATIONS
    // ========================================================================
    //

    /// Compute the NumPy broadcast of two shapes, if it exists
    fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
        let rank = a.len().max(b.len());
        let (off_a, off_b) = (rank - a.len(), rank - b.len());
        (0..rank)
            .map(|i| {
                let da = if i < off_a { 1 } else { a[i - off_a] };
                let db = if i < off_b { 1 } else { b[i - off_b] };
                match (da, db) {
                    _ if da == db => Some(da),
                    (1, _) => Some(db),
                    (_, 1) => Some(da),
                    _ => None,
                }
            })
            .collect()
    }

    /// Strides of `self` viewed in a broadcast output of rank `rank`
    ///
    /// Broadcast (size-1 or missing) dimensions get stride 0.
    fn broadcast_strides(&self, rank: usize) -> Vec<usize> {
        let offset = rank - self.rank();
        (0..rank)
            .map(|i| {
                if i < offset || self.shape[i - offset] == 1 {
                    0
                } else {
                    self.strides[i - offset]
                }
            })
            .collect()
    }

    /// Apply a binary function element-wise with broadcasting
    fn zip_broadcast<F>(&self, other: &Tensor, op: &'static str, f: F) -> Result<Tensor>
    where
        F: Fn(f32, f32) -> f32 + Sync + Send,
    {
        // === EXACT MATCH: Same shape ===
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Ok(Tensor::new(result, self.shape.clone()));
        }

        let shape = Self::broadcast_shape(&self.shape, &other.shape).ok_or_else(|| {
            Error::shape(op, format!("cannot broadcast {:?} with {:?}", self.shape, other.shape))
        })?;

        // === SUFFIX BROADCAST: [*, n] op [n] (e.g., bias addition) ===
        if shape == self.shape && self.shape.ends_with(&other.shape) {
            let len = other.numel();
            let result = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &a)| f(a, other.data[i % len]))
                .collect();
            return Ok(Tensor::new(result, shape));
        }

        // === GENERAL BROADCAST: walk output coordinates ===
        let out_strides = Self::compute_strides(&shape);
        let a_strides = self.broadcast_strides(shape.len());
        let b_strides = other.broadcast_strides(shape.len());
        let total: usize = shape.iter().product();

        let result = (0..total)
            .into_par_iter()
            .map(|i| {
                let mut remaining = i;
                let (mut ia, mut ib) = (0, 0);
                for (d, &stride) in out_strides.iter().enumerate() {
                    let coord = remaining / stride;
                    remaining %= stride;
                    ia += coord * a_strides[d];
                    ib += coord * b_strides[d];
                }
                f(self.data[ia], other.data[ib])
            })
            .collect();

        Ok(Tensor::new(result, shape))
    }

    /// Element-wise addition with broadcasting
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn main() -> touchstone::Result<()> {
    /// # use touchstone::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let bias = Tensor::new(vec![10.0, 20.0], vec![2]);
    /// let c = a.add(&bias)?;
    /// assert_eq!(c.data, vec![11.0, 22.0, 13.0, 24.0]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, "add", |a, b| a + b)
    }

    /// Element-wise subtraction with broadcasting
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, "sub", |a, b| a - b)
    }

    /// Element-wise multiplication with broadcasting
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, "mul", |a, b| a * b)
    }

    /// Element-wise division with broadcasting
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, "div", |a, b| a / b)
    }

    /// Apply a function to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Add scalar to all elements
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x + scalar)
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Element-wise square root
    pub fn sqrt(&self) -> Tensor {
        self.map(f32::sqrt)
    }

    /// Replace values where mask is non-zero with given value
    ///
    /// The mask broadcasts onto `self` (e.g., a `[1, seq, seq]` causal mask
    /// over `[batch, seq, seq]` scores) but must not enlarge it.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the mask does not broadcast to `self.shape`,
    /// which is how a mask built for the wrong sequence length is caught.
    pub fn masked_fill(&self, mask: &Tensor, value: f32) -> Result<Tensor> {
        let filled = self.zip_broadcast(mask, "masked_fill", |x, m| if m != 0.0 { value } else { x })?;
        if filled.shape != self.shape {
            return Err(Error::shape(
                "masked_fill",
                format!("mask {:?} does not fit tensor {:?}", mask.shape, self.shape),
            ));
        }
        Ok(filled)
    }

    //
    // ========================================================================
    // REDUCTIONS
    // ========================================================================
    //

    /// Reduce every lane along `axis` with `f`
    fn reduce_axis<F>(&self, axis: isize, keepdim: bool, f: F) -> Result<Tensor>
    where
        F: Fn(&[f32]) -> f32 + Sync + Send,
    {
        let axis = self.resolve_axis(axis)?;
        let (outer, dim, inner) = self.lanes(axis);

        let result: Vec<f32> = (0..outer * inner)
            .into_par_iter()
            .map(|lane| {
                let (o, i) = (lane / inner, lane % inner);
                if inner == 1 {
                    f(&self.data[o * dim..(o + 1) * dim])
                } else {
                    let values: Vec<f32> = (0..dim)
                        .map(|k| self.data[(o * dim + k) * inner + i])
                        .collect();
                    f(&values)
                }
            })
            .collect();

        let mut shape = self.shape.clone();
        if keepdim {
            shape[axis] = 1;
        } else {
            shape.remove(axis);
        }
        Ok(Tensor::new(result, shape))
    }

    /// Compute mean along an axis
    ///
    /// # Arguments
    ///
    /// * `axis` - Axis along which to compute mean (use -1 for last axis)
    /// * `keepdim` - Whether to keep the reduced dimension (size 1)
    pub fn mean(&self, axis: isize, keepdim: bool) -> Result<Tensor> {
        self.reduce_axis(axis, keepdim, |lane| {
            lane.iter().sum::<f32>() / lane.len() as f32
        })
    }

    /// Compute (biased) variance along an axis
    ///
    /// Divides by `N`, not `N - 1`, matching layer normalization.
    pub fn var(&self, axis: isize, keepdim: bool) -> Result<Tensor> {
        self.reduce_axis(axis, keepdim, |lane| {
            let n = lane.len() as f32;
            let mean = lane.iter().sum::<f32>() / n;
            lane.iter()
                .map(|&x| {
                    let diff = x - mean;
                    diff * diff
                })
                .sum::<f32>()
                / n
        })
    }

    /// Softmax along an axis
    ///
    /// Uses the numerically stable form:
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / max(sum(exp(x[j] - max(x))), ε)
    /// ```
    ///
    /// Subtracting the maximum prevents overflow in `exp()`; flooring the sum at
    /// `f32::EPSILON` guards the division when every entry is `-inf`, in which
    /// case the row comes out as all zeros.
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn main() -> touchstone::Result<()> {
    /// # use touchstone::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
    /// let probs = tensor.softmax(-1)?;
    /// assert!((probs.data.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    /// # Ok(())
    /// # }
    /// ```
    pub fn softmax(&self, axis: isize) -> Result<Tensor> {
        let axis = self.resolve_axis(axis)?;

        // Non-last axes: move the axis to the end, normalize rows, move it back
        if axis != self.rank() - 1 {
            let last = self.rank() as isize - 1;
            return self
                .transpose(axis as isize, last)?
                .softmax(-1)?
                .transpose(axis as isize, last);
        }

        let cols = self.shape[axis];
        let mut result = vec![0.0; self.numel()];
        if cols == 0 {
            return Ok(Tensor::new(result, self.shape.clone()));
        }

        result
            .par_chunks_mut(cols)
            .zip(self.data.par_chunks(cols))
            .for_each(|(out, row)| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                // A fully masked row has max = -inf; shift by 0 so exp gives 0, not NaN
                let shift = if max.is_finite() { max } else { 0.0 };

                let mut sum = 0.0;
                for (o, &x) in out.iter_mut().zip(row) {
                    *o = (x - shift).exp();
                    sum += *o;
                }
                let sum = sum.max(f32::EPSILON);
                out.iter_mut().for_each(|o| *o /= sum);
            });

        Ok(Tensor::new(result, self.shape.clone()))
    }

    //
    // ========================================================================
    // SHAPE MANIPULATION
    // ========================================================================
    //

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.numel() {
            return Err(Error::shape(
                "reshape",
                format!("cannot reshape {:?} into {:?}", self.shape, new_shape),
            ));
        }
        Ok(Tensor::new(self.data.clone(), new_shape.to_vec()))
    }

    /// Transpose two dimensions
    ///
    /// # Arguments
    ///
    /// * `dim1` - First dimension to swap (supports negative indexing)
    /// * `dim2` - Second dimension to swap (supports negative indexing)
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn main() -> touchstone::Result<()> {
    /// # use touchstone::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let transposed = tensor.transpose(0, 1)?;
    /// assert_eq!(transposed.shape, vec![3, 2]);
    /// assert_eq!(transposed.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn transpose(&self, dim1: isize, dim2: isize) -> Result<Tensor> {
        let d1 = self.resolve_axis(dim1)?;
        let d2 = self.resolve_axis(dim2)?;
        if d1 == d2 {
            return Ok(self.clone());
        }

        let mut new_shape = self.shape.clone();
        new_shape.swap(d1, d2);

        // For 2D matrices, a simple row/column swap
        if self.rank() == 2 {
            let (rows, cols) = (self.shape[0], self.shape[1]);
            let mut result = vec![0.0; rows * cols];
            for i in 0..rows {
                for j in 0..cols {
                    result[j * rows + i] = self.data[i * cols + j];
                }
            }
            return Ok(Tensor::new(result, new_shape));
        }

        // Higher ranks: decompose each output index with the output strides,
        // then gather from the input using the swapped input strides
        let out_strides = Self::compute_strides(&new_shape);
        let mut src_strides = self.strides.clone();
        src_strides.swap(d1, d2);

        let result = (0..self.numel())
            .into_par_iter()
            .map(|i| {
                let mut remaining = i;
                let mut src = 0;
                for (d, &stride) in out_strides.iter().enumerate() {
                    let coord = remaining / stride;
                    remaining %= stride;
                    src += coord * src_strides[d];
                }
                self.data[src]
            })
            .collect();

        Ok(Tensor::new(result, new_shape))
    }

    /// Slice `len` entries starting at `start` along `axis`
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn main() -> touchstone::Result<()> {
    /// # use touchstone::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let cols = t.narrow(-1, 1, 2)?;
    /// assert_eq!(cols.data, vec![2.0, 3.0, 5.0, 6.0]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn narrow(&self, axis: isize, start: usize, len: usize) -> Result<Tensor> {
        let axis = self.resolve_axis(axis)?;
        let (outer, dim, inner) = self.lanes(axis);
        if start + len > dim {
            return Err(Error::shape(
                "narrow",
                format!(
                    "range {}..{} out of bounds for axis {} of {:?}",
                    start,
                    start + len,
                    axis,
                    self.shape
                ),
            ));
        }

        let mut data = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            let from = (o * dim + start) * inner;
            data.extend_from_slice(&self.data[from..from + len * inner]);
        }

        let mut shape = self.shape.clone();
        shape[axis] = len;
        Ok(Tensor::new(data, shape))
    }

    /// Concatenate tensors along `axis`
    ///
    /// All tensors must share every dimension except `axis`. Pieces appear
    /// in the output in slice order, so `concat` exactly inverts a sequence of
    /// adjacent `narrow` calls.
    pub fn concat(tensors: &[Tensor], axis: isize) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::shape("concat", "no tensors to concatenate"))?;
        let axis = first.resolve_axis(axis)?;

        for t in tensors {
            let same_rank = t.rank() == first.rank();
            let same_other_dims = same_rank
                && t.shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == axis || a == b);
            if !same_other_dims {
                return Err(Error::shape(
                    "concat",
                    format!("{:?} incompatible with {:?} along axis {}", t.shape, first.shape, axis),
                ));
            }
        }

        let (outer, _, inner) = first.lanes(axis);
        let total_dim: usize = tensors.iter().map(|t| t.shape[axis]).sum();
        let mut data = Vec::with_capacity(outer * total_dim * inner);
        for o in 0..outer {
            for t in tensors {
                let chunk = t.shape[axis] * inner;
                data.extend_from_slice(&t.data[o * chunk..(o + 1) * chunk]);
            }
        }

        let mut shape = first.shape.clone();
        shape[axis] = total_dim;
        Ok(Tensor::new(data, shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let b = Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], vec![3, 2]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape, vec![2, 2]);
        assert_eq!(c.data, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_parallel_matches_sequential() {
        // 20x30 @ 30x17 crosses the parallel threshold and uneven block edges
        let (m, k, n) = (20, 30, 17);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 5) as f32 * 0.5).collect();

        let mut naive = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                for l in 0..k {
                    naive[i * n + j] += a[i * k + l] * b[l * n + j];
                }
            }
        }

        let c = Tensor::new(a, vec![m, k])
            .matmul(&Tensor::new(b, vec![k, n]))
            .unwrap();
        assert_close(&c.data, &naive);
    }

    #[test]
    fn test_matmul_3d_by_weight() {
        let x = Tensor::new((0..12).map(|i| i as f32).collect(), vec![2, 3, 2]);
        let w = Tensor::new(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0], vec![2, 3]);
        let y = x.matmul(&w).unwrap();
        assert_eq!(y.shape, vec![2, 3, 3]);
        // Row [2, 3] -> [2, 3, 5]
        assert_eq!(&y.data[3..6], &[2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_matmul_batched() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 1, 2]);
        let b = Tensor::new(vec![1.0, 1.0, 2.0, 0.0], vec![2, 2, 1]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape, vec![2, 1, 1]);
        assert_eq!(c.data, vec![3.0, 6.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![2, 3]);
        assert!(matches!(a.matmul(&b), Err(Error::ShapeMismatch { op: "matmul", .. })));
    }

    #[test]
    fn test_broadcast_keepdim_column() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![1, 2, 3]);
        let mean = x.mean(-1, true).unwrap();
        assert_eq!(mean.shape, vec![1, 2, 1]);
        let centered = x.sub(&mean).unwrap();
        assert_close(&centered.data, &[-1.0, 0.0, 1.0, -1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![2]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_masked_fill_broadcasts_over_batch() {
        let scores = Tensor::zeros(vec![2, 2, 2]);
        let mask = Tensor::new(vec![0.0, 1.0, 0.0, 0.0], vec![1, 2, 2]);
        let filled = scores.masked_fill(&mask, -5.0).unwrap();
        assert_eq!(filled.data, vec![0.0, -5.0, 0.0, 0.0, 0.0, -5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_masked_fill_rejects_wrong_length_mask() {
        let scores = Tensor::zeros(vec![1, 3, 3]);
        let mask = Tensor::zeros(vec![1, 4, 4]);
        assert!(scores.masked_fill(&mask, 0.0).is_err());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1000.0], vec![2, 3]);
        let p = x.softmax(-1).unwrap();
        assert!((p.data[..3].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((p.data[3..].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_softmax_fully_masked_row_is_zero() {
        let x = Tensor::new(vec![f32::NEG_INFINITY; 3], vec![1, 3]);
        let p = x.softmax(-1).unwrap();
        assert_eq!(p.data, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_softmax_first_axis() {
        let x = Tensor::new(vec![0.0, 1.0, 0.0, 1.0], vec![2, 2]);
        let p = x.softmax(0).unwrap();
        assert_close(&p.data, &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_var_is_biased() {
        let x = Tensor::new(vec![1.0, 3.0], vec![1, 2]);
        assert_eq!(x.var(-1, false).unwrap().data, vec![1.0]);
    }

    #[test]
    fn test_transpose_3d() {
        let x = Tensor::new((0..6).map(|i| i as f32).collect(), vec![1, 2, 3]);
        let t = x.transpose(1, 2).unwrap();
        assert_eq!(t.shape, vec![1, 3, 2]);
        assert_eq!(t.data, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_narrow_and_concat_roundtrip() {
        let x = Tensor::new((0..24).map(|i| i as f32).collect(), vec![2, 3, 4]);
        let parts: Vec<Tensor> = (0..2).map(|h| x.narrow(-1, h * 2, 2).unwrap()).collect();
        assert_eq!(parts[0].shape, vec![2, 3, 2]);
        let merged = Tensor::concat(&parts, -1).unwrap();
        assert_eq!(merged, x);
    }

    #[test]
    fn test_narrow_out_of_bounds() {
        let x = Tensor::zeros(vec![2, 3]);
        assert!(x.narrow(1, 2, 2).is_err());
    }

    #[test]
    fn test_reshape_mismatch() {
        let x = Tensor::zeros(vec![2, 3]);
        assert!(x.reshape(&[4]).is_err());
        assert_eq!(x.reshape(&[3, 2]).unwrap().shape, vec![3, 2]);
    }
}
