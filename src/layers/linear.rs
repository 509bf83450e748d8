//! Linear Layer (Fully Connected)
//!
//! Performs an affine transformation on the last axis: `y = x @ W + b`.
//!
//! ```text
//! Input:  x [..., in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y [..., out_features]
//! ```
//!
//! GPT-2 checkpoints store `c_attn`, `c_proj` and `c_fc` weights in this
//! `[in, out]` orientation (the "Conv1D" layout), so they are used as-is.

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Linear layer with bias
#[derive(Clone, Debug)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Linear {
    /// Wrap a loaded weight and bias, checking their shapes
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] unless `weight` is `[in_features, out_features]`
    /// and `bias` is `[out_features]`.
    pub fn new(
        weight: Tensor,
        bias: Tensor,
        in_features: usize,
        out_features: usize,
    ) -> Result<Self> {
        if weight.shape != [in_features, out_features] {
            return Err(Error::shape(
                "linear",
                format!(
                    "weight {:?}, expected [{}, {}]",
                    weight.shape, in_features, out_features
                ),
            ));
        }
        if bias.shape != [out_features] {
            return Err(Error::shape(
                "linear",
                format!("bias {:?}, expected [{}]", bias.shape, out_features),
            ));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Forward pass: y = x @ W + b
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.matmul(&self.weight)?.add(&self.bias)
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.numel() + self.bias.numel()
    }
}
