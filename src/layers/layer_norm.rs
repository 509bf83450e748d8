//! Layer Normalization
//!
//! Normalizes each position's feature vector to zero mean and unit variance,
//! then applies a learned scale (gamma) and shift (beta):
//!
//! ```text
//! 1. mean = E[x] = sum(x) / N
//! 2. var = E[(x - mean)²] = sum((x - mean)²) / N
//! 3. x_norm = (x - mean) / √(var + ε)
//! 4. y = γ * x_norm + β
//! ```
//!
//! Statistics are taken over the last axis only: every (batch, position)
//! pair is normalized independently, never across the sequence or batch.
//! `ε` keeps a constant row from dividing by zero; such a row normalizes to
//! exactly 0 before the shift.

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Default ε used by GPT-2
pub const DEFAULT_EPS: f32 = 1e-5;

/// Layer normalization with learned scale and shift
#[derive(Clone, Debug)]
pub struct LayerNorm {
    pub gamma: Tensor, // Scale parameter [n_embd]
    pub beta: Tensor,  // Shift parameter [n_embd]
    pub eps: f32,      // Small constant for numerical stability
}

impl LayerNorm {
    /// Build from loaded parameters
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] unless both gamma and beta are `[n_embd]`.
    pub fn new(gamma: Tensor, beta: Tensor, n_embd: usize, eps: f32) -> Result<Self> {
        if gamma.shape != [n_embd] || beta.shape != [n_embd] {
            return Err(Error::shape(
                "layer_norm",
                format!(
                    "gamma {:?} / beta {:?}, expected [{}]",
                    gamma.shape, beta.shape, n_embd
                ),
            ));
        }
        Ok(Self { gamma, beta, eps })
    }

    /// Identity-initialized layer norm (gamma = 1, beta = 0)
    pub fn identity(n_embd: usize) -> Self {
        Self {
            gamma: Tensor::full(vec![n_embd], 1.0),
            beta: Tensor::zeros(vec![n_embd]),
            eps: DEFAULT_EPS,
        }
    }

    /// Normalize along the last axis without scale/shift
    pub fn normalize(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean(-1, true)?;
        let variance = x.var(-1, true)?;
        let std = variance.add_scalar(self.eps).sqrt();
        x.sub(&mean)?.div(&std)
    }

    /// Forward pass: normalize, then scale and shift
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the last axis of `x` is not `n_embd`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if x.shape.last() != self.gamma.shape.first() {
            return Err(Error::shape(
                "layer_norm",
                format!("input {:?} vs gamma {:?}", x.shape, self.gamma.shape),
            ));
        }
        self.normalize(x)?.mul(&self.gamma)?.add(&self.beta)
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.numel() + self.beta.numel()
    }
}
