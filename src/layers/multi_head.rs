//! Multi-Head Self-Attention
//!
//! Runs several independent attention heads side by side, each looking at a
//! `d_model / num_heads` slice of the projected features.
//!
//! ## Data Flow
//!
//! ```text
//! x [b, s, d_model]
//!   → c_attn          [b, s, 3·d_model]
//!   → Q | K | V       three contiguous thirds, each [b, s, d_model]
//!   → split heads     num_heads × [b, s, head_dim]
//!   → attention       per head, shared causal mask
//!   → merge heads     [b, s, d_model]  (head order preserved)
//!   → c_proj          [b, s, d_model]
//! ```
//!
//! Head `h` owns feature columns `h·head_dim .. (h+1)·head_dim`. Splitting and
//! merging only move columns, so merging the split of a tensor returns it
//! bit-for-bit.

use super::attention::ScaledDotProductAttention;
use super::dropout::Dropout;
use super::linear::Linear;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Split the last axis into `num_heads` equal slices
///
/// # Errors
///
/// [`Error::ShapeMismatch`] if the last axis is not divisible by `num_heads`.
pub fn split_heads(x: &Tensor, num_heads: usize) -> Result<Vec<Tensor>> {
    let features = x.shape.last().copied().unwrap_or(0);
    if num_heads == 0 || features % num_heads != 0 {
        return Err(Error::shape(
            "split_heads",
            format!("{:?} cannot be split into {} heads", x.shape, num_heads),
        ));
    }
    let head_dim = features / num_heads;
    (0..num_heads)
        .map(|h| x.narrow(-1, h * head_dim, head_dim))
        .collect()
}

/// Concatenate head outputs along the last axis, in head order
pub fn merge_heads(heads: &[Tensor]) -> Result<Tensor> {
    Tensor::concat(heads, -1)
}

/// Multi-head self-attention with fused QKV projection
#[derive(Clone, Debug)]
pub struct MultiHeadAttention {
    /// Fused Q, K, V projection: [d_model, 3 * d_model]
    pub c_attn: Linear,
    /// Output projection: [d_model, d_model]
    pub c_proj: Linear,
    pub num_heads: usize,
    /// Depth of each head (d_model / num_heads)
    pub head_dim: usize,
    pub attention: ScaledDotProductAttention,
    /// Applied to the projected output
    pub resid_dropout: Dropout,
}

impl MultiHeadAttention {
    /// Assemble from loaded projections
    ///
    /// # Arguments
    ///
    /// * `c_attn` - QKV projection, `[d_model, 3·d_model]`
    /// * `c_proj` - output projection, `[d_model, d_model]`
    /// * `num_heads` - number of heads; must divide `d_model`
    /// * `dropout_rate` - rate for attention weights and the output
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `num_heads` does not divide `d_model`
    /// - [`Error::ShapeMismatch`] if the projections disagree on `d_model`
    pub fn new(
        c_attn: Linear,
        c_proj: Linear,
        num_heads: usize,
        dropout_rate: f32,
    ) -> Result<Self> {
        let d_model = c_proj.in_features();
        if num_heads == 0 || d_model % num_heads != 0 {
            return Err(Error::Config(format!(
                "d_model {} is not divisible by num_heads {}",
                d_model, num_heads
            )));
        }
        if c_attn.in_features() != d_model
            || c_attn.out_features() != 3 * d_model
            || c_proj.out_features() != d_model
        {
            return Err(Error::shape(
                "multi_head_attention",
                format!(
                    "c_attn {:?} and c_proj {:?} do not agree on d_model {}",
                    c_attn.weight.shape, c_proj.weight.shape, d_model
                ),
            ));
        }

        Ok(Self {
            c_attn,
            c_proj,
            num_heads,
            head_dim: d_model / num_heads,
            attention: ScaledDotProductAttention::new(dropout_rate)?,
            resid_dropout: Dropout::new(dropout_rate)?,
        })
    }

    pub fn d_model(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, d_model]
    /// * `mask` - Optional causal mask [1, seq_len, seq_len], shared by all heads
    ///
    /// # Returns
    ///
    /// Output tensor [batch, seq_len, d_model]
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let d_model = self.d_model();
        if x.rank() != 3 || x.shape[2] != d_model {
            return Err(Error::shape(
                "multi_head_attention",
                format!("input {:?}, expected [batch, seq, {}]", x.shape, d_model),
            ));
        }

        // === 1. Project to Q, K, V ===
        let qkv = self.c_attn.forward(x)?; // [b, s, 3*d_model]
        let q = split_heads(&qkv.narrow(-1, 0, d_model)?, self.num_heads)?;
        let k = split_heads(&qkv.narrow(-1, d_model, d_model)?, self.num_heads)?;
        let v = split_heads(&qkv.narrow(-1, 2 * d_model, d_model)?, self.num_heads)?;

        // === 2. Attend per head ===
        let heads = q
            .iter()
            .zip(&k)
            .zip(&v)
            .map(|((q, k), v)| {
                self.attention
                    .forward(q, k, v, mask)
                    .map(|(output, _weights)| output)
            })
            .collect::<Result<Vec<_>>>()?;

        // === 3. Merge and project ===
        let merged = merge_heads(&heads)?;
        let out = self.c_proj.forward(&merged)?;
        Ok(self.resid_dropout.forward(&out))
    }

    /// Toggle dropout on attention weights and the output projection
    pub fn set_dropout(&mut self, active: bool) {
        self.attention.dropout.active = active;
        self.resid_dropout.active = active;
    }

    pub fn num_parameters(&self) -> usize {
        self.c_attn.num_parameters() + self.c_proj.num_parameters()
    }
}
