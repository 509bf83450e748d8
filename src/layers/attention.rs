//! Scaled Dot-Product Attention
//!
//! The single-head attention kernel that multi-head attention runs once per
//! head.
//!
//! ```text
//! scores  = (Q @ K^T) / √d_k                   [batch, seq, seq]
//! scores  = where(mask, -inf, scores)          (optional)
//! weights = softmax(scores, last axis)
//! output  = weights @ V                        [batch, seq, d_v]
//! ```
//!
//! ## Why Scaling?
//!
//! Dot products of `d_k`-dimensional vectors grow like `√d_k`; dividing keeps
//! the softmax out of its saturated region.
//!
//! ## Causal Masking
//!
//! The mask is a `[1, seq, seq]` tensor with `1.0` strictly above the diagonal.
//! It broadcasts over the batch, and masked scores become `-inf`, so their
//! post-softmax weight is exactly 0 and position `i` never sees position `j > i`.
//!
//! ```text
//! seq_len = 4:
//! [0 1 1 1]  position 0 can only see itself
//! [0 0 1 1]  position 1 can see 0,1
//! [0 0 0 1]  position 2 can see 0,1,2
//! [0 0 0 0]  position 3 can see all
//! ```

use super::activation::softmax;
use super::dropout::Dropout;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Build a `[1, seq_len, seq_len]` look-ahead mask (1 = masked)
///
/// For `seq_len == 1` the mask is a single 0: nothing is masked.
///
/// # Example
///
/// ```rust
/// # use touchstone::layers::causal_mask;
/// let mask = causal_mask(2);
/// assert_eq!(mask.shape, vec![1, 2, 2]);
/// assert_eq!(mask.data, vec![0.0, 1.0, 0.0, 0.0]);
/// ```
pub fn causal_mask(seq_len: usize) -> Tensor {
    let mut mask_data = vec![0.0; seq_len * seq_len];
    for i in 0..seq_len {
        for j in i + 1..seq_len {
            mask_data[i * seq_len + j] = 1.0;
        }
    }
    Tensor::new(mask_data, vec![1, seq_len, seq_len])
}

/// Single-head scaled dot-product attention
#[derive(Clone, Debug)]
pub struct ScaledDotProductAttention {
    pub dropout: Dropout,
}

impl ScaledDotProductAttention {
    /// # Errors
    ///
    /// [`Error::Config`] if `dropout_rate` is outside `[0, 1)`.
    pub fn new(dropout_rate: f32) -> Result<Self> {
        Ok(Self {
            dropout: Dropout::new(dropout_rate)?,
        })
    }

    /// Compute attention output and weights
    ///
    /// # Arguments
    ///
    /// * `q`, `k` - `[batch, seq, d_k]`
    /// * `v` - `[batch, seq, d_v]`
    /// * `mask` - optional `[1, seq, seq]` look-ahead mask
    ///
    /// # Returns
    ///
    /// `(output [batch, seq, d_v], weights [batch, seq, seq])`. The returned
    /// weights are the post-softmax values before any dropout.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] for inconsistent Q/K/V shapes or a mask that
    /// does not match the sequence length.
    pub fn forward(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        if q.rank() != 3 || q.shape != k.shape || v.rank() != 3 || v.shape[..2] != q.shape[..2] {
            return Err(Error::shape(
                "attention",
                format!("q {:?}, k {:?}, v {:?}", q.shape, k.shape, v.shape),
            ));
        }
        let d_k = q.shape[2];

        // Q @ K^T: [batch, seq, d_k] @ [batch, d_k, seq] -> [batch, seq, seq]
        let scale = 1.0 / (d_k as f32).sqrt();
        let scores = q.matmul(&k.transpose(1, 2)?)?.mul_scalar(scale);

        let scores = match mask {
            Some(mask) => scores.masked_fill(mask, f32::NEG_INFINITY)?,
            None => scores,
        };

        let weights = softmax(&scores)?;
        let output = self.dropout.forward(&weights).matmul(v)?;

        Ok((output, weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_tensor(seq: usize, dim: usize, offset: f32) -> Tensor {
        let data = (0..seq * dim)
            .map(|i| ((i as f32 + offset) * 0.37).sin())
            .collect();
        Tensor::new(data, vec![1, seq, dim])
    }

    #[test]
    fn test_causal_mask_single_token_is_noop() {
        assert_eq!(causal_mask(1).data, vec![0.0]);
    }

    #[test]
    fn test_masked_weights_are_exactly_zero() {
        let attn = ScaledDotProductAttention::new(0.0).unwrap();
        let (q, k, v) = (seq_tensor(5, 4, 0.0), seq_tensor(5, 4, 3.0), seq_tensor(5, 4, 7.0));
        let (_, weights) = attn.forward(&q, &k, &v, Some(&causal_mask(5))).unwrap();

        for i in 0..5 {
            let row = &weights.data[i * 5..(i + 1) * 5];
            for (j, &w) in row.iter().enumerate() {
                if j > i {
                    assert_eq!(w, 0.0, "weight ({}, {}) leaked", i, j);
                }
            }
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_first_position_copies_first_value() {
        let attn = ScaledDotProductAttention::new(0.0).unwrap();
        let (q, k, v) = (seq_tensor(3, 2, 0.0), seq_tensor(3, 2, 1.0), seq_tensor(3, 2, 2.0));
        let (out, _) = attn.forward(&q, &k, &v, Some(&causal_mask(3))).unwrap();
        assert!((out.data[0] - v.data[0]).abs() < 1e-6);
        assert!((out.data[1] - v.data[1]).abs() < 1e-6);
    }

    #[test]
    fn test_unmasked_uniform_scores_average_values() {
        let attn = ScaledDotProductAttention::new(0.0).unwrap();
        let q = Tensor::zeros(vec![1, 2, 2]);
        let v = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 2, 2]);
        let (out, weights) = attn.forward(&q, &q, &v, None).unwrap();
        assert_eq!(weights.data, vec![0.5; 4]);
        assert_eq!(out.data, vec![2.0, 3.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mask_length_mismatch_is_error() {
        let attn = ScaledDotProductAttention::new(0.0).unwrap();
        let q = seq_tensor(3, 2, 0.0);
        let result = attn.forward(&q, &q, &q, Some(&causal_mask(4)));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
