//! Position-wise Feedforward Network
//!
//! The two-layer network applied after attention in each transformer block:
//!
//! ```text
//! x → c_fc → GELU → c_proj → y
//! ```
//!
//! GPT-2 expands to a hidden width of `4 × d_model` (`d_ff`) and projects
//! back. Every position is transformed independently with the same weights.

use super::activation::Activation;
use super::dropout::Dropout;
use super::linear::Linear;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Feedforward sublayer: `act(x·W1 + b1)·W2 + b2`
#[derive(Clone, Debug)]
pub struct FeedForward {
    /// Expansion: [d_model, d_ff]
    pub c_fc: Linear,
    /// Projection: [d_ff, d_model]
    pub c_proj: Linear,
    pub activation: Activation,
    pub dropout: Dropout,
}

impl FeedForward {
    /// # Errors
    ///
    /// - [`Error::ShapeMismatch`] if `c_fc` and `c_proj` do not chain back to `d_model`
    /// - [`Error::Config`] for an invalid dropout rate
    pub fn new(
        c_fc: Linear,
        c_proj: Linear,
        activation: Activation,
        dropout_rate: f32,
    ) -> Result<Self> {
        if c_fc.out_features() != c_proj.in_features()
            || c_proj.out_features() != c_fc.in_features()
        {
            return Err(Error::shape(
                "feed_forward",
                format!(
                    "c_fc {:?} does not chain with c_proj {:?}",
                    c_fc.weight.shape, c_proj.weight.shape
                ),
            ));
        }
        Ok(Self {
            c_fc,
            c_proj,
            activation,
            dropout: Dropout::new(dropout_rate)?,
        })
    }

    /// Forward pass: [batch, seq, d_model] → [batch, seq, d_model]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.activation.apply(&self.c_fc.forward(x)?);
        let y = self.c_proj.forward(&h)?;
        Ok(self.dropout.forward(&y))
    }

    pub fn num_parameters(&self) -> usize {
        self.c_fc.num_parameters() + self.c_proj.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::activation::gelu;

    #[test]
    fn test_identity_projections_apply_activation() {
        let ff = FeedForward::new(
            Linear::new(Tensor::eye(2), Tensor::zeros(vec![2]), 2, 2).unwrap(),
            Linear::new(Tensor::eye(2), Tensor::zeros(vec![2]), 2, 2).unwrap(),
            Activation::Gelu,
            0.0,
        )
        .unwrap();
        let x = Tensor::new(vec![-1.0, 0.5, 2.0, -0.25], vec![1, 2, 2]);
        assert_eq!(ff.forward(&x).unwrap(), gelu(&x));
    }

    #[test]
    fn test_relu_variant_with_expansion() {
        // 1 → 2 → 1: h = [x, -x], relu, sum
        let ff = FeedForward::new(
            Linear::new(Tensor::new(vec![1.0, -1.0], vec![1, 2]), Tensor::zeros(vec![2]), 1, 2).unwrap(),
            Linear::new(Tensor::new(vec![1.0, 1.0], vec![2, 1]), Tensor::zeros(vec![1]), 2, 1).unwrap(),
            Activation::Relu,
            0.0,
        )
        .unwrap();
        let x = Tensor::new(vec![3.0, -2.0], vec![1, 2, 1]);
        assert_eq!(ff.forward(&x).unwrap().data, vec![3.0, 2.0]);
    }

    #[test]
    fn test_mismatched_projections() {
        let err = FeedForward::new(
            Linear::new(Tensor::zeros(vec![2, 8]), Tensor::zeros(vec![8]), 2, 8).unwrap(),
            Linear::new(Tensor::zeros(vec![4, 2]), Tensor::zeros(vec![2]), 4, 2).unwrap(),
            Activation::Gelu,
            0.0,
        );
        assert!(err.is_err());
    }
}
