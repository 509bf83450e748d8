//! Transformer Block
//!
//! Combines attention and the feedforward network with residual connections
//! and layer normalization.
//!
//! ## Architecture
//!
//! ```text
//! x → LayerNorm → Attention → (+) → LayerNorm → FeedForward → (+) → output
//! │                            ↑  │                             ↑
//! └────────────────────────────┘  └─────────────────────────────┘
//! ```
//!
//! ## Pre-Norm
//!
//! GPT-2 normalizes the input of each sublayer rather than its output, and the
//! residual stream itself is never normalized inside the block:
//!
//! ```text
//! x1 = x  + MHA(LN1(x), mask)
//! x2 = x1 + FF(LN2(x1))
//! ```

use super::feed_forward::FeedForward;
use super::layer_norm::LayerNorm;
use super::multi_head::MultiHeadAttention;
use crate::error::Result;
use crate::tensor::Tensor;

/// One pre-norm transformer layer
#[derive(Clone, Debug)]
pub struct TransformerBlock {
    /// Layer norm before attention
    pub ln_1: LayerNorm,
    pub attn: MultiHeadAttention,
    /// Layer norm before the feedforward network
    pub ln_2: LayerNorm,
    pub mlp: FeedForward,
}

impl TransformerBlock {
    pub fn new(
        ln_1: LayerNorm,
        attn: MultiHeadAttention,
        ln_2: LayerNorm,
        mlp: FeedForward,
    ) -> Self {
        Self {
            ln_1,
            attn,
            ln_2,
            mlp,
        }
    }

    /// Forward pass through the block
    ///
    /// # Arguments
    ///
    /// * `x` - Residual stream [batch, seq_len, d_model]
    /// * `mask` - Optional causal mask, passed through to attention
    ///
    /// # Returns
    ///
    /// Updated residual stream with the same shape
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        // Attention sublayer with residual connection
        let x = x.add(&self.attn.forward(&self.ln_1.forward(x)?, mask)?)?;

        // Feedforward sublayer with residual connection
        x.add(&self.mlp.forward(&self.ln_2.forward(&x)?)?)
    }

    pub fn set_dropout(&mut self, active: bool) {
        self.attn.set_dropout(active);
        self.mlp.dropout.active = active;
    }

    pub fn num_parameters(&self) -> usize {
        self.ln_1.num_parameters()
            + self.attn.num_parameters()
            + self.ln_2.num_parameters()
            + self.mlp.num_parameters()
    }
}
