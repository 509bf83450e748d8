//! GPT-2 Model Architecture
//!
//! Assembles the layers into the full decoder-only transformer and runs the
//! inference forward pass.
//!
//! ## Architecture Overview
//!
//! ```text
//! Input tokens [seq_len]
//!     ↓
//! Token Embedding + Position Embedding [1, seq_len, d_model]
//!     ↓
//! Transformer Block 0 (Attention + FeedForward)
//!     ↓
//!     ...
//!     ↓
//! Transformer Block N-1
//!     ↓
//! Layer Norm (ln_f)
//!     ↓
//! × lm_headᵀ → logits [1, seq_len, vocab_size]
//!     ↓
//! Softmax → probabilities [1, seq_len, vocab_size]
//! ```
//!
//! The residual stream is threaded through the blocks as a fold in index
//! order; one causal mask is built per call and shared by every layer.
//!
//! ## Example
//!
//! ```rust
//! use touchstone::{Config, Gpt2, WeightMap};
//!
//! # fn main() -> touchstone::Result<()> {
//! let config = Config::tiny(16, 2, 8, 2);
//! let model = Gpt2::from_weights(config.clone(), WeightMap::random(&config, 0)?)?;
//!
//! let probs = model.forward_tokens(&[1, 2, 3])?;
//! assert_eq!(probs.shape, vec![1, 3, 16]);
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::layers::activation::softmax;
use crate::layers::{
    causal_mask, Activation, Embedding, FeedForward, LayerNorm, Linear, MultiHeadAttention,
    TransformerBlock,
};
use crate::tensor::Tensor;
use crate::weights::WeightMap;
use std::time::Instant;

/// Complete GPT-2 model
///
/// Immutable after construction (apart from the dropout switch), so one
/// model can serve any number of concurrent forward passes.
#[derive(Clone, Debug)]
pub struct Gpt2 {
    config: Config,
    /// Token + position embeddings
    pub embedding: Embedding,
    /// Stack of transformer blocks
    pub blocks: Vec<TransformerBlock>,
    /// Final layer normalization
    pub ln_f: LayerNorm,
    /// Output projection, stored transposed: [d_model, vocab_size]
    pub lm_head: Tensor,
}

impl Gpt2 {
    /// Build a model by consuming a weight map
    ///
    /// Every parameter listed by [`crate::weights::parameter_names`] is taken
    /// from the map and its shape checked against `config`. Keys the model does
    /// not use are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `config` is invalid
    /// - [`Error::MissingParameter`] naming the first absent key
    /// - [`Error::ShapeMismatch`] naming a tensor whose shape disagrees with `config`
    pub fn from_weights(config: Config, mut weights: WeightMap) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let d = config.d_model;
        let eps = config.layer_norm_epsilon;

        let embedding = Embedding::new(
            weights.take_shaped("transformer.wte.weight", &[config.vocab_size, d])?,
            weights.take_shaped("transformer.wpe.weight", &[config.n_ctx, d])?,
        )?;

        let blocks = (0..config.num_layers)
            .map(|i| build_block(&mut weights, &config, i))
            .collect::<Result<Vec<_>>>()?;

        let ln_f = LayerNorm::new(
            weights.take_shaped("transformer.ln_f.weight", &[d])?,
            weights.take_shaped("transformer.ln_f.bias", &[d])?,
            d,
            eps,
        )?;

        // [vocab, d_model] → [d_model, vocab] once, so every step is a plain matmul
        let lm_head = weights
            .take_shaped("lm_head.weight", &[config.vocab_size, d])?
            .transpose(0, 1)?;

        if !weights.is_empty() {
            tracing::debug!(unused = weights.len(), "ignoring unused weight entries");
        }

        let model = Self {
            config,
            embedding,
            blocks,
            ln_f,
            lm_head,
        };
        tracing::info!(
            layers = model.config.num_layers,
            heads = model.config.num_heads,
            d_model = model.config.d_model,
            parameters = model.count_parameters(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built model"
        );
        Ok(model)
    }

    /// Model with seeded N(0, 0.02) parameters
    pub fn random(config: Config, seed: u64) -> Result<Self> {
        let weights = WeightMap::random(&config, seed)?;
        Self::from_weights(config, weights)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pre-softmax scores over the vocabulary
    ///
    /// # Arguments
    ///
    /// * `tokens` - Token ids, at most `n_ctx` long
    /// * `mask` - Optional `[1, seq_len, seq_len]` mask shared by all layers
    ///
    /// # Returns
    ///
    /// Logits: [1, seq_len, vocab_size]
    pub fn logits(&self, tokens: &[usize], mask: Option<&Tensor>) -> Result<Tensor> {
        // === 1. Embeddings ===
        let x = self.embedding.forward(tokens)?;

        // === 2. Residual stream through the blocks ===
        let x = self
            .blocks
            .iter()
            .try_fold(x, |x, block| block.forward(&x, mask))?;

        // === 3. Final layer norm ===
        let x = self.ln_f.forward(&x)?;

        // === 4. Project to vocabulary ===
        x.matmul(&self.lm_head)
    }

    /// Next-token probabilities for every position
    ///
    /// # Returns
    ///
    /// Probabilities: [1, seq_len, vocab_size], each row summing to 1
    pub fn forward(&self, tokens: &[usize], mask: Option<&Tensor>) -> Result<Tensor> {
        softmax(&self.logits(tokens, mask)?)
    }

    /// [`Gpt2::forward`] with a fresh causal mask for `tokens`
    pub fn forward_tokens(&self, tokens: &[usize]) -> Result<Tensor> {
        let mask = causal_mask(tokens.len());
        self.forward(tokens, Some(&mask))
    }

    /// Probability row for the final position under causal masking
    pub fn next_token_probs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        let probs = self.forward_tokens(tokens)?;
        let vocab = self.config.vocab_size;
        let last = tokens.len().checked_sub(1).ok_or(Error::EmptySequence)?;
        Ok(probs.data[last * vocab..(last + 1) * vocab].to_vec())
    }

    /// Enable or disable every dropout layer (disabled after construction)
    pub fn set_dropout(&mut self, active: bool) {
        for block in &mut self.blocks {
            block.set_dropout(active);
        }
    }

    /// Count total number of parameters
    pub fn count_parameters(&self) -> usize {
        self.embedding.num_parameters()
            + self
                .blocks
                .iter()
                .map(TransformerBlock::num_parameters)
                .sum::<usize>()
            + self.ln_f.num_parameters()
            + self.lm_head.numel()
    }
}

/// Take one block's twelve parameters from the map
fn build_block(weights: &mut WeightMap, config: &Config, i: usize) -> Result<TransformerBlock> {
    let d = config.d_model;
    let d_ff = config.d_ff;
    let eps = config.layer_norm_epsilon;
    let p = |name: &str| format!("transformer.h.{}.{}", i, name);

    let mut linear = |name: &str, in_features: usize, out_features: usize| -> Result<Linear> {
        Linear::new(
            weights.take_shaped(&p(&format!("{}.weight", name)), &[in_features, out_features])?,
            weights.take_shaped(&p(&format!("{}.bias", name)), &[out_features])?,
            in_features,
            out_features,
        )
    };
    let c_attn = linear("attn.c_attn", d, 3 * d)?;
    let c_proj = linear("attn.c_proj", d, d)?;
    let c_fc = linear("mlp.c_fc", d, d_ff)?;
    let mlp_proj = linear("mlp.c_proj", d_ff, d)?;

    let ln_1 = LayerNorm::new(
        weights.take_shaped(&p("ln_1.weight"), &[d])?,
        weights.take_shaped(&p("ln_1.bias"), &[d])?,
        d,
        eps,
    )?;
    let ln_2 = LayerNorm::new(
        weights.take_shaped(&p("ln_2.weight"), &[d])?,
        weights.take_shaped(&p("ln_2.bias"), &[d])?,
        d,
        eps,
    )?;

    Ok(TransformerBlock::new(
        ln_1,
        MultiHeadAttention::new(c_attn, c_proj, config.num_heads, config.dropout_rate)?,
        ln_2,
        FeedForward::new(c_fc, mlp_proj, Activation::Gelu, config.dropout_rate)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Gpt2 {
        Gpt2::random(Config::tiny(11, 2, 8, 2), 5).unwrap()
    }

    #[test]
    fn test_forward_shape_and_normalization() {
        let model = tiny();
        let probs = model.forward_tokens(&[3, 1, 4]).unwrap();
        assert_eq!(probs.shape, vec![1, 3, 11]);
        for row in probs.data.chunks(11) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_missing_parameter() {
        let config = Config::tiny(11, 2, 8, 2);
        let mut weights = WeightMap::random(&config, 0).unwrap();
        weights.take("transformer.h.1.ln_2.bias").unwrap();
        let err = Gpt2::from_weights(config, weights).unwrap_err();
        match err {
            Error::MissingParameter { key } => assert_eq!(key, "transformer.h.1.ln_2.bias"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_shape_disagreeing_with_config() {
        let config = Config::tiny(11, 1, 8, 2);
        let mut weights = WeightMap::random(&config, 0).unwrap();
        weights.insert("lm_head.weight", Tensor::zeros(vec![8, 11]));
        let err = Gpt2::from_weights(config, weights).unwrap_err();
        assert!(err.to_string().contains("lm_head.weight"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::tiny(11, 1, 8, 2);
        config.num_heads = 3;
        let weights = WeightMap::random(&Config::tiny(11, 1, 8, 2), 0).unwrap();
        assert!(matches!(
            Gpt2::from_weights(config, weights),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parameter_count_matches_weights() {
        let config = Config::tiny(11, 2, 8, 2);
        let weights = WeightMap::random(&config, 0).unwrap();
        let expected = weights.num_parameters();
        let model = Gpt2::from_weights(config, weights).unwrap();
        assert_eq!(model.count_parameters(), expected);
    }

    #[test]
    fn test_context_overflow() {
        let mut config = Config::tiny(11, 1, 8, 2);
        config.n_ctx = 4;
        let model = Gpt2::random(config, 0).unwrap();
        assert!(matches!(
            model.forward_tokens(&[0; 5]),
            Err(Error::ContextOverflow { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_model_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Gpt2>();
    }

    #[test]
    fn test_dropout_toggle() {
        let mut config = Config::tiny(11, 1, 8, 2);
        config.dropout_rate = 0.5;
        let mut model = Gpt2::random(config, 0).unwrap();
        let a = model.forward_tokens(&[1, 2]).unwrap();
        let b = model.forward_tokens(&[1, 2]).unwrap();
        assert_eq!(a, b);

        model.set_dropout(true);
        assert!(model.blocks[0].attn.attention.dropout.active);
        model.set_dropout(false);
        assert_eq!(model.forward_tokens(&[1, 2]).unwrap(), a);
    }
}
