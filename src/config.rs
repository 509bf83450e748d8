//! Model and generation configuration
//!
//! [`Config`] is the architecture record every layer is built from. It is
//! created once, validated, and then only ever borrowed. [`GenerationOptions`]
//! controls the decoding loop.
//!
//! Both are plain serde records, so a checkpoint directory can carry its
//! architecture as JSON next to the weights:
//!
//! ```json
//! {
//!   "num_layers": 12, "num_heads": 12, "d_model": 768, "d_k": 64, "d_v": 64,
//!   "d_ff": 3072, "vocab_size": 50257, "dropout_rate": 0.0, "n_ctx": 1024
//! }
//! ```

use crate::error::{Error, Result};
use crate::layers::layer_norm::DEFAULT_EPS;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_layer_norm_epsilon() -> f32 {
    DEFAULT_EPS
}

/// Architecture hyperparameters
///
/// # Fields
///
/// - `num_layers`: Number of transformer blocks
/// - `num_heads`: Attention heads per block
/// - `d_model`: Width of the residual stream
/// - `d_k`, `d_v`: Per-head query/key and value depth (`d_model / num_heads`)
/// - `d_ff`: Hidden width of the feedforward network
/// - `vocab_size`: Rows of the token embedding table
/// - `dropout_rate`: Dropout probability (inactive during inference)
/// - `n_ctx`: Rows of the position embedding table (maximum sequence length)
/// - `layer_norm_epsilon`: ε added to the variance in every layer norm
///
/// # Parameter Count Formula
///
/// ```text
/// embeddings = (vocab_size + n_ctx) × d_model
/// per_layer  = 4·d_model + (3·d_model² + 3·d_model) + (d_model² + d_model)
///            + (d_model·d_ff + d_ff) + (d_ff·d_model + d_model)
/// total      = embeddings + num_layers × per_layer + 2·d_model + vocab_size × d_model
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub num_layers: usize,
    pub num_heads: usize,
    pub d_model: usize,
    pub d_k: usize,
    pub d_v: usize,
    pub d_ff: usize,
    pub vocab_size: usize,
    pub dropout_rate: f32,
    pub n_ctx: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self::gpt2_small()
    }
}

impl Config {
    /// GPT-2 Small (124M)
    ///
    /// - 12 transformer layers with 12 heads of depth 64
    /// - 768 dimensional embeddings, 3072 wide feedforward
    /// - 50257 token vocabulary, 1024 token context window
    pub fn gpt2_small() -> Self {
        Self {
            num_layers: 12,
            num_heads: 12,
            d_model: 768,
            d_k: 64,
            d_v: 64,
            d_ff: 3072,
            vocab_size: 50257,
            dropout_rate: 0.0,
            n_ctx: 1024,
            layer_norm_epsilon: DEFAULT_EPS,
        }
    }

    /// Tiny consistent config for experiments and tests
    ///
    /// Derives `d_k`, `d_v` and `d_ff` (4× expansion) from the given sizes.
    pub fn tiny(vocab_size: usize, num_layers: usize, d_model: usize, num_heads: usize) -> Self {
        let head_dim = if num_heads == 0 { 0 } else { d_model / num_heads };
        Self {
            num_layers,
            num_heads,
            d_model,
            d_k: head_dim,
            d_v: head_dim,
            d_ff: 4 * d_model,
            vocab_size,
            dropout_rate: 0.0,
            n_ctx: 64,
            layer_norm_epsilon: DEFAULT_EPS,
        }
    }

    /// Load and validate a JSON config file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the architecture invariants
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if any size is zero, `d_model` is not divisible by
    /// `num_heads`, `d_k`/`d_v` disagree with `d_model / num_heads`, the
    /// dropout rate is outside `[0, 1)`, or ε is not positive.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("d_model", self.d_model),
            ("d_k", self.d_k),
            ("d_v", self.d_v),
            ("d_ff", self.d_ff),
            ("vocab_size", self.vocab_size),
            ("n_ctx", self.n_ctx),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("{} must be non-zero", name)));
        }
        if self.d_model % self.num_heads != 0 {
            return Err(Error::Config(format!(
                "d_model {} is not divisible by num_heads {}",
                self.d_model, self.num_heads
            )));
        }
        let head_dim = self.d_model / self.num_heads;
        if self.d_k != head_dim || self.d_v != head_dim {
            return Err(Error::Config(format!(
                "d_k {} / d_v {} must both equal d_model / num_heads = {}",
                self.d_k, self.d_v, head_dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if self.layer_norm_epsilon.is_nan() || self.layer_norm_epsilon <= 0.0 {
            return Err(Error::Config(format!(
                "layer_norm_epsilon must be positive, got {}",
                self.layer_norm_epsilon
            )));
        }
        Ok(())
    }
}

/// Decoding loop settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// Number of candidates kept before sampling
    pub top_k: usize,
    /// Upper bound on sampled tokens per `generate` call
    pub max_new_tokens: usize,
    /// Fragment that ends generation when sampled (`None` disables it)
    pub stop_token: Option<String>,
    /// Seed for reproducible sampling; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            top_k: 40,
            max_new_tokens: 32,
            stop_token: Some("\n".to_string()),
            seed: None,
        }
    }
}

impl GenerationOptions {
    /// # Errors
    ///
    /// [`Error::Config`] if `top_k` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}
