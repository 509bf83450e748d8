//! Neural Network Layers
//!
//! The building blocks of the GPT-2 forward pass, leaves first.
//!
//! ## Layers
//!
//! - **activation**: GELU / ReLU and the last-axis softmax
//! - **dropout**: Dropout with an explicit on/off switch (off for inference)
//! - **linear**: Fully connected layer in the `[in, out]` checkpoint layout
//! - **embedding**: Token + position embedding lookup
//! - **layer_norm**: Layer normalization
//! - **attention**: Single-head scaled dot-product attention and the causal mask
//! - **multi_head**: Multi-head self-attention with fused QKV projection
//! - **feed_forward**: Position-wise feedforward network
//! - **block**: Complete pre-norm transformer block
//!
//! ## Design Pattern
//!
//! Every layer is built from already-loaded tensors and validates their shapes
//! up front, then exposes a pure forward pass:
//!
//! ```rust,ignore
//! impl Layer {
//!     pub fn new(params..., config...) -> Result<Self> { }
//!     pub fn forward(&self, x: &Tensor) -> Result<Tensor> { }
//! }
//! ```
//!
//! Activations are borrowed and every forward pass returns a freshly owned
//! tensor, so a model can be shared across threads.

pub mod activation;
pub mod attention;
pub mod block;
pub mod dropout;
pub mod embedding;
pub mod feed_forward;
pub mod layer_norm;
pub mod linear;
pub mod multi_head;

// Re-export main types for convenience
pub use activation::{gelu, relu, softmax, Activation};
pub use attention::{causal_mask, ScaledDotProductAttention};
pub use block::TransformerBlock;
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use feed_forward::FeedForward;
pub use layer_norm::LayerNorm;
pub use linear::Linear;
pub use multi_head::{merge_heads, split_heads, MultiHeadAttention};
