//! Touchstone: GPT-2 Inference from Scratch
//!
//! A dependency-light implementation of the GPT-2 forward pass and top-k
//! text generation, running pretrained weights on the CPU.
//!
//! # Modules
//!
//! - [`tensor`] - Dense `f32` tensors with broadcasting, matmul and reductions
//! - [`layers`] - Embedding, layer norm, attention, feedforward, transformer block
//! - [`model`] - The full GPT-2 stack
//! - [`weights`] - `.npy` weight store
//! - [`tokenizer`] - GPT-2 byte-level vocabulary tokenizer
//! - [`sampler`] - Top-k sampling
//! - [`generate`] - The autoregressive generation loop
//! - [`config`] - Architecture and generation settings
//!
//! # Example
//!
//! ```rust,no_run
//! use touchstone::{Config, GenerationOptions, Generator};
//!
//! # fn main() -> touchstone::Result<()> {
//! let mut generator = Generator::from_pretrained(
//!     "gpt2-weights/",
//!     "gpt2_vocabulary.json",
//!     Config::gpt2_small(),
//!     GenerationOptions::default(),
//! )?;
//!
//! let out = generator.generate("The meaning of life is")?;
//! println!("{}", out.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod generate;
pub mod layers;
pub mod model;
pub mod sampler;
pub mod tensor;
pub mod tokenizer;
pub mod weights;

// Re-export main types for convenience
pub use config::{Config, GenerationOptions};
pub use error::{Error, Result};
pub use generate::{FinishReason, Generation, Generator, GeneratorState};
pub use model::Gpt2;
pub use sampler::{select, top_k, TopKSampler};
pub use tensor::Tensor;
pub use tokenizer::Gpt2Tokenizer;
pub use weights::{load_weights, parameter_names, read_npy, write_npy, WeightMap};
