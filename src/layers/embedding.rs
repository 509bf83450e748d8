//! Input Embedding
//!
//! Converts token ids into vectors by adding a learned token embedding and
//! a learned position embedding:
//!
//! ```text
//! out[0, i, :] = wte[tokens[i], :] + wpe[i, :]
//! ```
//!
//! ## Shape Transformation
//!
//! ```text
//! Input:  [seq_len]            (token IDs)
//! Output: [1, seq_len, n_embd] (embedding vectors)
//! ```
//!
//! The position table's row count is the model's context length; longer
//! sequences are rejected instead of wrapping or truncating.

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Token + position embedding lookup
#[derive(Clone, Debug)]
pub struct Embedding {
    /// Token embedding table: [vocab_size, n_embd]
    pub token_table: Tensor,
    /// Position embedding table: [n_ctx, n_embd]
    pub position_table: Tensor,
}

impl Embedding {
    /// Build from the two lookup tables
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if either table is not rank 2 or their widths differ.
    pub fn new(token_table: Tensor, position_table: Tensor) -> Result<Self> {
        if token_table.rank() != 2
            || position_table.rank() != 2
            || token_table.shape[1] != position_table.shape[1]
        {
            return Err(Error::shape(
                "embedding",
                format!(
                    "token table {:?} and position table {:?} must be [rows, n_embd]",
                    token_table.shape, position_table.shape
                ),
            ));
        }
        Ok(Self {
            token_table,
            position_table,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.token_table.shape[0]
    }

    /// Maximum sequence length (rows of the position table)
    pub fn context_length(&self) -> usize {
        self.position_table.shape[0]
    }

    pub fn n_embd(&self) -> usize {
        self.token_table.shape[1]
    }

    /// Forward pass: look up and sum embeddings for each position
    ///
    /// # Errors
    ///
    /// - [`Error::EmptySequence`] for zero tokens
    /// - [`Error::ContextOverflow`] if `tokens.len()` exceeds the position table
    /// - [`Error::TokenOutOfRange`] for an id outside the token table
    pub fn forward(&self, tokens: &[usize]) -> Result<Tensor> {
        let seq_len = tokens.len();
        if seq_len == 0 {
            return Err(Error::EmptySequence);
        }
        if seq_len > self.context_length() {
            return Err(Error::ContextOverflow {
                len: seq_len,
                max: self.context_length(),
            });
        }

        let n_embd = self.n_embd();
        let mut output = Vec::with_capacity(seq_len * n_embd);

        for (pos, &token_id) in tokens.iter().enumerate() {
            if token_id >= self.vocab_size() {
                return Err(Error::TokenOutOfRange {
                    id: token_id,
                    vocab_size: self.vocab_size(),
                });
            }
            let tok = &self.token_table.data[token_id * n_embd..(token_id + 1) * n_embd];
            let pos_row = &self.position_table.data[pos * n_embd..(pos + 1) * n_embd];
            output.extend(tok.iter().zip(pos_row).map(|(t, p)| t + p));
        }

        Ok(Tensor::new(output, vec![1, seq_len, n_embd]))
    }

    pub fn num_parameters(&self) -> usize {
        self.token_table.numel() + self.position_table.numel()
    }
}
