//! Autoregressive Text Generation
//!
//! Drives the model one token at a time:
//!
//! ```text
//! text ──encode──► tokens ──forward──► probs[last] ──top-k──► id ──decode──► fragment
//!   ▲                                                                          │
//!   └──────────────────────────── append ──────────────────────────────────────┘
//! ```
//!
//! Every step re-encodes the whole current text and recomputes attention over
//! the full sequence; there is no key/value cache. Steps are strictly
//! sequential: step `n + 1` starts from the text produced by step `n`.
//!
//! ## States
//!
//! ```text
//! AwaitingPrompt ──generate──► Generating ──stop token──► Stopped
//!                                   │
//!                                   └──max_new_tokens──► MaxLengthReached
//! ```
//!
//! A failed step (for example a context overflow) returns the error and puts
//! the generator back into `AwaitingPrompt`.

use crate::config::{Config, GenerationOptions};
use crate::error::{Error, Result};
use crate::model::Gpt2;
use crate::sampler::TopKSampler;
use crate::tokenizer::Gpt2Tokenizer;
use crate::weights::WeightMap;
use std::path::Path;

/// Where the decoding loop is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorState {
    AwaitingPrompt,
    Generating { steps: usize },
    Stopped,
    MaxLengthReached,
}

/// Why a `generate` call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The sampled fragment equaled the stop token
    StopToken,
    /// `max_new_tokens` fragments were produced
    MaxLength,
}

/// Result of one `generate` call
#[derive(Clone, Debug, PartialEq)]
pub struct Generation {
    /// Prompt followed by every generated fragment
    pub text: String,
    /// Generated fragments only
    pub generated: String,
    /// Number of sampled tokens
    pub steps: usize,
    pub finish: FinishReason,
}

/// Model, tokenizer and sampler bundled into a text generator
#[derive(Debug)]
pub struct Generator {
    model: Gpt2,
    tokenizer: Gpt2Tokenizer,
    options: GenerationOptions,
    sampler: TopKSampler,
    state: GeneratorState,
}

impl Generator {
    /// Load weights and vocabulary from disk
    ///
    /// # Arguments
    ///
    /// * `weight_dir` - Directory of `<key>.npy` files
    /// * `vocab_path` - Vocabulary JSON file
    /// * `config` - Architecture the weights were exported with
    /// * `options` - Sampling settings
    pub fn from_pretrained<P: AsRef<Path>, Q: AsRef<Path>>(
        weight_dir: P,
        vocab_path: Q,
        config: Config,
        options: GenerationOptions,
    ) -> Result<Self> {
        config.validate()?;
        options.validate()?;
        let tokenizer = Gpt2Tokenizer::from_file(vocab_path)?;
        let weights = WeightMap::load(weight_dir, &config)?;
        let model = Gpt2::from_weights(config, weights)?;
        Self::new(model, tokenizer, options)
    }

    /// Assemble from an already-built model and tokenizer
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `options.top_k` is zero.
    pub fn new(model: Gpt2, tokenizer: Gpt2Tokenizer, options: GenerationOptions) -> Result<Self> {
        options.validate()?;
        if tokenizer.vocab_size() != model.config().vocab_size {
            tracing::warn!(
                tokenizer = tokenizer.vocab_size(),
                model = model.config().vocab_size,
                "tokenizer and model vocabulary sizes differ"
            );
        }
        let sampler = TopKSampler::seeded(options.top_k, options.seed)?;
        Ok(Self {
            model,
            tokenizer,
            options,
            sampler,
            state: GeneratorState::AwaitingPrompt,
        })
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    pub fn model(&self) -> &Gpt2 {
        &self.model
    }

    pub fn tokenizer(&self) -> &Gpt2Tokenizer {
        &self.tokenizer
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Sample the next fragment for `current_text` from the top `k` tokens
    ///
    /// # Errors
    ///
    /// - [`Error::EmptySequence`] if the text encodes to no tokens
    /// - [`Error::ContextOverflow`] if it encodes to more than `n_ctx` tokens
    /// - [`Error::Config`] if `k` is zero
    pub fn generate_next_token(&mut self, current_text: &str, k: usize) -> Result<String> {
        self.next_fragment(current_text, Some(k))
    }

    /// One decoding step; `None` samples with the configured `top_k`
    fn next_fragment(&mut self, current_text: &str, k: Option<usize>) -> Result<String> {
        let tokens = self.tokenizer.encode(current_text);
        if tokens.is_empty() {
            return Err(Error::EmptySequence);
        }

        let probs = self.model.next_token_probs(&tokens)?;
        let id = match k {
            Some(k) => self.sampler.sample_top(&probs, k)?,
            None => self.sampler.sample(&probs)?,
        };
        let fragment = self.tokenizer.decode_token(id);

        tracing::debug!(seq_len = tokens.len(), id, fragment = ?fragment, "sampled token");
        Ok(fragment)
    }

    /// Generate until the stop token or `max_new_tokens`
    pub fn generate(&mut self, prompt: &str) -> Result<Generation> {
        self.generate_with(prompt, |_| {})
    }

    /// [`Generator::generate`], calling `on_fragment` with each fragment as it
    /// is sampled
    pub fn generate_with<F>(&mut self, prompt: &str, mut on_fragment: F) -> Result<Generation>
    where
        F: FnMut(&str),
    {
        let mut text = prompt.to_string();
        let mut generated = String::new();
        let mut steps = 0;
        self.state = GeneratorState::Generating { steps };

        let finish = loop {
            if steps >= self.options.max_new_tokens {
                self.state = GeneratorState::MaxLengthReached;
                break FinishReason::MaxLength;
            }

            let fragment = match self.next_fragment(&text, None) {
                Ok(fragment) => fragment,
                Err(e) => {
                    self.state = GeneratorState::AwaitingPrompt;
                    return Err(e);
                }
            };

            steps += 1;
            self.state = GeneratorState::Generating { steps };
            tracing::debug!(step = steps, "generation step");

            text.push_str(&fragment);
            generated.push_str(&fragment);
            on_fragment(&fragment);

            if self.options.stop_token.as_deref() == Some(fragment.as_str()) {
                self.state = GeneratorState::Stopped;
                break FinishReason::StopToken;
            }
        };

        tracing::info!(steps, finish = ?finish, "generation finished");
        Ok(Generation {
            text,
            generated,
            steps,
            finish,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn letters_tokenizer(n: usize) -> Gpt2Tokenizer {
        let map: HashMap<String, usize> = (0..n)
            .map(|i| (((b'a' + i as u8) as char).to_string(), i))
            .collect();
        Gpt2Tokenizer::from_vocab(map).unwrap()
    }

    fn generator(options: GenerationOptions) -> Generator {
        let model = Gpt2::random(Config::tiny(8, 1, 8, 2), 3).unwrap();
        Generator::new(model, letters_tokenizer(8), options).unwrap()
    }

    #[test]
    fn test_max_length_reached() {
        let mut g = generator(GenerationOptions {
            top_k: 3,
            max_new_tokens: 4,
            stop_token: None,
            seed: Some(1),
        });
        assert_eq!(g.state(), GeneratorState::AwaitingPrompt);
        let out = g.generate("ab").unwrap();
        assert_eq!(out.steps, 4);
        assert_eq!(out.finish, FinishReason::MaxLength);
        assert_eq!(out.text, format!("ab{}", out.generated));
        assert_eq!(out.generated.len(), 4);
        assert_eq!(g.state(), GeneratorState::MaxLengthReached);
    }

    #[test]
    fn test_stop_token_ends_generation() {
        // k = 1 is greedy, so the first fragment is known in advance
        let mut g = generator(GenerationOptions {
            top_k: 1,
            max_new_tokens: 10,
            stop_token: None,
            seed: Some(1),
        });
        let first = g.generate_next_token("abc", 1).unwrap();

        let mut g = generator(GenerationOptions {
            top_k: 1,
            max_new_tokens: 10,
            stop_token: Some(first.clone()),
            seed: Some(1),
        });
        let mut streamed = Vec::new();
        let out = g.generate_with("abc", |f| streamed.push(f.to_string())).unwrap();
        assert_eq!(out.finish, FinishReason::StopToken);
        assert_eq!(out.steps, 1);
        assert_eq!(streamed, vec![first]);
        assert_eq!(g.state(), GeneratorState::Stopped);
    }

    #[test]
    fn test_empty_prompt_is_error() {
        let mut g = generator(GenerationOptions::default());
        assert!(matches!(g.generate(""), Err(Error::EmptySequence)));
        // Characters outside the vocabulary encode to nothing as well
        assert!(matches!(g.generate("zzz"), Err(Error::EmptySequence)));
        assert_eq!(g.state(), GeneratorState::AwaitingPrompt);
    }

    #[test]
    fn test_zero_k_rejected() {
        let model = Gpt2::random(Config::tiny(8, 1, 8, 2), 3).unwrap();
        let options = GenerationOptions {
            top_k: 0,
            ..Default::default()
        };
        assert!(matches!(
            Generator::new(model, letters_tokenizer(8), options),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_context_overflow_is_fatal() {
        let mut config = Config::tiny(8, 1, 8, 2);
        config.n_ctx = 3;
        let model = Gpt2::random(config, 0).unwrap();
        let mut g = Generator::new(
            model,
            letters_tokenizer(8),
            GenerationOptions {
                top_k: 2,
                max_new_tokens: 5,
                stop_token: None,
                seed: Some(0),
            },
        )
        .unwrap();
        assert!(matches!(
            g.generate("ab"),
            Err(Error::ContextOverflow { len: 4, max: 3 })
        ));
    }

    #[test]
    fn test_configured_top_k_drives_generation() {
        let mut g = generator(GenerationOptions {
            top_k: 1,
            max_new_tokens: 4,
            stop_token: None,
            seed: None,
        });
        let out = g.generate("cab").unwrap();

        let mut text = "cab".to_string();
        for _ in 0..4 {
            let probs = g.model().next_token_probs(&g.tokenizer().encode(&text)).unwrap();
            let best = (0..probs.len()).fold(0, |b, i| if probs[i] > probs[b] { i } else { b });
            text.push_str(&g.tokenizer().decode_token(best));
        }
        assert_eq!(out.text, text);
    }
}
