//! GPT-2 Byte-Level Tokenizer
//!
//! Converts text to token ids using a pretrained GPT-2 vocabulary and back.
//!
//! ## Byte-Level Encoding
//!
//! GPT-2 vocabularies are written over a printable alphabet: every byte value
//! 0-255 is mapped to one visible Unicode character. Printable Latin-1 bytes
//! map to themselves; the rest (control bytes, space, and a few others) are
//! shifted to code points starting at U+0100. The most visible consequence is
//! that a space becomes `Ġ` (U+0120), so `" world"` is stored as `"Ġworld"`.
//!
//! ## Encoding
//!
//! The byte-encoded text is consumed left to right. At each position the
//! longest vocabulary entry that matches (looking at most 100 characters
//! ahead) is emitted. A character with no vocabulary entry at all is
//! skipped.
//!
//! ```text
//! "Hello world" → "HelloĠworld" → ["Hello", "Ġworld"] → [15496, 995]
//! ```
//!
//! ## Decoding
//!
//! Token strings are concatenated and every byte-level character is mapped
//! back to its byte, so `Ġ` becomes a literal space again. Bytes that do not
//! form valid UTF-8 are replaced with U+FFFD.
//!
//! ## Vocabulary File
//!
//! ```json
//! { "token_to_id": { "Hello": 15496, "Ġworld": 995, ... } }
//! ```
//!
//! A bare `{ "Hello": 15496, ... }` object is accepted as well.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Longest candidate (in byte-level characters) tried at each position
const MATCH_WINDOW: usize = 100;

#[derive(Deserialize)]
#[serde(untagged)]
enum VocabFile {
    Wrapped { token_to_id: HashMap<String, usize> },
    Bare(HashMap<String, usize>),
}

/// The GPT-2 byte ↔ unicode table
///
/// Returns the printable character for every byte value, indexed by byte.
pub fn bytes_to_unicode() -> [char; 256] {
    let printable = |b: u32| {
        (u32::from(b'!')..=u32::from(b'~')).contains(&b)
            || (0xA1..=0xAC).contains(&b)
            || (0xAE..=0xFF).contains(&b)
    };

    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0..256u32 {
        let code = if printable(b) {
            b
        } else {
            shifted += 1;
            255 + shifted
        };
        // Every code is below 0x200, so it is always a valid scalar value
        table[b as usize] = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
    }
    table
}

/// Greedy longest-match tokenizer over a GPT-2 vocabulary
#[derive(Clone, Debug)]
pub struct Gpt2Tokenizer {
    /// Token string → id
    encoder: HashMap<String, usize>,
    /// Id → token string
    decoder: HashMap<usize, String>,
    /// Byte → printable character
    byte_encoder: [char; 256],
    /// Printable character → byte
    byte_decoder: HashMap<char, u8>,
    /// Longest vocabulary entry, in characters
    max_token_chars: usize,
}

impl Gpt2Tokenizer {
    /// Load a vocabulary JSON file
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Vocabulary`] if it is not a `{token: id}` mapping (optionally
    ///   wrapped in `token_to_id`), or the mapping is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let vocab = match serde_json::from_str::<VocabFile>(&json) {
            Ok(VocabFile::Wrapped { token_to_id }) => token_to_id,
            Ok(VocabFile::Bare(map)) => map,
            Err(e) => {
                return Err(Error::Vocabulary(format!(
                    "{} is not a token-to-id mapping: {}",
                    path.display(),
                    e
                )))
            }
        };

        let tokenizer = Self::from_vocab(vocab)?;
        tracing::info!(
            path = %path.display(),
            vocab_size = tokenizer.vocab_size(),
            "loaded vocabulary"
        );
        Ok(tokenizer)
    }

    /// Build from an in-memory token → id mapping
    ///
    /// # Errors
    ///
    /// [`Error::Vocabulary`] if the mapping is empty or two tokens share an id.
    pub fn from_vocab(encoder: HashMap<String, usize>) -> Result<Self> {
        if encoder.is_empty() {
            return Err(Error::Vocabulary("vocabulary is empty".to_string()));
        }

        let mut decoder = HashMap::with_capacity(encoder.len());
        for (token, &id) in &encoder {
            if let Some(previous) = decoder.insert(id, token.clone()) {
                return Err(Error::Vocabulary(format!(
                    "tokens {:?} and {:?} share id {}",
                    previous, token, id
                )));
            }
        }

        let byte_encoder = bytes_to_unicode();
        let byte_decoder = byte_encoder
            .iter()
            .enumerate()
            .map(|(b, &c)| (c, b as u8))
            .collect();
        let max_token_chars = encoder
            .keys()
            .map(|t| t.chars().count())
            .max()
            .unwrap_or(1);

        Ok(Self {
            encoder,
            decoder,
            byte_encoder,
            byte_decoder,
            max_token_chars,
        })
    }

    /// Number of entries in the vocabulary
    pub fn vocab_size(&self) -> usize {
        self.encoder.len()
    }

    pub fn token_to_id(&self, token: &str) -> Option<usize> {
        self.encoder.get(token).copied()
    }

    pub fn id_to_token(&self, id: usize) -> Option<&str> {
        self.decoder.get(&id).map(String::as_str)
    }

    /// Map raw text onto the byte-level alphabet
    fn byte_encode(&self, text: &str) -> Vec<char> {
        text.bytes().map(|b| self.byte_encoder[b as usize]).collect()
    }

    /// Map byte-level characters back to text
    ///
    /// Characters outside the byte-level alphabet are kept as their UTF-8 bytes.
    fn byte_decode(&self, symbols: &str) -> String {
        let mut bytes = Vec::with_capacity(symbols.len());
        for c in symbols.chars() {
            match self.byte_decoder.get(&c) {
                Some(&b) => bytes.push(b),
                None => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Encode text to token ids
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::collections::HashMap;
    /// # use touchstone::Gpt2Tokenizer;
    /// let vocab: HashMap<String, usize> = [("Hello", 0), ("Ġworld", 1), ("Ġ", 2)]
    ///     .into_iter()
    ///     .map(|(t, id)| (t.to_string(), id))
    ///     .collect();
    /// let tokenizer = Gpt2Tokenizer::from_vocab(vocab)?;
    /// assert_eq!(tokenizer.encode("Hello world"), vec![0, 1]);
    /// # Ok::<(), touchstone::Error>(())
    /// ```
    pub fn encode(&self, text: &str) -> Vec<usize> {
        let symbols = self.byte_encode(text);
        let window = MATCH_WINDOW.min(self.max_token_chars);
        let mut ids = Vec::new();
        let mut i = 0;

        while i < symbols.len() {
            let longest = window.min(symbols.len() - i);
            let matched = (1..=longest).rev().find_map(|len| {
                let candidate: String = symbols[i..i + len].iter().collect();
                self.encoder.get(&candidate).map(|&id| (id, len))
            });

            match matched {
                Some((id, len)) => {
                    ids.push(id);
                    i += len;
                }
                // No entry even for the single character: skip it
                None => i += 1,
            }
        }

        ids
    }

    /// Decode token ids to text
    ///
    /// Ids missing from the vocabulary are skipped.
    pub fn decode(&self, ids: &[usize]) -> String {
        let symbols: String = ids
            .iter()
            .filter_map(|id| self.decoder.get(id))
            .map(String::as_str)
            .collect();
        self.byte_decode(&symbols)
    }

    /// Decode a single token id (empty for an unknown id)
    pub fn decode_token(&self, id: usize) -> String {
        self.decode(&[id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(entries: &[(&str, usize)]) -> Gpt2Tokenizer {
        let map = entries
            .iter()
            .map(|(t, id)| (t.to_string(), *id))
            .collect();
        Gpt2Tokenizer::from_vocab(map).unwrap()
    }

    #[test]
    fn test_byte_table() {
        let table = bytes_to_unicode();
        assert_eq!(table[b' ' as usize], 'Ġ');
        assert_eq!(table[b'\n' as usize], 'Ċ');
        assert_eq!(table[b'A' as usize], 'A');
        let mut unique = table.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_longest_match_wins() {
        let tok = vocab(&[("h", 0), ("he", 1), ("hel", 2), ("l", 3), ("o", 4), ("lo", 5)]);
        assert_eq!(tok.encode("hello"), vec![2, 5]);
    }

    #[test]
    fn test_space_marker_roundtrip() {
        let tok = vocab(&[("The", 0), ("Ġcat", 1), ("Ġsat", 2), ("Ċ", 3)]);
        let ids = tok.encode("The cat sat\n");
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(tok.decode(&ids), "The cat sat\n");
        assert_eq!(tok.decode_token(1), " cat");
        assert_eq!(tok.decode_token(3), "\n");
    }

    #[test]
    fn test_unknown_bytes_are_skipped() {
        let tok = vocab(&[("a", 0), ("b", 1)]);
        assert_eq!(tok.encode("a?b"), vec![0, 1]);
        assert_eq!(tok.decode(&[0, 99, 1]), "ab");
        assert_eq!(tok.decode_token(99), "");
    }

    #[test]
    fn test_multibyte_characters() {
        // "é" is 0xC3 0xA9; both bytes are printable Latin-1
        let tok = vocab(&[("Ã©", 0)]);
        assert_eq!(tok.encode("é"), vec![0]);
        assert_eq!(tok.decode(&[0]), "é");
    }

    #[test]
    fn test_load_wrapped_and_bare_files() {
        let dir = tempfile::tempdir().unwrap();
        let wrapped = dir.path().join("wrapped.json");
        fs::write(&wrapped, r#"{"token_to_id": {"hi": 0, "Ġthere": 1}}"#).unwrap();
        let bare = dir.path().join("bare.json");
        fs::write(&bare, r#"{"hi": 0, "Ġthere": 1}"#).unwrap();

        for path in [&wrapped, &bare] {
            let tok = Gpt2Tokenizer::from_file(path).unwrap();
            assert_eq!(tok.vocab_size(), 2);
            assert_eq!(tok.encode("hi there"), vec![0, 1]);
            assert_eq!(tok.id_to_token(1), Some("Ġthere"));
            assert_eq!(tok.token_to_id("hi"), Some(0));
        }
    }

    #[test]
    fn test_invalid_vocabularies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"["not", "a", "map"]"#).unwrap();
        assert!(matches!(
            Gpt2Tokenizer::from_file(&path),
            Err(Error::Vocabulary(_))
        ));

        assert!(Gpt2Tokenizer::from_vocab(HashMap::new()).is_err());
        let dup = [("a".to_string(), 0), ("b".to_string(), 0)].into_iter().collect();
        assert!(Gpt2Tokenizer::from_vocab(dup).is_err());
    }
}
