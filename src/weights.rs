//! Weight Store
//!
//! GPT-2 checkpoints are exported as one NumPy `.npy` file per parameter,
//! named by the dotted parameter key:
//!
//! ```text
//! weights/
//!   transformer.wte.weight.npy          [vocab_size, d_model]
//!   transformer.wpe.weight.npy          [n_ctx, d_model]
//!   transformer.h.0.ln_1.weight.npy     [d_model]
//!   transformer.h.0.attn.c_attn.weight.npy  [d_model, 3·d_model]
//!   ...
//!   transformer.ln_f.bias.npy           [d_model]
//!   lm_head.weight.npy                  [vocab_size, d_model]
//! ```
//!
//! ## NPY Format
//!
//! ```text
//! "\x93NUMPY" | major u8 | minor u8 | header_len (u16 v1, u32 v2/v3) | header | data
//! ```
//!
//! The header is a Python dict literal such as
//! `{'descr': '<f4', 'fortran_order': False, 'shape': (768, 2304), }`, padded
//! with spaces and terminated by `\n`. Only little-endian `f4`/`f8` arrays in C
//! order are accepted; `f8` data is narrowed to `f32`.
//!
//! ## Loading
//!
//! [`WeightMap::load`] reads exactly the keys of [`parameter_names`] and fails
//! on the first missing or malformed file, so a partially-loaded model never
//! exists. Files are decoded in parallel.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Standard deviation of GPT-2's weight initialization
const INIT_STD: f32 = 0.02;

/// Every parameter key with its expected shape, in model order
pub fn parameter_shapes(config: &Config) -> Vec<(String, Vec<usize>)> {
    let d = config.d_model;
    let mut params = vec![
        ("transformer.wte.weight".to_string(), vec![config.vocab_size, d]),
        ("transformer.wpe.weight".to_string(), vec![config.n_ctx, d]),
    ];

    for i in 0..config.num_layers {
        let prefix = format!("transformer.h.{}", i);
        let layer = [
            ("ln_1.weight", vec![d]),
            ("ln_1.bias", vec![d]),
            ("attn.c_attn.weight", vec![d, 3 * d]),
            ("attn.c_attn.bias", vec![3 * d]),
            ("attn.c_proj.weight", vec![d, d]),
            ("attn.c_proj.bias", vec![d]),
            ("ln_2.weight", vec![d]),
            ("ln_2.bias", vec![d]),
            ("mlp.c_fc.weight", vec![d, config.d_ff]),
            ("mlp.c_fc.bias", vec![config.d_ff]),
            ("mlp.c_proj.weight", vec![config.d_ff, d]),
            ("mlp.c_proj.bias", vec![d]),
        ];
        params.extend(
            layer
                .into_iter()
                .map(|(name, shape)| (format!("{}.{}", prefix, name), shape)),
        );
    }

    params.push(("transformer.ln_f.weight".to_string(), vec![d]));
    params.push(("transformer.ln_f.bias".to_string(), vec![d]));
    params.push(("lm_head.weight".to_string(), vec![config.vocab_size, d]));
    params
}

/// The full ordered parameter key list for `config`
pub fn parameter_names(config: &Config) -> Vec<String> {
    parameter_shapes(config)
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

/// Path of a parameter's `.npy` file inside a weight directory
pub fn weight_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.npy", key))
}

//
// ============================================================================
// NPY READER / WRITER
// ============================================================================
//

struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Value following `'key':` in the header dict
fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header
        .find(&format!("'{}'", key))
        .or_else(|| header.find(&format!("\"{}\"", key)))?;
    let rest = &header[start + key.len() + 2..];
    let colon = rest.find(':')?;
    Some(rest[colon + 1..].trim_start())
}

fn parse_header(header: &str) -> std::result::Result<NpyHeader, String> {
    let descr_field = header_field(header, "descr").ok_or("header has no 'descr'")?;
    let quote = descr_field
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or("'descr' is not a string")?;
    let descr_body = &descr_field[1..];
    let end = descr_body.find(quote).ok_or("unterminated 'descr'")?;
    let descr = descr_body[..end].to_string();

    let fortran_field =
        header_field(header, "fortran_order").ok_or("header has no 'fortran_order'")?;
    let fortran_order = if fortran_field.starts_with("True") {
        true
    } else if fortran_field.starts_with("False") {
        false
    } else {
        return Err("'fortran_order' is not a boolean".to_string());
    };

    let shape_field = header_field(header, "shape").ok_or("header has no 'shape'")?;
    let shape_body = shape_field
        .strip_prefix('(')
        .and_then(|s| s.find(')').map(|end| &s[..end]))
        .ok_or("'shape' is not a tuple")?;
    let shape = shape_body
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| format!("bad dimension '{}'", s)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
    })
}

/// Decode an in-memory `.npy` file
fn decode_npy(bytes: &[u8]) -> std::result::Result<Tensor, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("missing NPY magic".to_string());
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header length".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(format!("unsupported NPY version {}", v)),
    };

    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err("truncated header".to_string());
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| "header is not valid text".to_string())?;
    let header = parse_header(header)?;

    if header.fortran_order {
        return Err("Fortran-ordered arrays are not supported".to_string());
    }

    let numel = header
        .shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .ok_or_else(|| format!("shape {:?} overflows", header.shape))?;
    let byte_len = |width: usize| {
        numel
            .checked_mul(width)
            .ok_or_else(|| format!("shape {:?} overflows", header.shape))
    };
    let payload = &bytes[data_start..];
    let data: Vec<f32> = match header.descr.as_str() {
        "<f4" => {
            let expected = byte_len(4)?;
            if payload.len() != expected {
                return Err(format!(
                    "expected {} bytes of data for shape {:?}, found {}",
                    expected,
                    header.shape,
                    payload.len()
                ));
            }
            payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
        "<f8" => {
            let expected = byte_len(8)?;
            if payload.len() != expected {
                return Err(format!(
                    "expected {} bytes of data for shape {:?}, found {}",
                    expected,
                    header.shape,
                    payload.len()
                ));
            }
            payload
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    f64::from_le_bytes(b) as f32
                })
                .collect()
        }
        other => return Err(format!("unsupported dtype '{}'", other)),
    };

    Ok(Tensor::new(data, header.shape))
}

/// Read a `.npy` file into a tensor
///
/// # Errors
///
/// - [`Error::Io`] if the file cannot be read
/// - [`Error::MalformedWeight`] for a bad header, unsupported dtype, Fortran
///   order, or a data length that disagrees with the shape
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<Tensor> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode_npy(&bytes).map_err(|reason| Error::MalformedWeight {
        path: path.to_path_buf(),
        reason,
    })
}

/// Load the full parameter set for `config` from `<dir>/<key>.npy`
///
/// Shorthand for [`WeightMap::load`].
pub fn load_weights<P: AsRef<Path>>(dir: P, config: &Config) -> Result<WeightMap> {
    WeightMap::load(dir, config)
}

/// Write a tensor as an NPY v1.0 little-endian `f4` file
pub fn write_npy<P: AsRef<Path>>(path: P, tensor: &Tensor) -> Result<()> {
    let shape = match tensor.shape.as_slice() {
        [d] => format!("({},)", d),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}",
        shape
    );
    // Pad so the data starts on a 64-byte boundary
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(NPY_MAGIC)?;
    file.write_all(&[1u8, 0u8])?; // Version 1.0
    file.write_all(&(header.len() as u16).to_le_bytes())?;
    file.write_all(header.as_bytes())?;
    for &val in &tensor.data {
        file.write_all(&val.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
}

//
// ============================================================================
// WEIGHT MAP
// ============================================================================
//

/// Named parameter tensors, keyed by dotted parameter name
#[derive(Clone, Debug, Default)]
pub struct WeightMap {
    tensors: BTreeMap<String, Tensor>,
}

impl WeightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every parameter `config` requires from `<dir>/<key>.npy`
    ///
    /// # Errors
    ///
    /// - [`Error::MissingWeightFile`] naming the first absent file
    /// - [`Error::MalformedWeight`] naming a file that cannot be decoded
    pub fn load<P: AsRef<Path>>(dir: P, config: &Config) -> Result<Self> {
        let dir = dir.as_ref();
        let start = Instant::now();
        let names = parameter_names(config);

        // Check presence first so a missing file is reported before any decoding
        if let Some(key) = names.iter().find(|key| !weight_path(dir, key).is_file()) {
            return Err(Error::MissingWeightFile {
                key: key.clone(),
                path: weight_path(dir, key),
            });
        }

        let tensors = names
            .into_par_iter()
            .map(|key| -> Result<(String, Tensor)> {
                let path = weight_path(dir, &key);
                let tensor = read_npy(&path).map_err(|e| match e {
                    Error::MalformedWeight { .. } => e,
                    other => Error::MalformedWeight {
                        path: path.clone(),
                        reason: other.to_string(),
                    },
                })?;
                Ok((key, tensor))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let weights = Self { tensors };
        tracing::info!(
            dir = %dir.display(),
            tensors = weights.len(),
            parameters = weights.num_parameters(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded weights"
        );
        Ok(weights)
    }

    /// GPT-2 style random parameters for `config`
    ///
    /// Matrices are drawn from N(0, 0.02); layer norm scales are 1 and
    /// every bias and shift is 0. The same seed always yields the same map.
    pub fn random(config: &Config, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, INIT_STD)
            .map_err(|e| Error::Config(format!("invalid init distribution: {}", e)))?;

        let tensors = parameter_shapes(config)
            .into_iter()
            .map(|(key, shape)| {
                let numel = shape.iter().product();
                let tensor = if key.contains(".ln_") && key.ends_with(".weight") {
                    Tensor::full(shape, 1.0)
                } else if key.ends_with(".bias") {
                    Tensor::zeros(shape)
                } else {
                    let data = (0..numel).map(|_| normal.sample(&mut rng)).collect();
                    Tensor::new(data, shape)
                };
                (key, tensor)
            })
            .collect();

        Ok(Self { tensors })
    }

    /// Write every tensor to `<dir>/<key>.npy`
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for (key, tensor) in &self.tensors {
            write_npy(weight_path(dir, key), tensor)?;
        }
        tracing::info!(dir = %dir.display(), tensors = self.len(), "saved weights");
        Ok(())
    }

    /// Borrow a parameter
    ///
    /// # Errors
    ///
    /// [`Error::MissingParameter`] if `key` is absent.
    pub fn get(&self, key: &str) -> Result<&Tensor> {
        self.tensors.get(key).ok_or_else(|| Error::MissingParameter {
            key: key.to_string(),
        })
    }

    /// Remove and return a parameter
    ///
    /// # Errors
    ///
    /// [`Error::MissingParameter`] if `key` is absent.
    pub fn take(&mut self, key: &str) -> Result<Tensor> {
        self.tensors.remove(key).ok_or_else(|| Error::MissingParameter {
            key: key.to_string(),
        })
    }

    /// Remove a parameter and check its shape
    ///
    /// # Errors
    ///
    /// [`Error::MissingParameter`] if absent, [`Error::ShapeMismatch`] naming the
    /// key if its shape differs from `shape`.
    pub fn take_shaped(&mut self, key: &str, shape: &[usize]) -> Result<Tensor> {
        let tensor = self.take(key)?;
        if tensor.shape != shape {
            return Err(Error::shape(
                "weights",
                format!("`{}` has shape {:?}, expected {:?}", key, tensor.shape, shape),
            ));
        }
        Ok(tensor)
    }

    /// Insert or replace a parameter, returning the previous tensor
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(key.into(), tensor)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Parameter keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(Tensor::numel).sum()
    }
}
