//! Dropout Layer
//!
//! Dropout randomly zeros activations and scales the survivors by
//! `1 / (1 - p)` so the expected value is unchanged. Inference never uses
//! it: every dropout layer starts inactive and stays a pass-through until a
//! caller explicitly activates it.

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Dropout with an explicit on/off switch
#[derive(Clone, Debug)]
pub struct Dropout {
    pub rate: f32,
    pub active: bool,
}

impl Dropout {
    /// Create an inactive dropout layer
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `rate` is outside `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(Error::Config(format!(
                "dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self {
            rate,
            active: false,
        })
    }

    /// Apply dropout, or return the input unchanged when inactive
    pub fn forward(&self, x: &Tensor) -> Tensor {
        if !self.active || self.rate == 0.0 {
            return x.clone();
        }

        let scale = 1.0 / (1.0 - self.rate);
        let data = x
            .data
            .iter()
            .map(|&v| {
                if rand::random::<f32>() >= self.rate {
                    v * scale
                } else {
                    0.0
                }
            })
            .collect();
        Tensor::new(data, x.shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_rate() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(0.0).is_ok());
    }

    #[test]
    fn test_inactive_is_identity() {
        let dropout = Dropout::new(0.5).unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]);
        assert_eq!(dropout.forward(&x), x);
    }

    #[test]
    fn test_active_zeroes_or_scales() {
        let mut dropout = Dropout::new(0.5).unwrap();
        dropout.active = true;
        let x = Tensor::full(vec![1000], 1.0);
        let y = dropout.forward(&x);
        assert!(y.data.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(y.data.iter().any(|&v| v == 0.0));
    }
}
