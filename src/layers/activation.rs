//! Activation Functions
//!
//! A small closed set of stateless functions. Layers pick one by tag
//! ([`Activation`]) rather than through a trait object.
//!
//! ## GELU (Gaussian Error Linear Unit)
//!
//! GPT-2's feed-forward sublayer uses GELU with the tanh approximation:
//!
//! ```text
//! GELU(x) ≈ 0.5 × x × (1 + tanh(√(2/π) × (x + 0.044715 × x³)))
//! ```
//!
//! with `√(2/π) ≈ 0.797885`.
//!
//! ## Softmax
//!
//! Softmax is not element-wise, so it lives outside [`Activation`]. It always
//! normalizes over the last axis: key positions in attention, the vocabulary
//! at the model output.

use crate::error::Result;
use crate::tensor::Tensor;

/// √(2/π), the GELU tanh-approximation coefficient
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// Cubic coefficient of the GELU approximation
const GELU_COEFF: f32 = 0.044715;

/// Element-wise activation selected by a composing layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    /// `max(0, x)`
    Relu,
    /// Tanh-approximated GELU (GPT-2 default)
    #[default]
    Gelu,
}

impl Activation {
    /// Apply the activation element-wise
    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            Activation::Relu => relu(x),
            Activation::Gelu => gelu(x),
        }
    }
}

/// GELU activation (tanh approximation)
///
/// # Example
///
/// ```rust
/// # use touchstone::Tensor;
/// # use touchstone::layers::gelu;
/// let y = gelu(&Tensor::new(vec![0.0, 1.0], vec![2]));
/// assert_eq!(y.data[0], 0.0);
/// assert!((y.data[1] - 0.8412).abs() < 1e-3);
/// ```
pub fn gelu(x: &Tensor) -> Tensor {
    x.map(|val| {
        let inner = SQRT_2_OVER_PI * (val + GELU_COEFF * val * val * val);
        0.5 * val * (1.0 + inner.tanh())
    })
}

/// ReLU activation
pub fn relu(x: &Tensor) -> Tensor {
    x.map(|val| val.max(0.0))
}

/// Softmax over the last axis
///
/// See [`Tensor::softmax`] for the stability guards.
pub fn softmax(x: &Tensor) -> Result<Tensor> {
    x.softmax(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gelu_known_values() {
        let x = Tensor::new(vec![-3.0, -1.0, 0.0, 1.0, 3.0], vec![5]);
        let y = gelu(&x);
        let expected = [-0.00363739, -0.158808, 0.0, 0.841192, 2.99636];
        for (got, want) in y.data.iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_relu() {
        let x = Tensor::new(vec![-2.0, 0.0, 2.0], vec![3]);
        assert_eq!(Activation::Relu.apply(&x).data, vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_default_is_gelu() {
        assert_eq!(Activation::default(), Activation::Gelu);
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let x = Tensor::new(vec![0.5, -1.0, 2.0, 0.0], vec![1, 4]);
        let a = softmax(&x).unwrap();
        let b = softmax(&x.add_scalar(100.0)).unwrap();
        for (p, q) in a.data.iter().zip(&b.data) {
            assert!((p - q).abs() < 1e-6);
        }
    }
}
