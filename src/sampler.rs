//! Top-k Sampling
//!
//! Picks the next token from the model's last-position distribution:
//!
//! ```text
//! 1. Sort ids by probability, descending (ties → lower id first)
//! 2. Keep the k most probable and renormalize them to sum to 1
//! 3. Draw u ∈ [0, 1) and walk the list accumulating probability
//! 4. Return the first id whose cumulative sum reaches u
//! ```
//!
//! If rounding leaves the final cumulative sum just below `u`, the most
//! probable candidate is returned instead. With `k = 1` sampling is greedy
//! (argmax) regardless of the draw.
//!
//! [`top_k`] and [`select`] are pure; [`TopKSampler`] pairs them with an
//! injectable random source, which is the only nondeterminism in generation.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

/// Descending by probability, then ascending by id
fn rank(probs: &[f32], a: usize, b: usize) -> Ordering {
    probs[b].total_cmp(&probs[a]).then(a.cmp(&b))
}

/// The `k` most probable `(id, probability)` pairs, renormalized
///
/// `k` larger than the distribution is clamped to its length.
///
/// # Errors
///
/// - [`Error::Config`] if `k` is zero
/// - [`Error::EmptySequence`] if `probs` is empty
///
/// # Example
///
/// ```rust
/// # use touchstone::sampler::top_k;
/// let candidates = top_k(&[0.1, 0.6, 0.1, 0.2], 2)?;
/// assert_eq!(candidates[0].0, 1);
/// assert_eq!(candidates[1].0, 3);
/// assert!((candidates[0].1 - 0.75).abs() < 1e-6);
/// # Ok::<(), touchstone::Error>(())
/// ```
pub fn top_k(probs: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
    if k == 0 {
        return Err(Error::Config("top_k must be at least 1".to_string()));
    }
    if probs.is_empty() {
        return Err(Error::EmptySequence);
    }
    let k = k.min(probs.len());

    let mut ids: Vec<usize> = (0..probs.len()).collect();
    if k < ids.len() {
        ids.select_nth_unstable_by(k - 1, |&a, &b| rank(probs, a, b));
        ids.truncate(k);
    }
    ids.sort_unstable_by(|&a, &b| rank(probs, a, b));

    let total: f32 = ids.iter().map(|&id| probs[id]).sum();
    let norm = if total > 0.0 && total.is_finite() {
        total
    } else {
        1.0
    };
    Ok(ids.into_iter().map(|id| (id, probs[id] / norm)).collect())
}

/// Pick from sorted candidates with a uniform draw `u ∈ [0, 1)`
///
/// Returns the first candidate whose cumulative probability is `>= u`, or the
/// first (most probable) candidate when the cumulative sum never reaches `u`.
/// `None` only for an empty candidate list.
pub fn select(candidates: &[(usize, f32)], u: f32) -> Option<usize> {
    let mut cumulative = 0.0;
    for &(id, prob) in candidates {
        cumulative += prob;
        if u <= cumulative {
            return Some(id);
        }
    }

    let (fallback, _) = *candidates.first()?;
    tracing::warn!(
        u,
        cumulative,
        fallback,
        "cumulative probability never reached the draw; using top candidate"
    );
    Some(fallback)
}

/// Top-k sampler over an injectable random source
#[derive(Clone, Debug)]
pub struct TopKSampler<R: Rng = StdRng> {
    k: usize,
    rng: R,
}

impl TopKSampler<StdRng> {
    /// Sampler seeded from `seed`, or from the OS when `None`
    pub fn seeded(k: usize, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self::with_rng(k, rng)
    }
}

impl<R: Rng> TopKSampler<R> {
    /// # Errors
    ///
    /// [`Error::Config`] if `k` is zero.
    pub fn with_rng(k: usize, rng: R) -> Result<Self> {
        if k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }
        Ok(Self { k, rng })
    }

    /// Sample one id from the top `k` of a probability row
    pub fn sample(&mut self, probs: &[f32]) -> Result<usize> {
        self.sample_top(probs, self.k)
    }

    /// Sample with a one-off `k`, sharing this sampler's random stream
    pub fn sample_top(&mut self, probs: &[f32], k: usize) -> Result<usize> {
        let candidates = top_k(probs, k)?;
        let u: f32 = self.rng.random();
        select(&candidates, u).ok_or(Error::EmptySequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_top_k_sorted_and_renormalized() {
        let candidates = top_k(&[0.05, 0.5, 0.05, 0.3, 0.1], 3).unwrap();
        let ids: Vec<usize> = candidates.iter().map(|c| c.0).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        let sum: f32 = candidates.iter().map(|c| c.1).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_prefer_lower_id() {
        let candidates = top_k(&[0.25, 0.25, 0.25, 0.25], 2).unwrap();
        assert_eq!(candidates[0].0, 0);
        assert_eq!(candidates[1].0, 1);
    }

    #[test]
    fn test_k_is_clamped_and_zero_rejected() {
        assert_eq!(top_k(&[0.5, 0.5], 10).unwrap().len(), 2);
        assert!(matches!(top_k(&[1.0], 0), Err(Error::Config(_))));
        assert!(matches!(top_k(&[], 3), Err(Error::EmptySequence)));
    }

    #[test]
    fn test_select_walks_cumulative_sum() {
        let candidates = [(7, 0.5), (2, 0.3), (9, 0.2)];
        assert_eq!(select(&candidates, 0.0), Some(7));
        assert_eq!(select(&candidates, 0.5), Some(7));
        assert_eq!(select(&candidates, 0.6), Some(2));
        assert_eq!(select(&candidates, 0.95), Some(9));
    }

    #[test]
    fn test_select_fallback_to_top() {
        // Probabilities summing below the draw fall back to the first candidate
        assert_eq!(select(&[(4, 0.3), (1, 0.3)], 0.99), Some(4));
        assert_eq!(select(&[], 0.5), None);
    }

    #[test]
    fn test_k1_is_greedy() {
        let mut sampler = TopKSampler::seeded(1, Some(3)).unwrap();
        for _ in 0..20 {
            assert_eq!(sampler.sample(&[0.2, 0.1, 0.6, 0.1]).unwrap(), 2);
        }
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let probs = [0.1, 0.2, 0.3, 0.25, 0.15];
        let mut a = TopKSampler::seeded(5, Some(11)).unwrap();
        let mut b = TopKSampler::seeded(5, Some(11)).unwrap();
        let draws_a: Vec<usize> = (0..50).map(|_| a.sample(&probs).unwrap()).collect();
        let draws_b: Vec<usize> = (0..50).map(|_| b.sample(&probs).unwrap()).collect();
        assert_eq!(draws_a, draws_b);
    }

    proptest! {
        #[test]
        fn prop_sample_is_among_top_k(
            weights in prop::collection::vec(0.0f32..1.0, 2..40),
            k in 1usize..8,
            seed in any::<u64>(),
        ) {
            let total: f32 = weights.iter().sum::<f32>() + 1e-3;
            let probs: Vec<f32> = weights.iter().map(|w| (w + 1e-3 / weights.len() as f32) / total).collect();

            let allowed: Vec<usize> = top_k(&probs, k).unwrap().into_iter().map(|c| c.0).collect();
            let mut sampler = TopKSampler::seeded(k, Some(seed)).unwrap();
            let id = sampler.sample(&probs).unwrap();
            prop_assert!(allowed.contains(&id));

            // Nothing outside the candidate set is more probable than anything inside it
            let min_in = allowed.iter().map(|&i| probs[i]).fold(f32::INFINITY, f32::min);
            for (i, &p) in probs.iter().enumerate() {
                if !allowed.contains(&i) {
                    prop_assert!(p <= min_in);
                }
            }
        }
    }
}
