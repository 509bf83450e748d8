use proptest::prelude::*;
use touchstone::layers::{
    causal_mask, merge_heads, softmax, split_heads, LayerNorm, ScaledDotProductAttention,
};
use touchstone::Tensor;

fn rows(max_rows: usize, max_width: usize) -> impl Strategy<Value = Tensor> {
    (1..=max_rows, 2..=max_width).prop_flat_map(|(r, w)| {
        prop::collection::vec(-20.0f32..20.0, r * w)
            .prop_map(move |data| Tensor::new(data, vec![1, r, w]))
    })
}

proptest! {
    #[test]
    fn softmax_rows_sum_to_one(x in rows(6, 12)) {
        let width = *x.shape.last().unwrap();
        let y = softmax(&x).unwrap();
        for row in y.data.chunks(width) {
            let sum: f32 = row.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-5);
            prop_assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn softmax_is_shift_invariant(x in rows(4, 10), shift in -50.0f32..50.0) {
        let a = softmax(&x).unwrap();
        let b = softmax(&x.add_scalar(shift)).unwrap();
        for (p, q) in a.data.iter().zip(&b.data) {
            prop_assert!((p - q).abs() < 1e-4);
        }
    }

    #[test]
    fn layer_norm_standardizes_rows(x in rows(5, 16)) {
        let width = *x.shape.last().unwrap();
        let ln = LayerNorm::identity(width);
        let y = ln.normalize(&x).unwrap();
        prop_assert_eq!(&y.shape, &x.shape);

        for (row, input) in y.data.chunks(width).zip(x.data.chunks(width)) {
            let mean = row.iter().sum::<f32>() / width as f32;
            prop_assert!(mean.abs() < 1e-4);

            // Rows with almost no spread are dominated by ε
            let in_mean = input.iter().sum::<f32>() / width as f32;
            let in_var = input.iter().map(|v| (v - in_mean).powi(2)).sum::<f32>() / width as f32;
            if in_var > 1e-2 {
                let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / width as f32;
                prop_assert!((var - 1.0).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn causal_weights_are_zero_above_diagonal(
        seq in 1usize..8,
        depth in 1usize..6,
        seed in prop::collection::vec(-3.0f32..3.0, 64),
    ) {
        let make = |offset: usize| {
            let data = (0..seq * depth).map(|i| seed[(i + offset) % seed.len()]).collect();
            Tensor::new(data, vec![1, seq, depth])
        };
        let attn = ScaledDotProductAttention::new(0.0).unwrap();
        let (_, weights) = attn
            .forward(&make(0), &make(17), &make(31), Some(&causal_mask(seq)))
            .unwrap();
        for i in 0..seq {
            for j in i + 1..seq {
                prop_assert_eq!(weights.data[i * seq + j], 0.0);
            }
        }
    }

    #[test]
    fn head_split_merge_roundtrip(
        heads in 1usize..5,
        depth in 1usize..5,
        seq in 1usize..5,
    ) {
        let width = heads * depth;
        let data = (0..seq * width).map(|i| i as f32 * 0.5 - 3.0).collect();
        let x = Tensor::new(data, vec![1, seq, width]);
        let split = split_heads(&x, heads).unwrap();
        prop_assert_eq!(split.len(), heads);
        prop_assert_eq!(merge_heads(&split).unwrap(), x);
    }
}
