/// Min/max decimation for plotting.
///
/// Each block of `factor` samples becomes the pair `[max, min]`, so spikes
/// survive the reduction. Output length is `2 * (len / factor)`; a trailing
/// partial block is dropped. `factor <= 1` returns the input unchanged.
pub fn decimate_min_max(samples: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(2 * (samples.len() / factor));
    for block in samples.chunks_exact(factor) {
        let (max, min) = block
            .iter()
            .fold((f32::NEG_INFINITY, f32::INFINITY), |(max, min), &v| {
                (max.max(v), min.min(v))
            });
        out.push(max);
        out.push(min);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pairs_are_max_then_min() {
        let samples = [1.0, -2.0, 3.0, 0.5, 0.0, -1.0, 9.0];
        assert_eq!(decimate_min_max(&samples, 3), vec![3.0, -2.0, 0.5, -1.0]);
    }

    #[test]
    fn test_identity_factor() {
        let samples = [1.0, 2.0, 3.0];
        assert_eq!(decimate_min_max(&samples, 1), samples.to_vec());
        assert_eq!(decimate_min_max(&samples, 0), samples.to_vec());
    }

    #[test]
    fn test_shorter_than_block() {
        assert!(decimate_min_max(&[1.0, 2.0], 5).is_empty());
    }

    proptest! {
        #[test]
        fn prop_length_and_bounds(
            samples in prop::collection::vec(-1.0e3f32..1.0e3, 0..500),
            factor in 2usize..50,
        ) {
            let out = decimate_min_max(&samples, factor);
            prop_assert_eq!(out.len(), 2 * (samples.len() / factor));
            for (pair, block) in out.chunks(2).zip(samples.chunks_exact(factor)) {
                prop_assert!(block.iter().all(|&v| v <= pair[0] && v >= pair[1]));
                prop_assert!(block.contains(&pair[0]) && block.contains(&pair[1]));
            }
        }
    }
}
