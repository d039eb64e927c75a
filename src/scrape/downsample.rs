//! Deterministic thinning of long event series.

use super::rules::DownsamplePolicy;

/// Applies `policy` to `items`, keeping input order within each part.
///
/// The overlay (every `overlay_stride`-th item) comes first, followed by
/// the strided sample. Items selected by both appear twice.
pub fn downsample<T: Clone>(items: &[T], policy: &DownsamplePolicy) -> Vec<T> {
    let overlay_stride = policy.overlay_stride.max(1);
    let overlay = items.iter().step_by(overlay_stride).cloned();

    let stride = if policy.max_samples > 0 && items.len() > policy.max_samples {
        items.len() / policy.max_samples
    } else {
        1
    };
    let sample = items.iter().step_by(stride).cloned();

    overlay.chain(sample).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_thousand_items() {
        let items: Vec<usize> = (0..2000).collect();
        let out = downsample(&items, &DownsamplePolicy::default());
        // overlay: 0, 1000; stride 4 sample: 500 items
        assert_eq!(out.len(), 502);
        assert_eq!(&out[..3], &[0, 1000, 0]);
        assert_eq!(out[out.len() - 1], 1996);
    }

    #[test]
    fn test_small_family_keeps_everything_plus_overlay() {
        let items: Vec<usize> = (0..3).collect();
        let out = downsample(&items, &DownsamplePolicy::default());
        assert_eq!(out, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_empty() {
        let out = downsample::<u8>(&[], &DownsamplePolicy::default());
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn prop_downsample_is_deterministic_and_bounded(len in 0usize..5000) {
            let items: Vec<usize> = (0..len).collect();
            let policy = DownsamplePolicy::default();
            let a = downsample(&items, &policy);
            let b = downsample(&items, &policy);
            prop_assert_eq!(&a, &b);

            let overlay = len.div_ceil(policy.overlay_stride);
            prop_assert!(a.len() >= overlay);
            // stride = len / max keeps at most 2 * max - 1 samples
            prop_assert!(a.len() - overlay < 2 * policy.max_samples);
        }
    }
}
