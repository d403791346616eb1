//! Sorted-set intersection over distinct ascending `u32` arrays.
//!
//! Three variants cover different size skews, selected by the length ratio
//! of the inputs:
//!
//! - ratio >= 1000: [`gallop`], exponential + binary search on the large
//!   side per rare element.
//! - 50 <= ratio < 1000: [`block_skip`], skipping the large side in wide
//!   blocks using the block maximum, then probing within the block.
//! - ratio < 50: [`stride`], a symmetric merge probing the large side a
//!   short stride at a time.
//!
//! Every variant produces output identical to the plain [`scalar`] merge;
//! the property suite asserts this for random inputs.

/// Plain sequential merge intersection; the reference all variants must
/// match.
pub fn scalar(a: &[u32], b: &[u32], out: &mut [u32]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut i = 0usize;
    let mut j = 0usize;
    let mut n = 0usize;

    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            out[n] = a[i];
            n += 1;
            i += 1;
            j += 1;
        }
    }

    n
}

/// Exponential probe followed by binary search: the first index after `pos`
/// whose element is `>= min`, or `len` when none exists.
fn gallop_advance(array: &[u32], pos: usize, min: u32) -> usize {
    let len = array.len();
    let lower = pos + 1;

    // Common sequential case.
    if lower >= len || array[lower] >= min {
        return lower;
    }

    let mut span = 1usize;
    while lower + span < len && array[lower + span] < min {
        span *= 2;
    }

    let mut upper = (lower + span).min(len - 1);
    if array[upper] < min {
        return len;
    }

    let mut lower = lower + span / 2;
    while lower + 1 != upper {
        let mid = (lower + upper) / 2;
        if array[mid] == min {
            return mid;
        } else if array[mid] < min {
            lower = mid;
        } else {
            upper = mid;
        }
    }

    upper
}

/// One-sided galloping intersection for heavily skewed inputs.
pub fn gallop(a: &[u32], b: &[u32], out: &mut [u32]) -> usize {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if small.is_empty() {
        return 0;
    }

    let mut k1 = 0usize;
    let mut k2 = 0usize;
    let mut n = 0usize;

    loop {
        if large[k1] < small[k2] {
            k1 = gallop_advance(large, k1, small[k2]);
            if k1 == large.len() {
                break;
            }
        }

        if small[k2] < large[k1] {
            k2 += 1;
            if k2 == small.len() {
                break;
            }
        } else {
            out[n] = small[k2];
            n += 1;
            k2 += 1;
            if k2 == small.len() {
                break;
            }
            k1 = gallop_advance(large, k1, small[k2]);
            if k1 == large.len() {
                break;
            }
        }
    }

    n
}

/// Elements the block-skip variant examines per large-side block.
const BLOCK: usize = 128;

/// Block-max skipping intersection for moderately skewed inputs.
pub fn block_skip(a: &[u32], b: &[u32], out: &mut [u32]) -> usize {
    let (rare, freq) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if rare.is_empty() || freq.is_empty() {
        return 0;
    }

    let mut n = 0usize;
    let mut base = 0usize;

    for &val in rare {
        // Skip whole blocks whose maximum is below the probe.
        while base + BLOCK <= freq.len() && freq[base + BLOCK - 1] < val {
            base += BLOCK;
        }

        let block_end = (base + BLOCK).min(freq.len());
        let block = &freq[base..block_end];
        if block.is_empty() {
            break;
        }
        if block.binary_search(&val).is_ok() {
            out[n] = val;
            n += 1;
        }
    }

    n
}

/// Elements the stride variant compares per probe.
const STRIDE: usize = 8;

/// Short-stride symmetric intersection for near-equal input sizes.
pub fn stride(a: &[u32], b: &[u32], out: &mut [u32]) -> usize {
    let (rare, freq) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if rare.is_empty() || freq.is_empty() {
        return 0;
    }

    let mut n = 0usize;
    let mut base = 0usize;

    for &val in rare {
        // Advance a stride at a time while the stride maximum is too small.
        while base + STRIDE <= freq.len() && freq[base + STRIDE - 1] < val {
            base += STRIDE;
        }

        let window_end = (base + STRIDE).min(freq.len());
        let mut found = false;
        for &f in &freq[base..window_end] {
            if f == val {
                found = true;
                break;
            }
            if f > val {
                break;
            }
        }
        if found {
            out[n] = val;
            n += 1;
        } else if base >= freq.len() {
            break;
        }
    }

    n
}

/// Intersects two sorted distinct ascending arrays, choosing the variant by
/// size skew. `out` must hold at least `min(a.len(), b.len())` elements and
/// must not alias either input; the intersection is written ascending and
/// its cardinality returned.
pub fn intersect(a: &[u32], b: &[u32], out: &mut [u32]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (len1, len2) = (a.len(), b.len());
    if 1000 * len1 <= len2 || 1000 * len2 <= len1 {
        gallop(a, b, out)
    } else if 50 * len1 <= len2 || 50 * len2 <= len1 {
        block_skip(a, b, out)
    } else {
        stride(a, b, out)
    }
}

/// Convenience form returning the intersection as an owned vector.
pub fn intersect_to_vec(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; a.len().min(b.len())];
    let n = intersect(a, b, &mut out);
    out.truncate(n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants(a: &[u32], b: &[u32]) -> Vec<Vec<u32>> {
        let variants: [fn(&[u32], &[u32], &mut [u32]) -> usize; 5] =
            [scalar, gallop, block_skip, stride, intersect];
        variants
            .iter()
            .map(|f| {
                let mut out = vec![0u32; a.len().min(b.len())];
                let n = f(a, b, &mut out);
                out.truncate(n);
                out
            })
            .collect()
    }

    fn assert_all_equal(a: &[u32], b: &[u32], expected: &[u32]) {
        for (i, got) in all_variants(a, b).iter().enumerate() {
            assert_eq!(got.as_slice(), expected, "variant {} on |A|={} |B|={}", i, a.len(), b.len());
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert_all_equal(&[], &[1, 2, 3], &[]);
        assert_all_equal(&[1, 2, 3], &[], &[]);
        assert_all_equal(&[], &[], &[]);
    }

    #[test]
    fn test_identical_arrays() {
        let a: Vec<u32> = (0..500).map(|i| i * 3).collect();
        assert_all_equal(&a, &a.clone(), &a);
    }

    #[test]
    fn test_disjoint_arrays() {
        let a: Vec<u32> = (0..300).map(|i| i * 2).collect();
        let b: Vec<u32> = (0..300).map(|i| i * 2 + 1).collect();
        assert_all_equal(&a, &b, &[]);
    }

    #[test]
    fn test_skewed_no_overlap() {
        let a: Vec<u32> = (0..1000).map(|i| i * 30).collect();
        let b = vec![5000u32, 15000, 25000];
        assert_all_equal(&a, &b, &[]);
    }

    #[test]
    fn test_skewed_partial_overlap() {
        let a: Vec<u32> = (0..1000).map(|i| i * 30).collect();
        let b = vec![30u32, 15000, 29970];
        assert_all_equal(&a, &b, &[30, 29970]);
    }

    #[test]
    fn test_interleaved() {
        let a: Vec<u32> = (0..2000).map(|i| i * 7).collect();
        let b: Vec<u32> = (0..2000).map(|i| i * 5).collect();
        let mut expected = vec![0u32; 2000];
        let n = scalar(&a, &b, &mut expected);
        expected.truncate(n);
        assert!(!expected.is_empty());
        assert_all_equal(&a, &b, &expected);
    }

    #[test]
    fn test_commutative() {
        let a: Vec<u32> = (0..1500).map(|i| i * 4).collect();
        let b: Vec<u32> = (0..40).map(|i| i * 100).collect();

        assert_eq!(intersect_to_vec(&a, &b), intersect_to_vec(&b, &a));
    }

    #[test]
    fn test_dispatch_thresholds_covered() {
        // ratio >= 1000 routes to gallop.
        let large: Vec<u32> = (0..100_000).collect();
        let small = vec![0u32, 99_999];
        assert_eq!(intersect_to_vec(&small, &large), vec![0, 99_999]);

        // 50 <= ratio < 1000 routes to block_skip.
        let mid: Vec<u32> = (0..200).map(|i| i * 500).collect();
        assert_eq!(intersect_to_vec(&mid, &large), {
            let mut v: Vec<u32> = mid.iter().copied().filter(|&x| x < 100_000).collect();
            v.sort_unstable();
            v
        });
    }
}
