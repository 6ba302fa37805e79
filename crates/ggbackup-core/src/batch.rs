//! Splitting work into API-sized batches.

/// Largest number of sub-requests Google accepts in one batch request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Splits `items` into contiguous chunks of at most `size` elements.
///
/// Order is preserved and every element appears in exactly one chunk. An empty
/// input yields no chunks, and a length that is an exact multiple of `size`
/// does not produce a trailing empty chunk. A `size` of zero is treated as one.
pub fn partition<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn empty_input_has_no_batches() {
        let batches = partition::<String>(&[], MAX_BATCH_SIZE);
        assert!(batches.is_empty());
    }

    #[test]
    fn smaller_than_one_batch() {
        let batches = partition(&numbers(3), MAX_BATCH_SIZE);
        assert_eq!(batches, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_batch() {
        let batches = partition(&numbers(2000), MAX_BATCH_SIZE);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == MAX_BATCH_SIZE));
    }

    #[test]
    fn remainder_goes_into_last_batch() {
        let batches = partition(&numbers(2001), MAX_BATCH_SIZE);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec![2000]);
    }

    #[test]
    fn concatenation_reproduces_input() {
        for len in [0, 1, 7, 999, 1000, 1001, 2500] {
            let input = numbers(len);
            let batches = partition(&input, MAX_BATCH_SIZE);

            assert_eq!(batches.len(), len.div_ceil(MAX_BATCH_SIZE), "len {len}");
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_BATCH_SIZE));

            let flattened: Vec<usize> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, input);
        }
    }

    #[test]
    fn small_sizes() {
        let batches = partition(&["a", "b", "c", "d", "e"], 2);
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[test]
    fn zero_size_is_treated_as_one() {
        let batches = partition(&numbers(3), 0);
        assert_eq!(batches, vec![vec![0], vec![1], vec![2]]);
    }
}
