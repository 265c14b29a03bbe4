//! Greedy partitioning of staged records into archives

use std::ops::Range;

/// Split `items` into consecutive runs whose sizes sum to at most `limit`
///
/// A single pass in input order: the current run grows until the next item
/// would push it over `limit`, then a new run starts. An item larger than
/// `limit` on its own becomes a run of one. Every item lands in exactly one
/// run and the runs concatenate back to the input.
pub fn partition<T, F>(items: &[T], limit: u64, mut size_of: F) -> Vec<Range<usize>>
where
    F: FnMut(&T) -> u64,
{
    let mut runs = Vec::new();
    let mut start = 0;
    let mut total = 0u64;

    for (i, item) in items.iter().enumerate() {
        let size = size_of(item);
        if i > start && total.saturating_add(size) > limit {
            runs.push(start..i);
            start = i;
            total = 0;
        }
        total = total.saturating_add(size);
    }

    if start < items.len() {
        runs.push(start..items.len());
    }
    runs
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert!(partition::<u64, _>(&[], 10, |s| *s).is_empty());
    }

    #[test]
    fn test_exact_fit_stays_together() {
        let sizes = [4u64, 6, 10, 1];
        assert_eq!(partition(&sizes, 10, |s| *s), vec![0..2, 2..3, 3..4]);
    }

    #[test]
    fn test_oversize_item_is_alone() {
        let sizes = [3u64, 25, 3, 3];
        assert_eq!(partition(&sizes, 10, |s| *s), vec![0..1, 1..2, 2..4]);
    }

    #[test]
    fn test_order_is_kept() {
        // A later small item never jumps back into an earlier run
        let sizes = [6u64, 6, 4];
        assert_eq!(partition(&sizes, 10, |s| *s), vec![0..1, 1..3]);
    }
}
