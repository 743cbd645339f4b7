/// Reorder `items` by the model's `indices`, then trim to `quota`.
///
/// Out-of-range, negative and repeated indices are skipped. Slots the indices
/// did not fill are taken from the unselected items in their original order,
/// so the result always has `min(quota, items.len())` distinct entries.
pub fn reorder<T>(items: Vec<T>, indices: &[i64], quota: usize) -> Vec<T> {
    let target = quota.min(items.len());
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut selected = Vec::with_capacity(target);

    for &index in indices {
        if selected.len() >= target {
            break;
        }
        let Ok(index) = usize::try_from(index) else {
            continue;
        };
        if let Some(item) = slots.get_mut(index).and_then(Option::take) {
            selected.push(item);
        }
    }

    for slot in slots.iter_mut() {
        if selected.len() >= target {
            break;
        }
        if let Some(item) = slot.take() {
            selected.push(item);
        }
    }

    selected
}

/// Fallback path: keep the original order, cut to `quota`.
pub fn truncate<T>(mut items: Vec<T>, quota: usize) -> Vec<T> {
    items.truncate(quota);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn letters(n: usize) -> Vec<char> {
        ('a'..='z').take(n).collect()
    }

    #[test]
    fn test_reorder_skips_out_of_range() {
        let result = reorder(vec!['a', 'b', 'c', 'd'], &[2, 0, 5, 1], 3);
        assert_eq!(result, vec!['c', 'a', 'b']);
    }

    #[test]
    fn test_empty_indices_is_prefix() {
        assert_eq!(reorder(letters(6), &[], 4), letters(4));
    }

    #[test]
    fn test_duplicates_and_negatives_skipped() {
        let result = reorder(letters(5), &[3, 3, -1, 3, 0], 3);
        assert_eq!(result, vec!['d', 'a', 'b']);
    }

    #[test]
    fn test_fill_preserves_original_order() {
        let result = reorder(letters(6), &[4], 4);
        assert_eq!(result, vec!['e', 'a', 'b', 'c']);
    }

    #[test]
    fn test_stops_at_quota() {
        let result = reorder(letters(5), &[4, 3, 2, 1, 0], 2);
        assert_eq!(result, vec!['e', 'd']);
    }

    #[test]
    fn test_quota_larger_than_input() {
        let result = reorder(letters(3), &[2], 10);
        assert_eq!(result, vec!['c', 'a', 'b']);
    }

    #[test]
    fn test_zero_quota_and_empty_input() {
        assert!(reorder(letters(3), &[0, 1], 0).is_empty());
        assert!(reorder(Vec::<char>::new(), &[0, 1], 5).is_empty());
    }

    #[test]
    fn test_output_is_unique_subset_of_expected_length() {
        let items: Vec<u32> = (0..12).collect();
        let cases: [&[i64]; 4] = [&[], &[11, 11, 0, 40, -7, 5], &[100, 200], &[3, 1, 4, 1, 5, 9, 2, 6]];
        for indices in cases {
            for quota in [0, 1, 5, 12, 20] {
                let result = reorder(items.clone(), indices, quota);
                assert_eq!(result.len(), quota.min(items.len()));
                let unique: HashSet<_> = result.iter().collect();
                assert_eq!(unique.len(), result.len());
                assert!(result.iter().all(|x| items.contains(x)));
            }
        }
    }

    #[test]
    fn test_truncate_keeps_order() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(truncate(items.clone(), 4), vec![0, 1, 2, 3]);
        assert_eq!(truncate(items, 40).len(), 10);
    }
}
