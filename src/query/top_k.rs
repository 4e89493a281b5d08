use crate::index::types::Posting;
use std::cmp::Reverse;

/// Order by score descending, then value ascending
pub fn sort_by_score(postings: &mut [Posting]) {
    postings.sort_unstable_by_key(|p| (Reverse(p.score), p.value));
}

/// Score of the posting at rank `limit` (1-based) by descending score,
/// found with a quickselect over the scores.
/// Requires `0 < limit <= postings.len()`.
fn threshold_score(postings: &[Posting], limit: usize) -> u32 {
    let mut scores: Vec<u32> = postings.iter().map(|p| p.score).collect();
    let (_, nth, _) = scores.select_nth_unstable_by_key(limit - 1, |&s| Reverse(s));
    *nth
}

/// The `limit` best postings, ordered by score descending.
///
/// Everything scoring above the score at rank `limit` is kept; the rest of
/// the slots go to postings tied at that score, lowest value first.
pub fn top_k(mut postings: Vec<Posting>, limit: usize) -> Vec<Posting> {
    if limit == 0 {
        return Vec::new();
    }
    if postings.len() > limit {
        let threshold = threshold_score(&postings, limit);

        let (mut kept, mut ties): (Vec<Posting>, Vec<Posting>) = postings
            .into_iter()
            .filter(|p| p.score >= threshold)
            .partition(|p| p.score > threshold);

        ties.sort_unstable_by_key(|p| p.value);
        ties.truncate(limit - kept.len());
        kept.append(&mut ties);
        postings = kept;
    }

    sort_by_score(&mut postings);
    postings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postings(pairs: &[(u64, u32)]) -> Vec<Posting> {
        pairs.iter().map(|&(v, s)| Posting::new(v, s)).collect()
    }

    #[test]
    fn test_under_limit_keeps_all_sorted() {
        let result = top_k(postings(&[(1, 5), (2, 9), (3, 1)]), 10);
        assert_eq!(result, postings(&[(2, 9), (1, 5), (3, 1)]));
    }

    #[test]
    fn test_keeps_highest_scores() {
        let input = postings(&[(1, 3), (2, 8), (3, 1), (4, 6), (5, 7), (6, 2)]);
        let result = top_k(input.clone(), 3);
        assert_eq!(result, postings(&[(2, 8), (5, 7), (4, 6)]));

        let min_kept = result.iter().map(|p| p.score).min().unwrap();
        let excluded_max = input
            .iter()
            .filter(|p| !result.contains(p))
            .map(|p| p.score)
            .max()
            .unwrap();
        assert!(min_kept >= excluded_max);
    }

    #[test]
    fn test_ties_resolved_by_value() {
        let input = postings(&[(9, 5), (3, 5), (7, 9), (1, 5), (4, 2)]);
        let result = top_k(input, 3);
        assert_eq!(result, postings(&[(7, 9), (1, 5), (3, 5)]));
    }

    #[test]
    fn test_all_equal_scores() {
        let input: Vec<Posting> = (0..100u64).rev().map(|v| Posting::new(v, 1)).collect();
        let result = top_k(input, 4);
        assert_eq!(result, postings(&[(0, 1), (1, 1), (2, 1), (3, 1)]));
    }

    #[test]
    fn test_zero_limit() {
        assert!(top_k(postings(&[(1, 1)]), 0).is_empty());
    }
}
