use crate::index::types::Posting;

/// Intersect posting lists sorted ascending by value.
///
/// The shortest list drives: each of its values is a candidate, and every
/// other list's cursor advances while it is below the candidate. A
/// candidate is kept when all cursors land exactly on it. Runs in the sum
/// of the list lengths. Scores of the result come from the driver list.
pub fn value_intersection(lists: &[&[Posting]]) -> Vec<Posting> {
    let Some(driver_idx) = (0..lists.len()).min_by_key(|&i| lists[i].len()) else {
        return Vec::new();
    };
    let driver = lists[driver_idx];
    let others: Vec<&[Posting]> = lists
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != driver_idx)
        .map(|(_, l)| *l)
        .collect();

    let mut cursors = vec![0usize; others.len()];
    let mut result = Vec::with_capacity(driver.len());

    'candidates: for candidate in driver {
        let mut hit = true;
        for (list, cursor) in others.iter().zip(cursors.iter_mut()) {
            while *cursor < list.len() && list[*cursor].value < candidate.value {
                *cursor += 1;
            }
            if *cursor == list.len() {
                // no later candidate can match either
                break 'candidates;
            }
            if list[*cursor].value != candidate.value {
                hit = false;
            }
        }
        if hit {
            result.push(*candidate);
        }
    }

    result
}

/// Union of posting lists sorted ascending by value; a value found in
/// several lists gets the sum of its scores
pub fn value_union(lists: &[&[Posting]]) -> Vec<Posting> {
    let mut all: Vec<Posting> = lists.iter().flat_map(|l| l.iter().copied()).collect();
    all.sort_unstable_by_key(|p| p.value);

    let mut result: Vec<Posting> = Vec::with_capacity(all.len());
    for p in all {
        match result.last_mut() {
            Some(last) if last.value == p.value => last.score = last.score.saturating_add(p.score),
            _ => result.push(p),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn list(values: &[u64]) -> Vec<Posting> {
        values.iter().map(|&v| Posting::new(v, v as u32)).collect()
    }

    fn naive(lists: &[Vec<Posting>]) -> Vec<u64> {
        let mut sets = lists
            .iter()
            .map(|l| l.iter().map(|p| p.value).collect::<BTreeSet<_>>());
        let Some(first) = sets.next() else {
            return Vec::new();
        };
        sets.fold(first, |acc, s| acc.intersection(&s).copied().collect())
            .into_iter()
            .collect()
    }

    fn check(lists: Vec<Vec<Posting>>) {
        let refs: Vec<&[Posting]> = lists.iter().map(|l| l.as_slice()).collect();
        let got: Vec<u64> = value_intersection(&refs).iter().map(|p| p.value).collect();
        assert_eq!(got, naive(&lists));
    }

    #[test]
    fn test_matches_naive_intersection() {
        check(vec![list(&[1, 2, 3, 5, 8]), list(&[2, 3, 4, 8, 9])]);
        check(vec![list(&[1, 3, 5, 7, 9, 11]), list(&[3, 9]), list(&[0, 3, 6, 9, 12])]);
        check(vec![list(&[10]), list(&[1, 2, 3, 10, 20])]);
    }

    #[test]
    fn test_empty_and_disjoint() {
        check(vec![list(&[]), list(&[1, 2])]);
        check(vec![list(&[1, 3, 5]), list(&[2, 4, 6])]);
        check(vec![list(&[7, 8]), list(&[1, 2])]);
        assert!(value_intersection(&[]).is_empty());
    }

    #[test]
    fn test_single_list_is_identity() {
        let a = list(&[4, 5, 6]);
        assert_eq!(value_intersection(&[&a]), a);
    }

    #[test]
    fn test_scores_from_driver() {
        let long = vec![Posting::new(1, 100), Posting::new(2, 100), Posting::new(3, 100)];
        let short = vec![Posting::new(2, 7)];
        assert_eq!(value_intersection(&[&long, &short]), vec![Posting::new(2, 7)]);
    }

    #[test]
    fn test_union_sums_scores() {
        let a = vec![Posting::new(1, 1), Posting::new(3, 3)];
        let b = vec![Posting::new(2, 2), Posting::new(3, 4)];
        assert_eq!(
            value_union(&[&a, &b]),
            vec![Posting::new(1, 1), Posting::new(2, 2), Posting::new(3, 7)]
        );
    }
}
