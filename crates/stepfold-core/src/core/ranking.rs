use std::cmp::Ordering;

/// Returns the indices of `scores` ordered from best to worst.
///
/// Higher scores rank first. Ties keep their input order, and NaN scores sort after every
/// number. `[0.5, 0.9, 0.9, 0.1]` yields `[1, 2, 0, 3]`.
pub fn rank_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| descending(scores[a], scores[b]));
    order
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_descending_with_stable_ties() {
        assert_eq!(rank_order(&[0.5, 0.9, 0.9, 0.1]), vec![1, 2, 0, 3]);
    }

    #[test]
    fn nan_sorts_last_in_input_order() {
        assert_eq!(
            rank_order(&[f64::NAN, 0.2, f64::NAN, 0.7]),
            vec![3, 1, 0, 2]
        );
    }

    #[test]
    fn infinities_are_ordinary_extremes() {
        assert_eq!(
            rank_order(&[0.0, f64::NEG_INFINITY, f64::INFINITY]),
            vec![2, 0, 1]
        );
    }

    #[test]
    fn result_is_a_permutation() {
        let scores = [0.3, 0.3, 0.3, 0.8, 0.1, 0.8];
        let mut order = rank_order(&scores);
        assert_eq!(order, vec![3, 5, 0, 1, 2, 4]);
        order.sort_unstable();
        assert_eq!(order, (0..scores.len()).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_gives_empty_order() {
        assert!(rank_order(&[]).is_empty());
    }
}
