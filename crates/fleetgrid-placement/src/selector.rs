//! Weighted random selection.
//!
//! Each candidate owns a half-open interval of the cumulative weight line,
//! sized by its weight. A uniform draw over the total weight picks the
//! candidate whose interval contains it. Heavier candidates win more often
//! without the heaviest one winning every time.

use rand::Rng;

/// Pick one item from `(item, weight)` pairs, proportionally to weight.
///
/// Returns `None` for an empty list or when every weight is zero.
pub fn weighted_random<'a, T, R>(candidates: &'a [(T, u64)], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    let total: u128 = candidates.iter().map(|(_, w)| u128::from(*w)).sum();
    if total == 0 {
        return None;
    }

    let draw = rng.gen_range(0..total);
    let mut cumulative: u128 = 0;
    for (item, weight) in candidates {
        cumulative += u128::from(*weight);
        if draw < cumulative {
            return Some(item);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    #[test]
    fn empty_list_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates: Vec<(&str, u64)> = Vec::new();
        assert!(weighted_random(&candidates, &mut rng).is_none());
    }

    #[test]
    fn all_zero_weights_select_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = vec![("a", 0), ("b", 0)];
        assert!(weighted_random(&candidates, &mut rng).is_none());
    }

    #[test]
    fn zero_weight_candidate_is_never_chosen() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = vec![("never", 0), ("always", 5)];
        for _ in 0..1_000 {
            assert_eq!(weighted_random(&candidates, &mut rng), Some(&"always"));
        }
    }

    #[test]
    fn equal_weights_are_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = vec![("a", 10), ("b", 10), ("c", 10), ("d", 10)];
        let trials = 40_000;

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..trials {
            let picked = weighted_random(&candidates, &mut rng).unwrap();
            *counts.entry(*picked).or_default() += 1;
        }

        let expected = trials as f64 / candidates.len() as f64;
        for (name, count) in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.05, "{name} picked {count} times, expected ~{expected}");
        }
    }

    #[test]
    fn heavier_candidates_win_more_often() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = vec![("big", 100), ("medium", 50), ("small", 10)];

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..16_000 {
            let picked = weighted_random(&candidates, &mut rng).unwrap();
            *counts.entry(*picked).or_default() += 1;
        }

        assert!(counts["big"] > counts["medium"]);
        assert!(counts["medium"] > counts["small"]);
        assert!(counts["small"] > 0, "smaller candidates still get picked");
    }
}
