//! Candidate generation policies
//!
//! Two policies over the same score machinery: the evolutionary search
//! derives a whole population from the reward table, the coordinate
//! ascent probes one param at a time with low/high neighbours.

use rand::Rng;

use crate::grid::RewardTable;
use crate::param::{CandidateVector, Param};

/// Next evolutionary population of `size` vectors.
///
/// Top quartile: the grid's current best vector unchanged. Second
/// quartile: best vector with one random coordinate moved to that
/// axis's best value excluding the current one. Remainder: best vector
/// with one random coordinate moved to a uniformly chosen different
/// axis value.
pub fn next_population<R: Rng>(
    rewards: &RewardTable,
    size: usize,
    rng: &mut R,
) -> Vec<CandidateVector> {
    let (best, _) = rewards.best_values();

    let mut population = Vec::with_capacity(size);
    while population.len() < size / 4 {
        population.push(best.clone());
    }
    while population.len() < size / 2 {
        population.push(mix_second_value(rewards, &best, rng));
    }
    while population.len() < size {
        population.push(mix_random_value(rewards, &best, rng));
    }
    population
}

/// Replace one random coordinate of `base` with its axis's second-best
/// value (best excluding the coordinate's current value).
pub fn mix_second_value<R: Rng>(
    rewards: &RewardTable,
    base: &CandidateVector,
    rng: &mut R,
) -> CandidateVector {
    let target = rng.gen_range(0..base.len());
    base.with_value(target, rewards.best_excluding(target, base.get(target)))
}

/// Replace one random coordinate of `base` with a uniformly chosen
/// different value on that axis.
pub fn mix_random_value<R: Rng>(
    rewards: &RewardTable,
    base: &CandidateVector,
    rng: &mut R,
) -> CandidateVector {
    let target = rng.gen_range(0..base.len());
    let axis: Vec<i32> = rewards.axis(target).iter().map(|r| r.value).collect();
    base.with_value(target, random_alternative(&axis, base.get(target), rng))
}

/// Uniform choice over `axis` excluding `current`.
///
/// Samples over n-1 indices and shifts past the current value; re-rolls
/// a bounded number of times in case distinct indices carry the same
/// value, and keeps `current` when no alternative exists.
fn random_alternative<R: Rng>(axis: &[i32], current: i32, rng: &mut R) -> i32 {
    if axis.len() < 2 {
        return current;
    }
    for _ in 0..16 {
        let mut index = rng.gen_range(0..axis.len() - 1);
        if axis[index] >= current {
            index += 1;
        }
        if axis[index] != current {
            return axis[index];
        }
    }
    current
}

/// Low/high neighbour values for a coordinate-ascent probe of `param`
/// at `current`.
///
/// Normally one step down and one step up. At an axis bound the probe
/// steps the other direction twice instead, so both probes stay in
/// range.
pub fn probe_values(param: &Param, current: i32) -> (i32, i32) {
    let step = param.step;
    if let Some((min, max)) = param.bounds() {
        if current - step < min {
            return (current + step, current + 2 * step);
        }
        if current + step > max {
            return (current - 2 * step, current - step);
        }
    }
    (current - step, current + step)
}

/// Outcome of a coordinate-ascent probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Neither side beat a draw baseline; the param stays put.
    Keep,
    /// Move the param to this value.
    Move(i32),
}

/// Decide a probe from the two halves' win rates. A move happens only
/// when some side strictly beats 0.5, and goes to the higher rate.
pub fn probe_outcome(low: i32, high: i32, low_rate: f64, high_rate: f64) -> ProbeOutcome {
    if low_rate <= 0.5 && high_rate <= 0.5 {
        ProbeOutcome::Keep
    } else if low_rate >= high_rate {
        ProbeOutcome::Move(low)
    } else {
        ProbeOutcome::Move(high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Score, ScoreGrid};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn bounded(name: &str, normal: i32, min: i32, max: i32, step: i32) -> Param {
        Param {
            name: name.to_string(),
            normal,
            min: Some(min),
            max: Some(max),
            step,
        }
    }

    fn seeded_table() -> (RewardTable, CandidateVector) {
        // two params, clear winners at 1 and 14 respectively
        let params = vec![bounded("a", 2, 1, 3, 1), bounded("b", 12, 10, 14, 1)];
        let mut grid = ScoreGrid::new(&params).unwrap();
        grid.fold(&CandidateVector::new(vec![1, 14]), &Score::new(30, 5));
        grid.fold(&CandidateVector::new(vec![3, 10]), &Score::new(5, 30));

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let table = grid.evaluate(&mut rng);
        let (best, _) = table.best_values();
        (table, best)
    }

    #[test]
    fn test_next_population_quartile_layout() {
        let (table, best) = seeded_table();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let population = next_population(&table, 16, &mut rng);
        assert_eq!(population.len(), 16);

        // top quartile is the untouched best vector
        for vector in &population[..4] {
            assert_eq!(vector, &best);
        }

        // everything else differs from best in at most one coordinate,
        // and stays on the param axes
        for vector in &population[4..] {
            let diffs = vector
                .values()
                .iter()
                .zip(best.values())
                .filter(|(a, b)| a != b)
                .count();
            assert!(diffs <= 1);
            assert!((1..=3).contains(&vector.get(0)));
            assert!((10..=14).contains(&vector.get(1)));
        }
    }

    #[test]
    fn test_mix_random_value_never_keeps_current() {
        let (table, best) = seeded_table();
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        for _ in 0..200 {
            let mixed = mix_random_value(&table, &best, &mut rng);
            let diffs = mixed
                .values()
                .iter()
                .zip(best.values())
                .filter(|(a, b)| a != b)
                .count();
            assert_eq!(diffs, 1);
        }
    }

    #[test]
    fn test_random_alternative_covers_axis() {
        let axis = vec![1, 2, 3, 4];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let v = random_alternative(&axis, 2, &mut rng);
            assert_ne!(v, 2);
            seen[(v - 1) as usize] = true;
        }
        assert!(seen[0] && seen[2] && seen[3]);
    }

    #[test]
    fn test_random_alternative_single_value_axis() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert_eq!(random_alternative(&[7], 7, &mut rng), 7);
    }

    #[test]
    fn test_probe_values_inside_axis() {
        let param = bounded("a", 4, 0, 8, 1);
        assert_eq!(probe_values(&param, 4), (3, 5));
    }

    #[test]
    fn test_probe_values_clamps_at_minimum() {
        let param = bounded("a", 0, 0, 8, 1);
        assert_eq!(probe_values(&param, 0), (1, 2));
    }

    #[test]
    fn test_probe_values_clamps_at_maximum() {
        let param = bounded("a", 8, 0, 8, 1);
        assert_eq!(probe_values(&param, 8), (6, 7));
    }

    #[test]
    fn test_probe_values_unbounded_never_clamps() {
        let param = Param {
            name: "a".to_string(),
            normal: 10,
            min: None,
            max: None,
            step: 5,
        };
        assert_eq!(probe_values(&param, 10), (5, 15));
    }

    #[test]
    fn test_probe_outcome_moves_to_winning_low() {
        // low 9 scores 60-40, high 11 scores 40-60
        assert_eq!(probe_outcome(9, 11, 0.6, 0.4), ProbeOutcome::Move(9));
    }

    #[test]
    fn test_probe_outcome_moves_to_winning_high() {
        assert_eq!(probe_outcome(9, 11, 0.45, 0.62), ProbeOutcome::Move(11));
    }

    #[test]
    fn test_probe_outcome_keeps_on_even_split() {
        // both halves at exactly 50/50: no move
        assert_eq!(probe_outcome(9, 11, 0.5, 0.5), ProbeOutcome::Keep);
    }

    #[test]
    fn test_probe_outcome_keeps_when_both_lose() {
        assert_eq!(probe_outcome(9, 11, 0.48, 0.41), ProbeOutcome::Keep);
    }
}
