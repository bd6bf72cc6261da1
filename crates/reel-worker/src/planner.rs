//! Duration-constrained clip selection.
//!
//! Greedy bin-packing: shuffle the pool, then accumulate clips in shuffled
//! order until the running total reaches the target, stopping immediately
//! once it does. The shuffle keeps repeated runs from always favoring
//! earlier-fetched clips.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use reel_models::Candidate;

use crate::error::{WorkerError, WorkerResult};

/// Result of a selection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPlan {
    /// Chosen clips, in play order
    pub selected: Vec<Candidate>,
    /// Cumulative duration of the chosen clips
    pub total_duration: f64,
    /// True when the whole pool fell short of the target.
    ///
    /// Not an error here: the trim-stage invariant decides whether the
    /// shortfall is fatal.
    pub shortfall: bool,
}

/// Pick clips covering `target_duration` seconds.
pub fn plan_selection<R: Rng + ?Sized>(
    pool: &[Candidate],
    target_duration: f64,
    rng: &mut R,
) -> WorkerResult<SelectionPlan> {
    if pool.is_empty() {
        return Err(WorkerError::validation("no valid candidates to select from"));
    }

    let mut shuffled: Vec<&Candidate> = pool.iter().collect();
    shuffled.shuffle(rng);

    let mut selected = Vec::new();
    let mut total_duration = 0.0;

    for candidate in shuffled {
        selected.push(candidate.clone());
        total_duration += candidate.duration;
        if total_duration >= target_duration {
            return Ok(SelectionPlan {
                selected,
                total_duration,
                shortfall: false,
            });
        }
    }

    warn!(
        target_duration,
        total_duration,
        pool = pool.len(),
        "Candidate pool falls short of the target duration"
    );
    Ok(SelectionPlan {
        selected,
        total_duration,
        shortfall: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool(durations: &[f64]) -> Vec<Candidate> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| Candidate::new(format!("clip-{i}"), *d))
            .collect()
    }

    #[test]
    fn test_empty_pool_is_a_validation_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = plan_selection(&[], 30.0, &mut rng);
        assert!(matches!(result, Err(WorkerError::Validation(_))));
    }

    #[test]
    fn test_selection_covers_target_and_stops_immediately() {
        let pool = pool(&[10.0, 15.0, 8.0, 20.0]);

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_selection(&pool, 30.0, &mut rng).unwrap();

            assert!(!plan.shortfall);
            assert!(plan.total_duration >= 30.0, "seed {seed} fell short");

            // Stopping immediately: without its last clip the selection is
            // below the target.
            let last = plan.selected.last().unwrap();
            assert!(
                plan.total_duration - last.duration < 30.0,
                "seed {seed} over-selected"
            );
        }
    }

    #[test]
    fn test_short_pool_returns_everything_with_warning_flag() {
        let pool = pool(&[5.0, 5.0]);
        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan_selection(&pool, 30.0, &mut rng).unwrap();

        assert!(plan.shortfall);
        assert_eq!(plan.selected.len(), 2);
        assert_eq!(plan.total_duration, 10.0);
    }

    #[test]
    fn test_shuffle_varies_selection_order() {
        let pool = pool(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.0]);

        let mut first_ids = None;
        let mut saw_different = false;
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_selection(&pool, 25.0, &mut rng).unwrap();
            let ids: Vec<String> =
                plan.selected.iter().map(|c| c.clip_id.clone()).collect();
            match &first_ids {
                None => first_ids = Some(ids),
                Some(first) if *first != ids => {
                    saw_different = true;
                    break;
                }
                Some(_) => {}
            }
        }
        assert!(saw_different, "shuffle never changed the selection order");
    }

    #[test]
    fn test_target_exactly_met_counts_as_covered() {
        let pool = pool(&[20.0, 23.0]);
        let mut rng = StdRng::seed_from_u64(3);
        let plan = plan_selection(&pool, 43.0, &mut rng).unwrap();
        assert!(!plan.shortfall);
        assert!(plan.total_duration >= 43.0);
    }
}
