//! The `generate` operation: build, search in parallel, rank.

use crate::constraints::ConstraintSet;
use crate::data::{Assignment, GenerateOptions, Schedule, TimetableInput};
use crate::evaluator;
use crate::model::{ModelError, TimetableModel};
use crate::search::{SearchEngine, SearchLimits, TieBreak};
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Instant;

/// Builds the model from a snapshot and generates ranked alternatives.
///
/// Fails only when the snapshot itself is unsatisfiable; running out of
/// budget yields partial schedules instead.
pub fn generate(
    input: &TimetableInput,
    options: &GenerateOptions,
) -> Result<Vec<Schedule>, ModelError> {
    let model = TimetableModel::build(input)?;
    Ok(generate_from_model(&model, options))
}

pub fn generate_from_model(model: &TimetableModel, options: &GenerateOptions) -> Vec<Schedule> {
    let start_time = Instant::now();
    let constraints = ConstraintSet::formulate(model, options.weights.clone());
    let limits = SearchLimits {
        backtrack_budget: options.backtrack_budget,
        deadline: start_time.checked_add(options.time_limit),
    };
    let runs = options.runs();
    info!(
        "Generating up to {} alternatives from {} runs over {} session units...",
        options.alternatives(),
        runs,
        model.units.len()
    );

    let candidates: Vec<(usize, Schedule)> = (0..runs)
        .into_par_iter()
        .map(|run| {
            let tie_break = if run == 0 {
                TieBreak::Canonical
            } else {
                TieBreak::Perturbed {
                    seed: options.seed.wrapping_add(run as u64),
                }
            };
            let outcome = SearchEngine::new(model, &constraints, limits, tie_break).run();
            (run, evaluator::build_schedule(model, &constraints, &outcome))
        })
        .collect();

    let schedules = rank(candidates, options.alternatives());
    info!(
        "Generated {} distinct schedules in {:.2?}; best has {}/{} sessions and {} conflicts.",
        schedules.len(),
        start_time.elapsed(),
        schedules.first().map_or(0, |s| s.assigned_slots),
        model.units.len(),
        schedules.first().map_or(0, |s| s.conflicts)
    );
    schedules
}

/// Fewest conflicts, then most assigned, then best score, then earliest run;
/// drops duplicates by assignment set and keeps the first `keep`.
fn rank(candidates: Vec<(usize, Schedule)>, keep: usize) -> Vec<Schedule> {
    let mut seen: HashSet<Vec<Assignment>> = HashSet::new();
    candidates
        .into_iter()
        .sorted_by_key(|(run, s)| (s.conflicts, Reverse(s.assigned_slots), Reverse(s.score), *run))
        .filter(|(_, s)| seen.insert(s.assignments.clone()))
        .map(|(_, s)| s)
        .take(keep)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ScheduleStatus, SearchStats};

    fn schedule(conflicts: usize, assigned: usize, score: i64, slot: u32) -> Schedule {
        Schedule {
            assignments: vec![Assignment {
                batch_id: 1,
                subject_id: 1,
                day: 0,
                slot,
                faculty_id: 1,
                room_id: 1,
                duration: 1,
            }],
            total_slots: 2,
            assigned_slots: assigned,
            conflicts,
            status: ScheduleStatus::Partial,
            score,
            unscheduled: vec![],
            unmet_soft_constraints: vec![],
            stats: SearchStats {
                seed: None,
                backtracks: 0,
                elapsed_ms: 0,
                budget_exhausted: false,
            },
        }
    }

    #[test]
    fn rank_orders_dedupes_and_truncates() {
        let ranked = rank(
            vec![
                (0, schedule(1, 1, 5, 0)),
                (1, schedule(0, 2, -3, 1)),
                (2, schedule(0, 2, 4, 2)),
                (3, schedule(0, 2, 4, 2)),
                (4, schedule(0, 2, 1, 3)),
            ],
            3,
        );
        let slots: Vec<u32> = ranked.iter().map(|s| s.assignments[0].slot).collect();
        assert_eq!(slots, vec![2, 3, 1]);
    }

    #[test]
    fn equal_candidates_keep_the_earliest_run() {
        let mut a = schedule(0, 2, 0, 0);
        a.stats.seed = None;
        let mut b = schedule(0, 2, 0, 0);
        b.stats.seed = Some(5);
        let ranked = rank(vec![(1, b), (0, a)], 2);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].stats.seed, None);
    }
}
