use crate::constraints::{ConstraintSet, HardConstraint, Start, check_static};
use crate::data::{
    Assignment, BatchId, Schedule, ScheduleStatus, SearchStats, SubjectId, UnmetSoftConstraint,
    UnscheduledSession,
};
use crate::model::TimetableModel;
use crate::occupancy::SlotMask;
use crate::search::{Placement, SearchOutcome};
use itertools::Itertools;
use log::{error, trace};
use std::collections::HashMap;

/// A structurally invalid assignment: a bug in propagation, not bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{constraint}: {detail}")]
    Broken {
        constraint: HardConstraint,
        detail: String,
    },
    #[error("session unit {unit} (batch {batch}, subject {subject}) is placed more than once")]
    DuplicatePlacement {
        unit: usize,
        batch: BatchId,
        subject: SubjectId,
    },
}

impl InvariantViolation {
    /// The hard constraint that was broken, if the violation is one.
    pub fn constraint(&self) -> Option<HardConstraint> {
        match self {
            InvariantViolation::Broken { constraint, .. } => Some(*constraint),
            InvariantViolation::DuplicatePlacement { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub total_slots: usize,
    pub assigned_slots: usize,
    pub conflicts: usize,
    pub score: i64,
    pub unmet: Vec<UnmetSoftConstraint>,
}

fn start_of(constraints: &ConstraintSet, placement: &Placement) -> Start {
    constraints.domains[placement.unit].starts[placement.start]
}

/// Verifies hard constraints 1-6 on a set of placements.
pub fn audit(
    model: &TimetableModel,
    constraints: &ConstraintSet,
    placements: &[Placement],
) -> Result<(), InvariantViolation> {
    let mut faculty_busy = vec![SlotMask::EMPTY; model.faculty.len()];
    let mut room_busy = vec![SlotMask::EMPTY; model.rooms.len()];
    let mut batch_busy = vec![SlotMask::EMPTY; model.batches.len()];
    let mut seen = vec![false; model.units.len()];

    for placement in placements {
        let unit = &model.units[placement.unit];
        let cells = start_of(constraints, placement).cells;

        if std::mem::replace(&mut seen[placement.unit], true) {
            return Err(InvariantViolation::DuplicatePlacement {
                unit: placement.unit,
                batch: model.batches[unit.batch].id,
                subject: model.subjects[unit.subject].id,
            });
        }
        check_static(model, unit, placement.faculty, placement.room, cells).map_err(
            |constraint| InvariantViolation::Broken {
                constraint,
                detail: format!(
                    "unit {} with faculty {} in room {}",
                    placement.unit,
                    model.faculty[placement.faculty].id,
                    model.rooms[placement.room].id
                ),
            },
        )?;

        let overlaps = [
            (
                &mut faculty_busy[placement.faculty],
                HardConstraint::FacultyOverlap,
                model.faculty[placement.faculty].id,
            ),
            (
                &mut room_busy[placement.room],
                HardConstraint::RoomOverlap,
                model.rooms[placement.room].id,
            ),
            (
                &mut batch_busy[unit.batch],
                HardConstraint::BatchOverlap,
                model.batches[unit.batch].id,
            ),
        ];
        for (busy, constraint, id) in overlaps {
            if busy.intersects(cells) {
                return Err(InvariantViolation::Broken {
                    constraint,
                    detail: format!("id {id} is double-booked by unit {}", placement.unit),
                });
            }
            *busy |= cells;
        }
    }
    Ok(())
}

/// Sessions that push a faculty member past their weekly cap.
pub fn hour_overflow(model: &TimetableModel, placements: &[Placement]) -> usize {
    let mut hours = vec![0u32; model.faculty.len()];
    let mut overflow = 0;
    for placement in placements {
        hours[placement.faculty] += model.units[placement.unit].duration;
        if hours[placement.faculty] > model.faculty[placement.faculty].max_hours {
            overflow += 1;
        }
    }
    overflow
}

pub fn evaluate(
    model: &TimetableModel,
    constraints: &ConstraintSet,
    placements: &[Placement],
    unplaced: &[usize],
) -> Evaluation {
    let conflicts = unplaced.len() + hour_overflow(model, placements);
    let (score, unmet) = calculate_score_and_unmet_constraints(model, constraints, placements);
    Evaluation {
        total_slots: model.units.len(),
        assigned_slots: placements.len(),
        conflicts,
        score,
        unmet,
    }
}

fn calculate_score_and_unmet_constraints(
    model: &TimetableModel,
    constraints: &ConstraintSet,
    placements: &[Placement],
) -> (i64, Vec<UnmetSoftConstraint>) {
    let weights = &constraints.weights;
    let grid = &model.grid;
    let mut score = 0;
    let mut unmet = Vec::new();

    // spread each faculty's hours evenly over the week
    let by_faculty: HashMap<usize, Vec<&Placement>> =
        placements.iter().map(|p| (p.faculty, p)).into_group_map();
    for (faculty, assigned) in by_faculty.iter().sorted_by_key(|(f, _)| **f) {
        let mut per_day = vec![0u32; grid.days as usize];
        for p in assigned {
            per_day[start_of(constraints, p).at.day as usize] += model.units[p.unit].duration;
        }
        let total: u32 = per_day.iter().sum();
        let even = total.div_ceil(grid.days.max(1));
        for (day, &hours) in per_day.iter().enumerate() {
            if hours > even {
                let excess = i64::from(hours - even);
                score -= weights.load_balance * excess * excess;
                unmet.push(UnmetSoftConstraint {
                    constraint_type: "Even Faculty Load".to_string(),
                    description: format!(
                        "Faculty {} ({}) teaches {} hours on day {}, above an even spread of {}.",
                        model.faculty[*faculty].id, model.faculty[*faculty].name, hours, day, even
                    ),
                });
            }
        }
    }

    // no idle gaps inside a batch's day
    let mut batch_cells = vec![SlotMask::EMPTY; model.batches.len()];
    for p in placements {
        batch_cells[model.units[p.unit].batch] |= start_of(constraints, p).cells;
    }
    for (batch, cells) in batch_cells.iter().enumerate() {
        for day in 0..grid.days {
            let today = cells.intersection(grid.day_mask(day));
            if let Some((first, last)) = today.bounds() {
                let gap = (last - first + 1) - today.count();
                if gap > 0 {
                    score -= weights.idle_gap * i64::from(gap);
                    unmet.push(UnmetSoftConstraint {
                        constraint_type: "Minimize Idle Gaps".to_string(),
                        description: format!(
                            "Batch {} has {} idle slot(s) on day {}.",
                            model.batches[batch].id, gap, day
                        ),
                    });
                }
            }
        }
    }

    // repeated sessions of one subject go on different days
    let by_subject_day: HashMap<(usize, usize, u32), Vec<&Placement>> = placements
        .iter()
        .map(|p| {
            let unit = &model.units[p.unit];
            ((unit.batch, unit.subject, start_of(constraints, p).at.day), p)
        })
        .into_group_map();
    for ((batch, subject, day), mut sessions) in by_subject_day
        .into_iter()
        .sorted_by_key(|(key, _)| *key)
    {
        if sessions.len() < 2 {
            continue;
        }
        let batch_id = model.batches[batch].id;
        let subject_id = model.subjects[subject].id;
        let subject_name = &model.subjects[subject].name;
        score -= weights.same_day_repeat * (sessions.len() as i64 - 1);
        unmet.push(UnmetSoftConstraint {
            constraint_type: "Spread Subject Sessions".to_string(),
            description: format!(
                "Batch {} has {} sessions of subject {} ({}) on day {}.",
                batch_id,
                sessions.len(),
                subject_id,
                subject_name,
                day
            ),
        });

        sessions.sort_by_key(|p| start_of(constraints, p).at.slot);
        for (current, next) in sessions.iter().tuple_windows() {
            let current_end = start_of(constraints, current).at.slot + model.units[current.unit].duration;
            let next_start = start_of(constraints, next).at.slot;
            if current_end == next_start {
                score -= weights.back_to_back;
                unmet.push(UnmetSoftConstraint {
                    constraint_type: "Avoid Back-to-Back Sessions".to_string(),
                    description: format!(
                        "Batch {} has subject {} ({}) back-to-back on day {} (slot {} ends where slot {} starts).",
                        batch_id, subject_id, subject_name, day, current_end, next_start
                    ),
                });
            }
        }
    }

    // faculty preferred slots
    for p in placements {
        let faculty = &model.faculty[p.faculty];
        if faculty.preferred.is_empty() {
            continue;
        }
        let at = start_of(constraints, p).at;
        if faculty.preferred.contains(grid.cell(at.day, at.slot)) {
            score += weights.preferred_slot;
        } else {
            unmet.push(UnmetSoftConstraint {
                constraint_type: "Preferred Slots".to_string(),
                description: format!(
                    "Faculty {} ({}) teaches at day {} slot {}, outside their preferred slots.",
                    faculty.id, faculty.name, at.day, at.slot
                ),
            });
        }
    }

    trace!("Soft score {} with {} unmet soft constraints.", score, unmet.len());
    (score, unmet)
}

/// Audits a search outcome and turns it into the wire `Schedule`.
///
/// Panics if the outcome breaks a structural hard constraint.
pub fn build_schedule(
    model: &TimetableModel,
    constraints: &ConstraintSet,
    outcome: &SearchOutcome,
) -> Schedule {
    if let Err(violation) = audit(model, constraints, &outcome.placements) {
        error!("Search produced an invalid assignment: {violation}");
        panic!("internal invariant violated: {violation}");
    }

    let evaluation = evaluate(model, constraints, &outcome.placements, &outcome.unplaced);

    let mut assignments = outcome
        .placements
        .iter()
        .map(|p| {
            let unit = &model.units[p.unit];
            let at = start_of(constraints, p).at;
            Assignment {
                batch_id: model.batches[unit.batch].id,
                subject_id: model.subjects[unit.subject].id,
                day: at.day,
                slot: at.slot,
                faculty_id: model.faculty[p.faculty].id,
                room_id: model.rooms[p.room].id,
                duration: unit.duration,
            }
        })
        .collect_vec();
    assignments.sort();

    let unscheduled = outcome
        .unplaced
        .iter()
        .map(|&u| {
            let unit = &model.units[u];
            UnscheduledSession {
                batch_id: model.batches[unit.batch].id,
                subject_id: model.subjects[unit.subject].id,
                ordinal: unit.ordinal,
            }
        })
        .sorted()
        .collect_vec();

    let status = if evaluation.conflicts == 0 && evaluation.assigned_slots == evaluation.total_slots {
        ScheduleStatus::Complete
    } else {
        ScheduleStatus::Partial
    };

    Schedule {
        assignments,
        total_slots: evaluation.total_slots,
        assigned_slots: evaluation.assigned_slots,
        conflicts: evaluation.conflicts,
        status,
        score: evaluation.score,
        unscheduled,
        unmet_soft_constraints: evaluation.unmet,
        stats: SearchStats {
            seed: outcome.tie_break.seed(),
            backtracks: outcome.backtracks,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            budget_exhausted: outcome.budget_exhausted,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::SoftWeights;
    use crate::data::{
        Batch, Faculty, Room, RoomKind, SessionKind, SlotRef, Subject, TimeGrid, TimetableInput,
    };
    use crate::search::TieBreak;
    use std::time::Duration;

    fn setup(preferred: Vec<SlotRef>) -> (TimetableModel, ConstraintSet) {
        let model = TimetableModel::build(&TimetableInput {
            faculty: vec![
                Faculty {
                    id: 1,
                    name: "Ada".into(),
                    department: "CS".into(),
                    subjects: vec![10],
                    max_hours_per_week: 2,
                    unavailable: vec![],
                    preferred,
                },
                Faculty {
                    id: 2,
                    name: "Grace".into(),
                    department: "CS".into(),
                    subjects: vec![10],
                    max_hours_per_week: 10,
                    unavailable: vec![SlotRef::new(1, 1)],
                    preferred: vec![],
                },
            ],
            subjects: vec![Subject {
                id: 10,
                name: "Compilers".into(),
                sessions_per_week: 3,
                duration_slots: 1,
                departments: vec![],
                kind: SessionKind::Lecture,
            }],
            rooms: vec![
                Room {
                    id: 5,
                    name: "A".into(),
                    capacity: 40,
                    kind: RoomKind::Lecture,
                    unavailable: vec![],
                },
                Room {
                    id: 6,
                    name: "B".into(),
                    capacity: 20,
                    kind: RoomKind::Lecture,
                    unavailable: vec![],
                },
            ],
            batches: vec![Batch {
                id: 3,
                department: "CS".into(),
                year: 1,
                strength: 30,
                subjects: vec![10],
            }],
            grid: TimeGrid {
                days: 2,
                slots_per_day: 4,
            },
        })
        .unwrap();
        let constraints = ConstraintSet::formulate(&model, SoftWeights::default());
        (model, constraints)
    }

    /// Index of the domain start at `(day, slot)`; every unit shares the same starts here.
    fn start(constraints: &ConstraintSet, day: u32, slot: u32) -> usize {
        constraints.domains[0]
            .starts
            .iter()
            .position(|s| s.at == SlotRef::new(day, slot))
            .unwrap()
    }

    fn place(constraints: &ConstraintSet, unit: usize, faculty: usize, day: u32, slot: u32) -> Placement {
        Placement {
            unit,
            faculty,
            room: 0,
            start: start(constraints, day, slot),
        }
    }

    #[test]
    fn audit_accepts_valid_and_flags_double_booking() {
        let (model, constraints) = setup(vec![]);
        let valid = vec![
            place(&constraints, 0, 0, 0, 0),
            place(&constraints, 1, 0, 1, 0),
            place(&constraints, 2, 1, 0, 2),
        ];
        assert!(audit(&model, &constraints, &valid).is_ok());

        let clash = vec![place(&constraints, 0, 0, 0, 0), place(&constraints, 1, 1, 0, 0)];
        let violation = audit(&model, &constraints, &clash).unwrap_err();
        assert_eq!(violation.constraint(), Some(HardConstraint::RoomOverlap));
    }

    #[test]
    fn audit_flags_static_violations() {
        let (model, constraints) = setup(vec![]);
        let small_room = vec![Placement {
            room: 1,
            ..place(&constraints, 0, 0, 0, 0)
        }];
        assert_eq!(
            audit(&model, &constraints, &small_room).unwrap_err().constraint(),
            Some(HardConstraint::RoomCapacity)
        );

        let unavailable = vec![place(&constraints, 0, 1, 1, 1)];
        assert_eq!(
            audit(&model, &constraints, &unavailable).unwrap_err().constraint(),
            Some(HardConstraint::Availability)
        );
    }

    #[test]
    fn audit_reports_a_repeated_unit_as_duplicate_placement() {
        let (model, constraints) = setup(vec![]);
        let repeated = vec![place(&constraints, 0, 1, 0, 0), place(&constraints, 0, 1, 1, 0)];
        let violation = audit(&model, &constraints, &repeated).unwrap_err();
        assert_eq!(
            violation,
            InvariantViolation::DuplicatePlacement {
                unit: 0,
                batch: 3,
                subject: 10
            }
        );
        assert_eq!(violation.constraint(), None);
        assert!(violation.to_string().contains("placed more than once"));
    }

    #[test]
    fn counts_unplaced_and_hour_overflow_as_conflicts() {
        let (model, constraints) = setup(vec![]);
        let placements = vec![
            place(&constraints, 0, 0, 0, 0),
            place(&constraints, 1, 0, 0, 2),
            place(&constraints, 2, 0, 1, 0),
        ];
        assert_eq!(hour_overflow(&model, &placements), 1);
        let evaluation = evaluate(&model, &constraints, &placements[..2], &[2]);
        assert_eq!(evaluation.total_slots, 3);
        assert_eq!(evaluation.assigned_slots, 2);
        assert_eq!(evaluation.conflicts, 1);
    }

    #[test]
    fn penalizes_gaps_and_same_day_repeats() {
        let (model, constraints) = setup(vec![]);
        let spread = vec![place(&constraints, 0, 1, 0, 0), place(&constraints, 1, 1, 1, 0)];
        let clustered = vec![place(&constraints, 0, 1, 0, 0), place(&constraints, 1, 1, 0, 2)];

        let good = evaluate(&model, &constraints, &spread, &[2]);
        let bad = evaluate(&model, &constraints, &clustered, &[2]);
        assert!(good.score > bad.score);
        let kinds: Vec<&str> = bad.unmet.iter().map(|u| u.constraint_type.as_str()).collect();
        assert!(kinds.contains(&"Minimize Idle Gaps"));
        assert!(kinds.contains(&"Spread Subject Sessions"));
        assert!(kinds.contains(&"Even Faculty Load"));
    }

    #[test]
    fn back_to_back_sessions_are_reported() {
        let (model, constraints) = setup(vec![]);
        let adjacent = vec![place(&constraints, 0, 1, 0, 0), place(&constraints, 1, 1, 0, 1)];
        let evaluation = evaluate(&model, &constraints, &adjacent, &[2]);
        assert!(
            evaluation
                .unmet
                .iter()
                .any(|u| u.constraint_type == "Avoid Back-to-Back Sessions")
        );
    }

    #[test]
    fn preferred_slots_earn_a_bonus() {
        let (model, constraints) = setup(vec![SlotRef::new(1, 3)]);
        let liked = evaluate(&model, &constraints, &[place(&constraints, 0, 0, 1, 3)], &[1, 2]);
        let other = evaluate(&model, &constraints, &[place(&constraints, 0, 0, 1, 2)], &[1, 2]);
        assert_eq!(liked.score, other.score + 1);
        let missed = other
            .unmet
            .iter()
            .find(|u| u.constraint_type == "Preferred Slots")
            .expect("preferred slot miss is reported");
        assert!(missed.description.starts_with("Faculty 1 (Ada)"));
    }

    #[test]
    fn builds_sorted_wire_schedule() {
        let (model, constraints) = setup(vec![]);
        let outcome = SearchOutcome {
            placements: vec![place(&constraints, 1, 1, 1, 0), place(&constraints, 0, 0, 0, 0)],
            unplaced: vec![2],
            backtracks: 4,
            budget_exhausted: true,
            elapsed: Duration::from_millis(12),
            tie_break: TieBreak::Perturbed { seed: 9 },
        };
        let schedule = build_schedule(&model, &constraints, &outcome);
        assert_eq!(schedule.status, ScheduleStatus::Partial);
        assert_eq!(schedule.assignments[0].day, 0);
        assert_eq!(schedule.assignments[0].faculty_id, 1);
        assert_eq!(schedule.assignments[1].room_id, 5);
        assert_eq!(
            schedule.unscheduled,
            vec![UnscheduledSession {
                batch_id: 3,
                subject_id: 10,
                ordinal: 2
            }]
        );
        assert_eq!(schedule.stats.seed, Some(9));
        assert!(!schedule.is_complete());
    }

    #[test]
    #[should_panic(expected = "internal invariant violated")]
    fn invalid_outcome_aborts() {
        let (model, constraints) = setup(vec![]);
        let outcome = SearchOutcome {
            placements: vec![place(&constraints, 0, 0, 0, 0), place(&constraints, 1, 0, 0, 0)],
            unplaced: vec![2],
            backtracks: 0,
            budget_exhausted: false,
            elapsed: Duration::ZERO,
            tie_break: TieBreak::Canonical,
        };
        build_schedule(&model, &constraints, &outcome);
    }
}
