//! Hard and soft rules derived from a built model.
//!
//! Static hard constraints (capacity, qualification, room kind, availability
//! and the part of the hour cap that one session alone can break) are folded
//! into a per-unit candidate domain here, once. The dynamic ones (overlaps and
//! cumulative hours) are enforced by the search against `Occupancy`.

use crate::data::SlotRef;
use crate::model::{SessionUnit, TimetableModel};
use crate::occupancy::SlotMask;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardConstraint {
    FacultyOverlap,
    RoomOverlap,
    BatchOverlap,
    RoomCapacity,
    Qualification,
    Availability,
    WeeklyHours,
}

impl HardConstraint {
    pub const ALL: [HardConstraint; 7] = [
        HardConstraint::FacultyOverlap,
        HardConstraint::RoomOverlap,
        HardConstraint::BatchOverlap,
        HardConstraint::RoomCapacity,
        HardConstraint::Qualification,
        HardConstraint::Availability,
        HardConstraint::WeeklyHours,
    ];
}

impl fmt::Display for HardConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HardConstraint::FacultyOverlap => "faculty teaches two sessions at once",
            HardConstraint::RoomOverlap => "room hosts two sessions at once",
            HardConstraint::BatchOverlap => "batch attends two sessions at once",
            HardConstraint::RoomCapacity => "room is smaller than the batch or of the wrong kind",
            HardConstraint::Qualification => "faculty is not qualified for the subject",
            HardConstraint::Availability => "faculty or room is unavailable at that time",
            HardConstraint::WeeklyHours => "faculty exceeds weekly teaching hours",
        };
        f.write_str(text)
    }
}

/// Weights of the soft objectives. Penalties are subtracted, bonuses added.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftWeights {
    pub load_balance: i64,
    pub idle_gap: i64,
    pub same_day_repeat: i64,
    pub back_to_back: i64,
    pub preferred_slot: i64,
}

impl Default for SoftWeights {
    fn default() -> Self {
        Self {
            load_balance: 1,
            idle_gap: 2,
            same_day_repeat: 3,
            back_to_back: 1,
            preferred_slot: 1,
        }
    }
}

/// A start position together with the cells a unit occupies from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Start {
    pub at: SlotRef,
    pub cells: SlotMask,
}

/// Statically feasible choices for one session unit.
#[derive(Debug, Clone)]
pub struct UnitDomain {
    pub faculty: Vec<usize>,
    pub rooms: Vec<usize>,
    pub starts: Vec<Start>,
    /// Count of (faculty, room, start) triples free of static conflicts.
    pub size: usize,
}

impl UnitDomain {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub weights: SoftWeights,
    pub domains: Vec<UnitDomain>,
}

impl ConstraintSet {
    pub fn formulate(model: &TimetableModel, weights: SoftWeights) -> Self {
        let mut domains: Vec<UnitDomain> = Vec::with_capacity(model.units.len());
        for (index, unit) in model.units.iter().enumerate() {
            // sessions of one (batch, subject) pair are adjacent and share a domain
            let sibling = index
                .checked_sub(1)
                .map(|previous| &model.units[previous])
                .is_some_and(|previous| previous.batch == unit.batch && previous.subject == unit.subject);
            let domain = match domains.last() {
                Some(shared) if sibling => shared.clone(),
                _ => unit_domain(model, unit),
            };
            domains.push(domain);
        }

        let empty = domains.iter().filter(|d| d.is_empty()).count();
        debug!(
            "Formulated {} hard constraints and domains for {} units ({} with no feasible placement).",
            HardConstraint::ALL.len(),
            domains.len(),
            empty
        );

        Self {
            weights,
            domains,
        }
    }
}

fn unit_domain(model: &TimetableModel, unit: &SessionUnit) -> UnitDomain {
    let faculty: Vec<usize> = model.qualified_faculty[unit.subject]
        .iter()
        .copied()
        .filter(|&f| model.faculty[f].max_hours >= unit.duration)
        .collect();
    let rooms: Vec<usize> = model.rooms_for_unit(unit).collect();
    let starts: Vec<Start> = model
        .grid
        .starts(unit.duration)
        .map(|at| Start {
            at,
            cells: model.grid.span(at.day, at.slot, unit.duration),
        })
        .collect();

    let mut size = 0;
    for &f in &faculty {
        for &r in &rooms {
            let blocked = model.faculty[f].unavailable | model.rooms[r].unavailable;
            size += starts.iter().filter(|s| !s.cells.intersects(blocked)).count();
        }
    }
    trace!(
        "Unit batch={} subject={} #{}: {} faculty x {} rooms x {} starts -> {} options",
        unit.batch,
        unit.subject,
        unit.ordinal,
        faculty.len(),
        rooms.len(),
        starts.len(),
        size
    );

    UnitDomain {
        faculty,
        rooms,
        starts,
        size,
    }
}

/// Checks the static rules for placing `unit` with `faculty` in `room` over `cells`.
pub fn check_static(
    model: &TimetableModel,
    unit: &SessionUnit,
    faculty: usize,
    room: usize,
    cells: SlotMask,
) -> Result<(), HardConstraint> {
    if !model.qualified_faculty[unit.subject].contains(&faculty) {
        return Err(HardConstraint::Qualification);
    }
    let room_entry = &model.rooms[room];
    if room_entry.capacity < model.batches[unit.batch].strength
        || !model.subjects[unit.subject].kind.accepts(room_entry.kind)
    {
        return Err(HardConstraint::RoomCapacity);
    }
    if model.faculty[faculty].unavailable.intersects(cells) || room_entry.unavailable.intersects(cells) {
        return Err(HardConstraint::Availability);
    }
    Ok(())
}
