//! Depth-first assignment search with forward checking.
//!
//! Units are visited in most-constrained-first order. Each visited unit keeps
//! a frame with a cursor into its candidate order, so backtracking is popping
//! a frame and releasing the previous frame's cells from `Occupancy`.
//! Candidates are produced lazily against the current occupancy.

use crate::constraints::ConstraintSet;
use crate::model::TimetableModel;
use crate::occupancy::{Occupancy, SlotMask};
use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::time::{Duration, Instant};

/// Units checked by forward checking between two deadline reads.
const DEADLINE_STRIDE: usize = 32;

/// How ties between equally good faculty, rooms and days are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    Canonical,
    Perturbed { seed: u64 },
}

impl TieBreak {
    pub fn seed(self) -> Option<u64> {
        match self {
            TieBreak::Canonical => None,
            TieBreak::Perturbed { seed } => Some(seed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub backtrack_budget: u64,
    pub deadline: Option<Instant>,
}

/// A committed decision. `start` indexes into the unit's domain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub unit: usize,
    pub faculty: usize,
    pub room: usize,
    pub start: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub placements: Vec<Placement>,
    pub unplaced: Vec<usize>,
    pub backtracks: u64,
    pub budget_exhausted: bool,
    pub elapsed: Duration,
    pub tie_break: TieBreak,
}

/// Position in one unit's faculty × rooms × starts walk.
struct Cursor {
    unit: usize,
    /// Faculty with hours to spare when the cursor was made, lightest first.
    faculty: Vec<usize>,
    next: (usize, usize, usize),
}

struct Frame {
    cursor: Cursor,
    committed: Option<Placement>,
}

struct DeadlineReached;

/// Random secondary keys; all zero for the canonical run.
struct TieKeys {
    faculty: Vec<u32>,
    rooms: Vec<u32>,
    day_shift: Vec<u32>,
}

impl TieKeys {
    fn new(model: &TimetableModel, tie_break: TieBreak) -> Self {
        match tie_break {
            TieBreak::Canonical => Self {
                faculty: vec![0; model.faculty.len()],
                rooms: vec![0; model.rooms.len()],
                day_shift: vec![0; model.units.len()],
            },
            TieBreak::Perturbed { seed } => {
                let mut rng = SmallRng::seed_from_u64(seed);
                let days = model.grid.days.max(1);
                Self {
                    faculty: (0..model.faculty.len()).map(|_| rng.random()).collect(),
                    rooms: (0..model.rooms.len()).map(|_| rng.random()).collect(),
                    day_shift: (0..model.units.len())
                        .map(|_| rng.random_range(0..days))
                        .collect(),
                }
            }
        }
    }
}

/// Orders units with at least one static option, fewest options first.
///
/// Returns the search order and the units that can never be placed.
pub fn most_constrained_order(
    model: &TimetableModel,
    constraints: &ConstraintSet,
) -> (Vec<usize>, Vec<usize>) {
    let (mut order, unplaceable): (Vec<usize>, Vec<usize>) =
        (0..model.units.len()).partition(|&u| !constraints.domains[u].is_empty());
    order.sort_by_key(|&u| {
        let unit = &model.units[u];
        (
            constraints.domains[u].size,
            Reverse(unit.duration),
            Reverse(model.batches[unit.batch].strength),
            u,
        )
    });
    (order, unplaceable)
}

pub struct SearchEngine<'a> {
    model: &'a TimetableModel,
    constraints: &'a ConstraintSet,
    limits: SearchLimits,
    tie_break: TieBreak,
    keys: TieKeys,
    order: Vec<usize>,
    /// Per unit: domain rooms, tightest first.
    room_order: Vec<Vec<usize>>,
    /// Per unit: domain start indices in (shifted) grid order.
    start_order: Vec<Vec<usize>>,
    occupancy: Occupancy,
    backtracks: u64,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        model: &'a TimetableModel,
        constraints: &'a ConstraintSet,
        limits: SearchLimits,
        tie_break: TieBreak,
    ) -> Self {
        let (order, _) = most_constrained_order(model, constraints);
        let keys = TieKeys::new(model, tie_break);
        let days = model.grid.days.max(1);

        let room_order = constraints
            .domains
            .iter()
            .map(|domain| {
                let mut rooms = domain.rooms.clone();
                rooms.sort_by_key(|&r| (model.rooms[r].capacity, keys.rooms[r], r));
                rooms
            })
            .collect();
        let start_order = constraints
            .domains
            .iter()
            .enumerate()
            .map(|(unit, domain)| {
                let shift = keys.day_shift[unit];
                let mut starts: Vec<usize> = (0..domain.starts.len()).collect();
                starts.sort_by_key(|&s| {
                    let at = domain.starts[s].at;
                    ((at.day + days - shift) % days, at.slot)
                });
                starts
            })
            .collect();

        Self {
            model,
            constraints,
            limits,
            tie_break,
            keys,
            order,
            room_order,
            start_order,
            occupancy: Occupancy::new(model),
            backtracks: 0,
        }
    }

    pub fn run(mut self) -> SearchOutcome {
        let started = Instant::now();
        let total = self.order.len();

        // Best-effort fallback, refreshed each time the search gets deeper.
        let mut best = self.complete_greedily(&self.occupancy, 0);
        let mut best_depth = 0;
        let mut complete: Option<Vec<Placement>> = None;
        let mut budget_exhausted = false;
        let mut stack: Vec<Frame> = Vec::with_capacity(total);

        if total == 0 {
            complete = Some(Vec::new());
        } else {
            stack.push(self.frame(self.order[0]));
        }

        while complete.is_none() {
            let depth = stack.len();
            let Some(frame) = stack.last_mut() else {
                debug!("Search space exhausted without a complete assignment.");
                break;
            };

            let mut advanced = false;
            let mut timed_out = false;
            loop {
                if self.past_deadline() {
                    timed_out = true;
                    break;
                }
                let Some(candidate) = self.advance(&self.occupancy, &mut frame.cursor) else {
                    break;
                };
                self.apply(candidate);
                match self.forward_check(depth) {
                    Ok(true) => {
                        frame.committed = Some(candidate);
                        advanced = true;
                        break;
                    }
                    Ok(false) => self.revert(candidate),
                    Err(DeadlineReached) => {
                        self.revert(candidate);
                        timed_out = true;
                        break;
                    }
                }
            }
            if timed_out {
                budget_exhausted = true;
                break;
            }

            if advanced {
                let committed: Vec<Placement> = stack.iter().filter_map(|f| f.committed).collect();
                if depth == total {
                    complete = Some(committed);
                    break;
                }
                if depth > best_depth {
                    best_depth = depth;
                    let mut attempt = committed;
                    attempt.extend(self.complete_greedily(&self.occupancy, depth));
                    if attempt.len() > best.len() {
                        trace!("New best partial: {} of {} units.", attempt.len(), total);
                        best = attempt;
                    }
                }
                let next = self.frame(self.order[depth]);
                stack.push(next);
            } else {
                stack.pop();
                self.backtracks += 1;
                if let Some(previous) = stack.last_mut().and_then(|f| f.committed.take()) {
                    self.revert(previous);
                }
                if self.backtracks >= self.limits.backtrack_budget || self.past_deadline() {
                    budget_exhausted = true;
                    break;
                }
            }
        }

        let placements = complete.unwrap_or(best);
        let mut placed = vec![false; self.model.units.len()];
        for p in &placements {
            placed[p.unit] = true;
        }
        let unplaced: Vec<usize> = (0..placed.len()).filter(|&u| !placed[u]).collect();

        let elapsed = started.elapsed();
        debug!(
            "Run {:?}: placed {}/{} units, {} backtracks, budget exhausted: {}, {:.2?}",
            self.tie_break,
            placements.len(),
            self.model.units.len(),
            self.backtracks,
            budget_exhausted,
            elapsed
        );

        SearchOutcome {
            placements,
            unplaced,
            backtracks: self.backtracks,
            budget_exhausted,
            elapsed,
            tie_break: self.tie_break,
        }
    }

    fn past_deadline(&self) -> bool {
        self.limits
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn frame(&self, unit: usize) -> Frame {
        Frame {
            cursor: self.cursor(&self.occupancy, unit),
            committed: None,
        }
    }

    /// Starts a candidate walk for `unit`: lightest-loaded faculty first, then
    /// the tightest room, then grid order.
    fn cursor(&self, occupancy: &Occupancy, unit: usize) -> Cursor {
        let duration = self.model.units[unit].duration;
        let mut faculty: Vec<usize> = self.constraints.domains[unit]
            .faculty
            .iter()
            .copied()
            .filter(|&f| occupancy.hours(f) + duration <= self.model.faculty[f].max_hours)
            .collect();
        faculty.sort_by_key(|&f| (occupancy.hours(f), self.keys.faculty[f], f));
        Cursor {
            unit,
            faculty,
            next: (0, 0, 0),
        }
    }

    /// Moves `cursor` to the next placement that is free in `occupancy`.
    ///
    /// A frame is only resumed with the occupancy it was created under, so
    /// skipping past busy triples never loses a candidate.
    fn advance(&self, occupancy: &Occupancy, cursor: &mut Cursor) -> Option<Placement> {
        let unit = cursor.unit;
        let domain = &self.constraints.domains[unit];
        let rooms = &self.room_order[unit];
        let starts = &self.start_order[unit];
        let batch_busy = occupancy.batch(self.model.units[unit].batch);

        let (mut fi, mut ri, mut si) = cursor.next;
        while fi < cursor.faculty.len() {
            let f = cursor.faculty[fi];
            let faculty_busy = occupancy.faculty(f) | batch_busy;
            while ri < rooms.len() {
                let r = rooms[ri];
                let blocked = faculty_busy | occupancy.room(r);
                while si < starts.len() {
                    let start = starts[si];
                    si += 1;
                    if !domain.starts[start].cells.intersects(blocked) {
                        cursor.next = (fi, ri, si);
                        return Some(Placement {
                            unit,
                            faculty: f,
                            room: r,
                            start,
                        });
                    }
                }
                si = 0;
                ri += 1;
            }
            ri = 0;
            fi += 1;
        }
        cursor.next = (fi, ri, si);
        None
    }

    fn first_candidate(&self, occupancy: &Occupancy, unit: usize) -> Option<Placement> {
        let mut cursor = self.cursor(occupancy, unit);
        self.advance(occupancy, &mut cursor)
    }

    fn has_support(&self, unit: usize) -> bool {
        let session = &self.model.units[unit];
        let domain = &self.constraints.domains[unit];
        let batch_busy = self.occupancy.batch(session.batch);
        domain
            .faculty
            .iter()
            .filter(|&&f| {
                self.occupancy.hours(f) + session.duration <= self.model.faculty[f].max_hours
            })
            .any(|&f| {
                let faculty_busy = self.occupancy.faculty(f) | batch_busy;
                domain.rooms.iter().any(|&r| {
                    let blocked = faculty_busy | self.occupancy.room(r);
                    domain.starts.iter().any(|s| !s.cells.intersects(blocked))
                })
            })
    }

    /// Every unit after position `from` in the order can still be placed.
    fn forward_check(&self, from: usize) -> Result<bool, DeadlineReached> {
        for (checked, &unit) in self.order[from..].iter().enumerate() {
            if checked % DEADLINE_STRIDE == DEADLINE_STRIDE - 1 && self.past_deadline() {
                return Err(DeadlineReached);
            }
            if !self.has_support(unit) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Places remaining units in order, skipping any with no candidate left.
    ///
    /// Stops early once the deadline passes; what was placed so far stands.
    fn complete_greedily(&self, occupancy: &Occupancy, from: usize) -> Vec<Placement> {
        let mut scratch = occupancy.clone();
        let mut placed = Vec::new();
        for &unit in &self.order[from..] {
            if self.past_deadline() {
                break;
            }
            if let Some(first) = self.first_candidate(&scratch, unit) {
                let (cells, batch, hours) = self.footprint(first);
                scratch.commit(first.faculty, first.room, batch, cells, hours);
                placed.push(first);
            }
        }
        placed
    }

    fn footprint(&self, placement: Placement) -> (SlotMask, usize, u32) {
        let session = &self.model.units[placement.unit];
        let cells = self.constraints.domains[placement.unit].starts[placement.start].cells;
        (cells, session.batch, session.duration)
    }

    fn apply(&mut self, placement: Placement) {
        let (cells, batch, hours) = self.footprint(placement);
        self.occupancy
            .commit(placement.faculty, placement.room, batch, cells, hours);
    }

    fn revert(&mut self, placement: Placement) {
        let (cells, batch, hours) = self.footprint(placement);
        self.occupancy
            .release(placement.faculty, placement.room, batch, cells, hours);
    }
}
