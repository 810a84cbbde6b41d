use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::model::TimetableModel;

/// Set of grid cells, one bit per (day, slot).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SlotMask(u128);

impl SlotMask {
    pub const BITS: u32 = u128::BITS;
    pub const EMPTY: SlotMask = SlotMask(0);

    pub fn with(self, cell: u32) -> Self {
        SlotMask(self.0 | (1u128 << cell))
    }

    pub fn contains(self, cell: u32) -> bool {
        cell < Self::BITS && self.0 & (1u128 << cell) != 0
    }

    pub fn intersects(self, other: SlotMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn intersection(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 & other.0)
    }

    pub fn without(self, other: SlotMask) -> SlotMask {
        SlotMask(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest and highest set cell, if any.
    pub fn bounds(self) -> Option<(u32, u32)> {
        if self.0 == 0 {
            return None;
        }
        Some((self.0.trailing_zeros(), Self::BITS - 1 - self.0.leading_zeros()))
    }
}

impl BitOr for SlotMask {
    type Output = SlotMask;

    fn bitor(self, rhs: SlotMask) -> SlotMask {
        SlotMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for SlotMask {
    fn bitor_assign(&mut self, rhs: SlotMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask({:#x})", self.0)
    }
}

/// Busy cells per faculty, room and batch, plus weekly hours per faculty.
///
/// Faculty and room masks start out as their unavailability, so a single
/// intersection test covers both double-booking and availability.
#[derive(Debug, Clone)]
pub struct Occupancy {
    faculty: Vec<SlotMask>,
    rooms: Vec<SlotMask>,
    batches: Vec<SlotMask>,
    hours: Vec<u32>,
}

impl Occupancy {
    pub fn new(model: &TimetableModel) -> Self {
        Self {
            faculty: model.faculty.iter().map(|f| f.unavailable).collect(),
            rooms: model.rooms.iter().map(|r| r.unavailable).collect(),
            batches: vec![SlotMask::EMPTY; model.batches.len()],
            hours: vec![0; model.faculty.len()],
        }
    }

    pub fn faculty(&self, faculty: usize) -> SlotMask {
        self.faculty[faculty]
    }

    pub fn room(&self, room: usize) -> SlotMask {
        self.rooms[room]
    }

    pub fn batch(&self, batch: usize) -> SlotMask {
        self.batches[batch]
    }

    pub fn hours(&self, faculty: usize) -> u32 {
        self.hours[faculty]
    }

    pub fn is_free(&self, faculty: usize, room: usize, batch: usize, cells: SlotMask) -> bool {
        !(self.faculty[faculty] | self.rooms[room] | self.batches[batch]).intersects(cells)
    }

    pub fn commit(&mut self, faculty: usize, room: usize, batch: usize, cells: SlotMask, hours: u32) {
        debug_assert!(self.is_free(faculty, room, batch, cells));
        self.faculty[faculty] |= cells;
        self.rooms[room] |= cells;
        self.batches[batch] |= cells;
        self.hours[faculty] += hours;
    }

    /// Undoes a matching `commit`.
    pub fn release(&mut self, faculty: usize, room: usize, batch: usize, cells: SlotMask, hours: u32) {
        self.faculty[faculty] = self.faculty[faculty].without(cells);
        self.rooms[room] = self.rooms[room].without(cells);
        self.batches[batch] = self.batches[batch].without(cells);
        self.hours[faculty] -= hours;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bounds_and_count() {
        let mask = SlotMask::EMPTY.with(3).with(7).with(100);
        assert_eq!(mask.count(), 3);
        assert_eq!(mask.bounds(), Some((3, 100)));
        assert!(mask.contains(100));
        assert!(!mask.contains(4));
        assert_eq!(SlotMask::EMPTY.bounds(), None);
    }

    #[test]
    fn without_clears_only_given_cells() {
        let mask = SlotMask::EMPTY.with(1).with(2);
        let cleared = mask.without(SlotMask::EMPTY.with(2));
        assert!(cleared.contains(1));
        assert!(!cleared.contains(2));
    }
}
