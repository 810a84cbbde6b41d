//! Typed, index-based view of one input snapshot.
//!
//! Records are sorted by id into arenas so every later phase refers to
//! entities by position. The model is immutable once built and is shared
//! read-only by all search runs of a request.

use crate::data::{
    BatchId, FacultyId, RoomId, RoomKind, SessionKind, SlotRef, SubjectId, TimeGrid,
    TimetableInput,
};
use crate::occupancy::SlotMask;
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Reasons a snapshot cannot be scheduled at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("subject {subject} is required by batch {batch} but no faculty is qualified to teach it")]
    SubjectWithoutFaculty { subject: SubjectId, batch: BatchId },
    #[error("batch {batch} has {strength} students but the largest room holds {largest}")]
    BatchExceedsRoomCapacity {
        batch: BatchId,
        strength: u32,
        largest: u32,
    },
    #[error("no room suits subject {subject} ({kind:?}) for batch {batch} of {strength} students")]
    NoSuitableRoom {
        batch: BatchId,
        subject: SubjectId,
        kind: SessionKind,
        strength: u32,
    },
    #[error("batch {batch} references unknown subject {subject}")]
    UnknownSubject { batch: BatchId, subject: SubjectId },
    #[error("faculty {faculty} is qualified for unknown subject {subject}")]
    UnknownQualification { faculty: FacultyId, subject: SubjectId },
    #[error("duplicate {entity} id {id}")]
    DuplicateId { entity: &'static str, id: u32 },
    #[error("time grid has no cells")]
    EmptyGrid,
    #[error("time grid has {cells} cells, at most {max} are supported")]
    GridTooLarge { cells: u32, max: u32 },
    #[error("{entity} {id} lists day {day} slot {slot}, outside the time grid")]
    SlotOutOfGrid {
        entity: &'static str,
        id: u32,
        day: u32,
        slot: u32,
    },
    #[error("subject {subject} needs {duration} consecutive slots but a day has {slots_per_day}")]
    SessionTooLong {
        subject: SubjectId,
        duration: u32,
        slots_per_day: u32,
    },
    #[error("sessions are required but no rooms were supplied")]
    NoRooms,
}

#[derive(Debug, Clone)]
pub struct FacultyEntry {
    pub id: FacultyId,
    pub name: String,
    pub max_hours: u32,
    pub unavailable: SlotMask,
    pub preferred: SlotMask,
}

#[derive(Debug, Clone)]
pub struct SubjectEntry {
    pub id: SubjectId,
    pub name: String,
    pub sessions_per_week: u32,
    pub duration: u32,
    pub kind: SessionKind,
}

#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub id: RoomId,
    pub capacity: u32,
    pub kind: RoomKind,
    pub unavailable: SlotMask,
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub id: BatchId,
    pub strength: u32,
}

/// One lecture occurrence of a (batch, subject) pair awaiting placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionUnit {
    pub batch: usize,
    pub subject: usize,
    pub ordinal: u32,
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub struct TimetableModel {
    pub grid: TimeGrid,
    pub faculty: Vec<FacultyEntry>,
    pub subjects: Vec<SubjectEntry>,
    pub rooms: Vec<RoomEntry>,
    pub batches: Vec<BatchEntry>,
    pub units: Vec<SessionUnit>,
    /// Faculty indices qualified for each subject, in id order.
    pub qualified_faculty: Vec<Vec<usize>>,
    /// Rooms big enough for each batch, smallest capacity first.
    pub rooms_for_batch: Vec<Vec<usize>>,
}

impl TimetableModel {
    pub fn build(input: &TimetableInput) -> Result<Self, ModelError> {
        let grid = input.grid;
        let cells = grid.cells();
        if cells == 0 {
            return Err(ModelError::EmptyGrid);
        }
        if cells > TimeGrid::MAX_CELLS {
            return Err(ModelError::GridTooLarge {
                cells,
                max: TimeGrid::MAX_CELLS,
            });
        }

        let faculty = input.faculty.iter().sorted_by_key(|f| f.id).collect_vec();
        let subjects = input.subjects.iter().sorted_by_key(|s| s.id).collect_vec();
        let rooms = input.rooms.iter().sorted_by_key(|r| r.id).collect_vec();
        let batches = input.batches.iter().sorted_by_key(|b| b.id).collect_vec();

        check_unique("faculty", faculty.iter().map(|f| f.id))?;
        check_unique("subject", subjects.iter().map(|s| s.id))?;
        check_unique("room", rooms.iter().map(|r| r.id))?;
        check_unique("batch", batches.iter().map(|b| b.id))?;

        let subject_index: HashMap<SubjectId, usize> =
            subjects.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        let mut subject_entries = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            if subject.duration_slots > grid.slots_per_day {
                return Err(ModelError::SessionTooLong {
                    subject: subject.id,
                    duration: subject.duration_slots,
                    slots_per_day: grid.slots_per_day,
                });
            }
            subject_entries.push(SubjectEntry {
                id: subject.id,
                name: subject.name.clone(),
                sessions_per_week: subject.sessions_per_week,
                duration: subject.duration_slots,
                kind: subject.kind,
            });
        }

        let mut qualified_faculty = vec![Vec::new(); subjects.len()];
        let mut faculty_entries = Vec::with_capacity(faculty.len());
        for (index, member) in faculty.iter().enumerate() {
            check_in_grid(&grid, "faculty", member.id, &member.unavailable)?;
            check_in_grid(&grid, "faculty", member.id, &member.preferred)?;
            for subject in member.subjects.iter().unique() {
                let subject_idx =
                    *subject_index
                        .get(subject)
                        .ok_or(ModelError::UnknownQualification {
                            faculty: member.id,
                            subject: *subject,
                        })?;
                qualified_faculty[subject_idx].push(index);
            }
            faculty_entries.push(FacultyEntry {
                id: member.id,
                name: member.name.clone(),
                max_hours: member.max_hours_per_week,
                unavailable: grid.mask_of(&member.unavailable),
                preferred: grid.mask_of(&member.preferred),
            });
        }

        let mut room_entries = Vec::with_capacity(rooms.len());
        for room in &rooms {
            check_in_grid(&grid, "room", room.id, &room.unavailable)?;
            room_entries.push(RoomEntry {
                id: room.id,
                capacity: room.capacity,
                kind: room.kind,
                unavailable: grid.mask_of(&room.unavailable),
            });
        }

        let demand: u32 = batches
            .iter()
            .flat_map(|b| b.subjects.iter())
            .filter_map(|s| subject_index.get(s))
            .map(|&s| subject_entries[s].sessions_per_week)
            .sum();
        if room_entries.is_empty() && demand > 0 {
            return Err(ModelError::NoRooms);
        }
        let largest_room = room_entries.iter().map(|r| r.capacity).max().unwrap_or(0);

        let mut batch_entries = Vec::with_capacity(batches.len());
        let mut rooms_for_batch = Vec::with_capacity(batches.len());
        let mut units = Vec::new();
        for (batch_idx, batch) in batches.iter().enumerate() {
            let fitting = room_entries
                .iter()
                .enumerate()
                .filter(|(_, room)| room.capacity >= batch.strength)
                .sorted_by_key(|(index, room)| (room.capacity, *index))
                .map(|(index, _)| index)
                .collect_vec();
            if fitting.is_empty() && !room_entries.is_empty() {
                return Err(ModelError::BatchExceedsRoomCapacity {
                    batch: batch.id,
                    strength: batch.strength,
                    largest: largest_room,
                });
            }

            for subject in batch.subjects.iter().unique() {
                let subject_idx = *subject_index.get(subject).ok_or(ModelError::UnknownSubject {
                    batch: batch.id,
                    subject: *subject,
                })?;
                let entry = &subject_entries[subject_idx];
                if qualified_faculty[subject_idx].is_empty() {
                    return Err(ModelError::SubjectWithoutFaculty {
                        subject: entry.id,
                        batch: batch.id,
                    });
                }
                if !fitting
                    .iter()
                    .any(|&room| entry.kind.accepts(room_entries[room].kind))
                {
                    return Err(ModelError::NoSuitableRoom {
                        batch: batch.id,
                        subject: entry.id,
                        kind: entry.kind,
                        strength: batch.strength,
                    });
                }
                let offered_to = &subjects[subject_idx].departments;
                if !offered_to.is_empty() && !offered_to.contains(&batch.department) {
                    warn!(
                        "Subject {} is not offered to department '{}' but batch {} requires it.",
                        entry.id, batch.department, batch.id
                    );
                }

                units.extend((0..entry.sessions_per_week).map(|ordinal| SessionUnit {
                    batch: batch_idx,
                    subject: subject_idx,
                    ordinal,
                    duration: entry.duration,
                }));
            }

            batch_entries.push(BatchEntry {
                id: batch.id,
                strength: batch.strength,
            });
            rooms_for_batch.push(fitting);
        }

        info!(
            "Built model with {} faculty, {} subjects, {} rooms, {} batches and {} session units on a {}x{} grid.",
            faculty_entries.len(),
            subject_entries.len(),
            room_entries.len(),
            batch_entries.len(),
            units.len(),
            grid.days,
            grid.slots_per_day
        );
        debug!(
            "Qualified faculty per subject: {:?}",
            qualified_faculty.iter().map(Vec::len).collect_vec()
        );

        Ok(Self {
            grid,
            faculty: faculty_entries,
            subjects: subject_entries,
            rooms: room_entries,
            batches: batch_entries,
            units,
            qualified_faculty,
            rooms_for_batch,
        })
    }

    /// Rooms a unit may use: big enough for its batch and of a suitable kind.
    pub fn rooms_for_unit(&self, unit: &SessionUnit) -> impl Iterator<Item = usize> + '_ {
        let kind = self.subjects[unit.subject].kind;
        self.rooms_for_batch[unit.batch]
            .iter()
            .copied()
            .filter(move |&room| kind.accepts(self.rooms[room].kind))
    }
}

fn check_unique(
    entity: &'static str,
    sorted_ids: impl Iterator<Item = u32>,
) -> Result<(), ModelError> {
    match sorted_ids.tuple_windows().find(|(a, b)| a == b) {
        Some((id, _)) => Err(ModelError::DuplicateId { entity, id }),
        None => Ok(()),
    }
}

fn check_in_grid(
    grid: &TimeGrid,
    entity: &'static str,
    id: u32,
    slots: &[SlotRef],
) -> Result<(), ModelError> {
    match slots.iter().find(|s| !grid.contains(**s)) {
        Some(s) => Err(ModelError::SlotOutOfGrid {
            entity,
            id,
            day: s.day,
            slot: s.slot,
        }),
        None => Ok(()),
    }
}
