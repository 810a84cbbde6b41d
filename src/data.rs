use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::constraints::SoftWeights;
use crate::occupancy::SlotMask;

// Type aliases for clarity
pub type FacultyId = u32;
pub type SubjectId = u32;
pub type RoomId = u32;
pub type BatchId = u32;
pub type Day = u32;
pub type Timeslot = u32;

/// A single cell of the weekly grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct SlotRef {
    pub day: Day,
    pub slot: Timeslot,
}

impl SlotRef {
    pub fn new(day: Day, slot: Timeslot) -> Self {
        Self { day, slot }
    }
}

/// Physical kind of a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Lecture,
    Lab,
    Hall,
}

/// Kind of session a subject needs, which decides the rooms it may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Lecture,
    Lab,
}

impl SessionKind {
    /// Lectures fit in lecture rooms and halls, labs only in labs.
    pub fn accepts(self, room: RoomKind) -> bool {
        match self {
            SessionKind::Lecture => matches!(room, RoomKind::Lecture | RoomKind::Hall),
            SessionKind::Lab => room == RoomKind::Lab,
        }
    }
}

/// A faculty member with qualifications and availability.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Faculty {
    pub id: FacultyId,
    pub name: String,
    #[serde(default)]
    pub department: String,
    pub subjects: Vec<SubjectId>,
    pub max_hours_per_week: u32,
    #[serde(default)]
    pub unavailable: Vec<SlotRef>,
    #[serde(default)]
    pub preferred: Vec<SlotRef>,
}

/// A subject taught to one or more batches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub sessions_per_week: u32,
    #[serde(default = "default_duration")]
    pub duration_slots: u32,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub kind: SessionKind,
}

fn default_duration() -> u32 {
    1
}

/// Represents a physical room with a given capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub kind: RoomKind,
    #[serde(default)]
    pub unavailable: Vec<SlotRef>,
}

/// A cohort of students that attends its subjects together.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub year: u32,
    pub strength: u32,
    pub subjects: Vec<SubjectId>,
}

/// Working days by slots per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGrid {
    pub days: u32,
    pub slots_per_day: u32,
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            days: 5,
            slots_per_day: 8,
        }
    }
}

impl TimeGrid {
    pub const MAX_CELLS: u32 = SlotMask::BITS;

    pub fn cells(&self) -> u32 {
        self.days.saturating_mul(self.slots_per_day)
    }

    pub fn contains(&self, slot: SlotRef) -> bool {
        slot.day < self.days && slot.slot < self.slots_per_day
    }

    /// Linear cell index, day-major.
    pub fn cell(&self, day: Day, slot: Timeslot) -> u32 {
        day * self.slots_per_day + slot
    }

    /// Cells covered by a session of `len` slots starting at `(day, start)`.
    pub fn span(&self, day: Day, start: Timeslot, len: u32) -> SlotMask {
        (start..start + len).fold(SlotMask::EMPTY, |mask, slot| {
            mask.with(self.cell(day, slot))
        })
    }

    pub fn day_mask(&self, day: Day) -> SlotMask {
        self.span(day, 0, self.slots_per_day)
    }

    /// Every start position where a session of `duration` slots fits inside one day.
    pub fn starts(&self, duration: u32) -> impl Iterator<Item = SlotRef> + '_ {
        let last = self.slots_per_day.saturating_sub(duration.max(1));
        let fits = duration <= self.slots_per_day;
        (0..self.days).flat_map(move |day| {
            (0..=last)
                .filter(move |_| fits)
                .map(move |slot| SlotRef::new(day, slot))
        })
    }

    pub fn mask_of(&self, slots: &[SlotRef]) -> SlotMask {
        slots
            .iter()
            .fold(SlotMask::EMPTY, |mask, s| mask.with(self.cell(s.day, s.slot)))
    }
}

/// The complete input for one generation request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableInput {
    pub faculty: Vec<Faculty>,
    pub subjects: Vec<Subject>,
    pub rooms: Vec<Room>,
    pub batches: Vec<Batch>,
    #[serde(default)]
    pub grid: TimeGrid,
}

/// Knobs for one call to `generate`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateOptions {
    pub max_alternatives: usize,
    #[serde(rename = "timeLimitMs", with = "duration_ms")]
    pub time_limit: Duration,
    pub backtrack_budget: u64,
    pub seed: u64,
    pub attempts: Option<usize>,
    pub weights: SoftWeights,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_alternatives: 3,
            time_limit: Duration::from_millis(2_000),
            backtrack_budget: 100_000,
            seed: 0,
            attempts: None,
            weights: SoftWeights::default(),
        }
    }
}

impl GenerateOptions {
    pub fn alternatives(&self) -> usize {
        self.max_alternatives.max(1)
    }

    /// Number of independent search runs, the first one canonical.
    pub fn runs(&self) -> usize {
        self.attempts
            .unwrap_or(self.alternatives() * 2)
            .max(self.alternatives())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Represents a single, scheduled session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub batch_id: BatchId,
    pub subject_id: SubjectId,
    pub day: Day,
    pub slot: Timeslot,
    pub faculty_id: FacultyId,
    pub room_id: RoomId,
    pub duration: u32,
}

/// A session unit the search could not place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledSession {
    pub batch_id: BatchId,
    pub subject_id: SubjectId,
    pub ordinal: u32,
}

/// Describes a soft constraint that was not met in the final schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmetSoftConstraint {
    pub constraint_type: String,
    pub description: String,
}

impl fmt::Display for UnmetSoftConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.constraint_type, self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    /// `None` for the canonical run.
    pub seed: Option<u64>,
    pub backtracks: u64,
    pub elapsed_ms: u64,
    pub budget_exhausted: bool,
}

/// One generated timetable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub assignments: Vec<Assignment>,
    pub total_slots: usize,
    pub assigned_slots: usize,
    pub conflicts: usize,
    pub status: ScheduleStatus,
    pub score: i64,
    pub unscheduled: Vec<UnscheduledSession>,
    pub unmet_soft_constraints: Vec<UnmetSoftConstraint>,
    pub stats: SearchStats,
}

impl Schedule {
    pub fn is_complete(&self) -> bool {
        self.conflicts == 0 && self.assigned_slots == self.total_slots
    }
}
