//! Academic timetable generation.
//!
//! A request snapshot of faculty, subjects, rooms and batches is built into
//! an immutable [`model::TimetableModel`], turned into per-session candidate
//! domains by [`constraints`], assigned by the backtracking [`search`], and
//! scored by the [`evaluator`]. [`engine::generate`] ties these together and
//! returns ranked alternative schedules; [`server`] exposes it over HTTP.

pub mod config;
pub mod constraints;
pub mod data;
pub mod engine;
pub mod evaluator;
pub mod model;
pub mod occupancy;
pub mod search;
pub mod server;

pub use data::{GenerateOptions, Schedule, TimetableInput};
pub use engine::{generate, generate_from_model};
pub use model::ModelError;
