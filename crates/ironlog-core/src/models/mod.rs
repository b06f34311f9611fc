//! Data models for the workout API.
//!
//! - `UserProfile`, `ProfilePatch`: the signed-in user and local edits to it
//! - `Exercise`, `HistoryDay`, `HistoryEntry`: catalog and training log

pub mod exercise;
pub mod user;

pub use exercise::{Exercise, HistoryDay, HistoryEntry};
pub use user::{ProfilePatch, UserProfile, UserUpdate};
