use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an instant falls relative to an election's voting window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    #[serde(rename = "upcoming")]
    NotStarted,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "ended")]
    Closed,
}

/// Classify `now` against the half-open window `[start, end)`.
pub fn window_state(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> WindowState {
    if now < start {
        WindowState::NotStarted
    } else if now < end {
        WindowState::Active
    } else {
        WindowState::Closed
    }
}

/// Is `[start, end)` a usable voting window?
pub fn is_valid_window(start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    end > start
}
