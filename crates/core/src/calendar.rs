//! In-game days and meetings.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EmployeeId;

/// One simulated working day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDay {
    pub day_number: i64,
    pub started_at: DateTime<Utc>,
}

/// A meeting on the schedule of a given game day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    pub day_number: i64,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
    pub attendees: Vec<EmployeeId>,
}
