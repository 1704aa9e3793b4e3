use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{minutes_between, StoppageId};

/// A detected stoppage. Open while `end_time` is `None`; immutable once closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoppageInfo {
    pub id: Option<StoppageId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: f64,
    pub is_active: bool,
}

impl StoppageInfo {
    /// An open stoppage observed at `now`.
    pub fn open(start_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start_time,
            end_time: None,
            duration_minutes: minutes_between(start_time, now),
            is_active: true,
        }
    }

    pub fn with_id(mut self, id: StoppageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Close the record. A no-op on an already closed record.
    pub fn close(&mut self, end_time: DateTime<Utc>) {
        if self.end_time.is_some() {
            return;
        }
        self.end_time = Some(end_time);
        self.duration_minutes = minutes_between(self.start_time, end_time);
        self.is_active = false;
    }

    /// Refresh the running duration of an open record.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.duration_minutes = minutes_between(self.start_time, now);
        }
    }
}
