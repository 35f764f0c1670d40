use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::db::enums::MonitorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub checked_at: DateTime<Utc>,
    pub status: MonitorStatus,
    /// Counts toward the consecutive-failure streak.
    pub failure: bool,
}

/// Bounded window of recently evaluated results for one monitor.
#[derive(Debug, Clone)]
pub struct CheckHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    last_status: MonitorStatus,
}

impl CheckHistory {
    /// `initial_status` is the status last persisted for the monitor, so recovery
    /// after a restart still resolves alerts opened before it.
    pub fn new(capacity: usize, initial_status: MonitorStatus) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_status: initial_status,
        }
    }

    pub fn last_status(&self) -> MonitorStatus {
        self.last_status
    }

    /// Failures at the tail of the window, newest first, stopping at the first non-failure.
    pub fn trailing_failures(&self) -> u32 {
        self.entries
            .iter()
            .rev()
            .take_while(|entry| entry.failure)
            .count() as u32
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.last_status = entry.status;
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
