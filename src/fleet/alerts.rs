//! Bounded, newest-first alert buffer

use crate::protocol::AnomalyReport;
use std::collections::VecDeque;

/// Alerts retained in memory; the oldest is evicted past this
pub const MAX_ALERTS: usize = 50;

/// Newest-first alert sequence capped at [`MAX_ALERTS`]
#[derive(Debug, Clone, PartialEq)]
pub struct AlertBuffer {
    entries: VecDeque<AnomalyReport>,
    capacity: usize,
}

impl Default for AlertBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_ALERTS)
    }
}

impl AlertBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend a report, returning whatever fell off the end
    ///
    /// The inbound `acknowledged` value is ignored: new alerts start
    /// unacknowledged, and a redelivered report (same id) replaces the earlier
    /// entry and moves to the front, carrying over the local flag.
    pub fn push(&mut self, mut report: AnomalyReport) -> Option<AnomalyReport> {
        let previous = self
            .position(&report.id)
            .and_then(|index| self.entries.remove(index));
        report.acknowledged = previous.is_some_and(|earlier| earlier.acknowledged);

        self.entries.push_front(report);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Remove the matching entry. Returns false if the id is unknown.
    pub fn dismiss(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        }
    }

    /// Mark the matching entry acknowledged. Returns false if the id is unknown.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&AnomalyReport> {
        self.entries.iter().find(|alert| alert.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnomalyReport> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<AnomalyReport> {
        self.entries.iter().cloned().collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|alert| alert.id == id)
    }
}
