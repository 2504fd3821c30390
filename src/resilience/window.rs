//! Sliding window of recent failures.
//!
//! Records are kept in arrival order, so pruning only ever pops from the front.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::resilience::classify::FailureKind;

/// A single recorded failure.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Monotonic time used for pruning.
    pub recorded_at: Instant,
    /// Wall-clock time for reporting.
    pub timestamp: DateTime<Utc>,
    pub error_message: String,
    pub kind: FailureKind,
}

/// Failures observed within `span` of "now".
#[derive(Debug)]
pub struct FailureWindow {
    span: Duration,
    records: VecDeque<FailureRecord>,
}

impl FailureWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: FailureRecord) {
        self.records.push_back(record);
    }

    /// Drop records older than the window relative to `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.records.front() {
            if now.saturating_duration_since(front.recorded_at) > self.span {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&FailureRecord> {
        self.records.back()
    }
}
