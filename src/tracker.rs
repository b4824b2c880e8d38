//! Bounded error history with lifetime per-type counts.
//!
//! The ring buffer only keeps the most recent `capacity` records, while
//! `by_type` and `total_errors` count every error ever recorded. Evicting a
//! record from the buffer does not touch the counts: the buffer is a recency
//! window, the counts are a lifetime tally.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

/// Records reserved up front; larger buffers grow as errors arrive.
const PREALLOC_LIMIT: usize = 128;

/// Free-form metadata attached to an error (query, duration, request info...).
pub type ErrorContext = Map<String, Value>;

/// One captured error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Sequential id, starting at 1
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    /// Captured backtrace, when one was available
    pub trace: Option<String>,
    /// Always present; empty when the caller supplied nothing
    pub context: ErrorContext,
}

impl ErrorRecord {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            error_type: error_type.into(),
            message: message.into(),
            trace: None,
            context: ErrorContext::new(),
        }
    }

    pub fn with_trace(mut self, trace: Option<String>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Lifetime totals plus the current recency window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSnapshot {
    pub total_errors: u64,
    pub by_type: BTreeMap<String, u64>,
    /// Newest first
    pub recent: Vec<ErrorRecord>,
}

/// Thread-safe error tracker.
pub struct ErrorTracker {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    /// Newest at the front
    history: VecDeque<ErrorRecord>,
    by_type: BTreeMap<String, u64>,
    total_errors: u64,
    next_id: u64,
}

impl ErrorTracker {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                // grows on demand up to `capacity`
                history: VecDeque::with_capacity(capacity.min(PREALLOC_LIMIT)),
                by_type: BTreeMap::new(),
                total_errors: 0,
                next_id: 1,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an error raised or recovered by application code and log it.
    /// Returns the id assigned to the record.
    pub fn log_error(
        &self,
        error_type: &str,
        message: &str,
        trace: Option<String>,
        context: Option<ErrorContext>,
    ) -> u64 {
        let record = ErrorRecord {
            context: context.unwrap_or_default(),
            ..ErrorRecord::new(error_type, message).with_trace(trace)
        };

        error!(
            error_type,
            message,
            context = ?record.context,
            "error tracked"
        );

        self.record(record)
    }

    /// Store a record without logging it. The timestamp is reset to now and
    /// a fresh id is assigned.
    pub fn record(&self, mut record: ErrorRecord) -> u64 {
        let mut inner = self.inner.lock();

        let id = inner.next_id;
        inner.next_id += 1;
        record.id = id;
        record.timestamp = Utc::now();

        inner.total_errors += 1;
        match inner.by_type.get_mut(&record.error_type) {
            Some(count) => *count += 1,
            None => {
                inner.by_type.insert(record.error_type.clone(), 1);
            }
        }

        inner.history.push_front(record);
        if inner.history.len() > self.capacity {
            inner.history.pop_back();
        }

        id
    }

    /// At most `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        self.inner
            .lock()
            .history
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ErrorSnapshot {
        let inner = self.inner.lock();
        ErrorSnapshot {
            total_errors: inner.total_errors,
            by_type: inner.by_type.clone(),
            recent: inner.history.iter().cloned().collect(),
        }
    }
}
