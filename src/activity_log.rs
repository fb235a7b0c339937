use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};

pub const DEFAULT_LOG_CAPACITY: usize = 20;

/// One human-readable line, stamped with time since the session started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub elapsed: Duration,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>8.3}s] {}", self.elapsed.as_secs_f64(), self.text)
    }
}

/// The most recent `capacity` entries; older ones fall off the front.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    origin: Instant,
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl ActivityLog {
    pub fn new(origin: Instant, capacity: usize) -> Self {
        Self {
            origin,
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, now: Instant, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            elapsed: now.saturating_duration_since(self.origin),
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}
