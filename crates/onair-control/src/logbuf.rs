//! Ring-buffered structured log entries behind `GET /api/logs`.
//!
//! Entries also go to the tracing subscriber so the terminal and the
//! dashboard see the same stream.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use onair_common::models::LogEntry;

const CAPACITY: usize = 1000;

pub struct LogBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(CAPACITY),
                next_id: 0,
            }),
        }
    }

    pub fn log(&self, level: &str, component: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            "error" => tracing::error!(component, "{message}"),
            "warn" => tracing::warn!(component, "{message}"),
            _ => tracing::info!(component, "{message}"),
        }

        let mut inner = self.inner.lock().expect("log buffer lock poisoned");
        inner.next_id += 1;
        let entry = LogEntry {
            id: inner.next_id,
            timestamp: Utc::now(),
            level: level.to_string(),
            component: component.to_string(),
            message,
        };
        if inner.entries.len() == CAPACITY {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.log("info", component, message);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.log("warn", component, message);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.log("error", component, message);
    }

    /// Newest-first entries, optionally filtered by level.
    pub fn tail(&self, level: Option<&str>, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock().expect("log buffer lock poisoned");
        inner
            .entries
            .iter()
            .rev()
            .filter(|e| match level {
                None | Some("") | Some("all") => true,
                Some(level) => e.level == level,
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let buf = LogBuffer::new();
        buf.info("test", "one");
        buf.info("test", "two");
        let tail = buf.tail(None, 10);
        assert_eq!(tail[0].message, "two");
        assert!(tail[0].id > tail[1].id);
    }

    #[test]
    fn buffer_is_bounded() {
        let buf = LogBuffer::new();
        for i in 0..(CAPACITY + 50) {
            buf.info("test", format!("entry {i}"));
        }
        let tail = buf.tail(None, usize::MAX);
        assert_eq!(tail.len(), CAPACITY);
        // Oldest entries were dropped, newest kept.
        assert_eq!(tail[0].message, format!("entry {}", CAPACITY + 49));
    }

    #[test]
    fn level_filter() {
        let buf = LogBuffer::new();
        buf.info("test", "fine");
        buf.error("test", "broken");
        let errors = buf.tail(Some("error"), 10);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "broken");
        assert_eq!(buf.tail(Some("all"), 10).len(), 2);
    }
}
