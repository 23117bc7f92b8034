//! Append-only list of human-readable mutation events per snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp_seconds: u64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone)]
pub struct MutationLog {
    entries: Vec<LogEntry>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl MutationLog {
    pub fn append(&mut self, message: String, details: Option<serde_json::Value>) {
        self.entries.push(LogEntry {
            timestamp_seconds: unix_now(),
            message,
            details,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in reverse append order, the shape responses carry.
    pub fn recent_first(&self) -> Vec<LogEntry> {
        self.entries.iter().rev().cloned().collect()
    }
}
