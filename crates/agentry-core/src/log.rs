//! Leveled log records and the sinks that receive them.
//!
//! Every step writes to two sinks: the task log, which users see next to
//! their build, and the system log, which only operators see.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[display("debug")]
    Debug,
    #[display("info")]
    Info,
    #[display("notice")]
    Notice,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

/// A single log message with structured fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for log records.
pub trait LogSink: Send + Sync {
    fn send(&self, record: LogRecord);

    fn log(&self, level: LogLevel, message: &str) {
        self.send(LogRecord::new(level, message));
    }
}

/// The pair of sinks a step logs to.
#[derive(Clone)]
pub struct LogSinks {
    pub task: Arc<dyn LogSink>,
    pub system: Arc<dyn LogSink>,
}

impl LogSinks {
    pub fn new(task: Arc<dyn LogSink>, system: Arc<dyn LogSink>) -> Self {
        Self { task, system }
    }

    /// Sinks that forward to `tracing` under the `task` and `system` channels.
    pub fn tracing() -> Self {
        Self {
            task: Arc::new(TracingSink::new("task")),
            system: Arc::new(TracingSink::new("system")),
        }
    }
}

impl std::fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSinks").finish_non_exhaustive()
    }
}

/// Forwards records to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct TracingSink {
    channel: &'static str,
}

impl TracingSink {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

impl LogSink for TracingSink {
    fn send(&self, record: LogRecord) {
        let fields = if record.fields.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&record.fields).unwrap_or_default()
        };
        let channel = self.channel;
        let message = record.message.as_str();

        // tracing has no notice level; notice records go out at info with a severity tag.
        match record.level {
            LogLevel::Debug => tracing::debug!(channel, fields = %fields, "{}", message),
            LogLevel::Info => tracing::info!(channel, fields = %fields, "{}", message),
            LogLevel::Notice => tracing::info!(channel, fields = %fields, severity = "notice", "{}", message),
            LogLevel::Warning => tracing::warn!(channel, fields = %fields, "{}", message),
            LogLevel::Error => tracing::error!(channel, fields = %fields, "{}", message),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Records at exactly `level`.
    pub fn at_level(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// Whether any record at `level` contains `needle` in its message.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.at_level(level)
            .iter()
            .any(|r| r.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn send(&self, record: LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
