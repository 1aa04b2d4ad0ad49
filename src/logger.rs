//! In-memory structured request log.
//!
//! [`Logger`] keeps the most recent `capacity` entries in insertion order and
//! evicts the oldest first. Every entry is also mirrored to `tracing` so it
//! reaches the process log sink regardless of the buffer.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Default number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Rendering used when mirroring entries to `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One serialized JSON record per entry
    #[default]
    Json,
    /// Message with structured fields
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// One structured log record tied to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub request_id: String,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            user_agent: None,
            ip: None,
            user_id: None,
            duration_ms: None,
            status: None,
            error: None,
            metadata: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

struct LoggerInner {
    capacity: usize,
    format: LogFormat,
    entries: Mutex<VecDeque<LogEntry>>,
}

/// Bounded, process-wide log buffer. Cloning shares the buffer.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// Create a logger retaining at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, format: LogFormat) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(LoggerInner {
                capacity,
                format,
                entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            }),
        }
    }

    /// Stamp, append and mirror an entry using the default format.
    pub fn log(&self, entry: LogEntry) {
        self.log_as(entry, self.inner.format);
    }

    /// Stamp, append and mirror an entry using `format`.
    pub fn log_as(&self, mut entry: LogEntry, format: LogFormat) {
        entry.timestamp = Utc::now();
        mirror(&entry, format);

        let mut entries = self.inner.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.inner.capacity {
            entries.pop_front();
        }
    }

    /// Entries at or after `since` whose level equals `level`, in insertion order.
    pub fn get_logs(&self, since: Option<DateTime<Utc>>, level: Option<LogLevel>) -> Vec<LogEntry> {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|entry| since.is_none_or(|since| entry.timestamp >= since))
            .filter(|entry| level.is_none_or(|level| entry.level == level))
            .cloned()
            .collect()
    }

    /// Entries recorded for one request, in insertion order.
    pub fn logs_for_request(&self, request_id: &str) -> Vec<LogEntry> {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn clear_logs(&self) {
        self.inner.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY, LogFormat::Json)
    }
}

/// Emit an entry through `tracing` at its own level.
fn mirror(entry: &LogEntry, format: LogFormat) {
    match format {
        LogFormat::Json => {
            let record = serde_json::to_string(entry).unwrap_or_else(|e| {
                format!(r#"{{"message":"unserializable log entry","error":"{e}"}}"#)
            });
            match entry.level {
                LogLevel::Debug => debug!(target: "gateway::requests", "{record}"),
                LogLevel::Info => info!(target: "gateway::requests", "{record}"),
                LogLevel::Warn => warn!(target: "gateway::requests", "{record}"),
                LogLevel::Error => error!(target: "gateway::requests", "{record}"),
            }
        }
        LogFormat::Text => {
            let request_id = entry.request_id.as_str();
            let method = entry.method.as_str();
            let url = entry.url.as_str();
            let status = entry.status;
            let duration_ms = entry.duration_ms;
            let user_id = entry.user_id.as_deref();
            let err = entry.error.as_deref();
            let message = entry.message.as_str();
            match entry.level {
                LogLevel::Debug => {
                    debug!(target: "gateway::requests", request_id, method, url, ?status, ?duration_ms, ?user_id, ?err, "{message}")
                }
                LogLevel::Info => {
                    info!(target: "gateway::requests", request_id, method, url, ?status, ?duration_ms, ?user_id, ?err, "{message}")
                }
                LogLevel::Warn => {
                    warn!(target: "gateway::requests", request_id, method, url, ?status, ?duration_ms, ?user_id, ?err, "{message}")
                }
                LogLevel::Error => {
                    error!(target: "gateway::requests", request_id, method, url, ?status, ?duration_ms, ?user_id, ?err, "{message}")
                }
            }
        }
    }
}
