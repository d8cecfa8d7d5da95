//! Log record types for the out-of-process sink.
//!
//! The transport writes one JSON object per line; the field spelling here
//! is the wire contract consumed by the front-end log collector.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity levels carried on the wire and across the plugin ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    /// Wire spelling of the level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// One structured record, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Whole epoch seconds, stringly typed on the wire.
    pub timestamp: String,
    /// Level token (`ERROR`, `WARN`, `INFO`, `DEBUG`).
    pub level: String,
    /// Rendered message text.
    pub message: String,
}

impl LogRecord {
    /// Build a record stamped with the current wall clock.
    pub fn now(level: LogLevel, message: String) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            timestamp: secs.to_string(),
            level: level.as_str().to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_wire_shape() {
        let rec = LogRecord {
            timestamp: "1700000000".to_string(),
            level: "INFO".to_string(),
            message: "scan engine started".to_string(),
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"1700000000","level":"INFO","message":"scan engine started"}"#
        );
    }

    #[test]
    fn level_tokens() {
        assert_eq!(LogLevel::Error.as_str(), "ERROR");
        assert_eq!(LogLevel::Debug.as_str(), "DEBUG");
    }
}
