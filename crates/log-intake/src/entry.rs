// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log entry shapes as they move through the pipeline.
//!
//! ```text
//!   NewLogEntry ──> LogPayload ──(queue)──> LogPayload ──normalize──> LogRecord ──(store)──> LogEntry
//!   (validated)     (job body)               (worker)                  (complete)            (durable)
//! ```
//!
//! [`normalize`] is the only place identifiers and default timestamps are
//! assigned. Both the ingestion service and the write worker call it, so a
//! payload that reaches the worker without an `id`, `trace_id` or `timestamp`
//! is still written complete.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length, in characters, of a `service_name`.
pub const MAX_SERVICE_NAME_LEN: usize = 255;

/// Severity of a log entry, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Level {
    pub const ALL: [Level; 8] = [
        Level::Debug,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Error,
        Level::Critical,
        Level::Alert,
        Level::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Alert => "alert",
            Level::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct UnknownLevel(pub String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// A submission that already passed the input boundary.
///
/// There is deliberately no `id` here: entry ids are always assigned by the
/// server.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub message: String,
    pub level: Level,
    pub service_name: String,
    pub trace_id: Option<Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of an ingestion job.
///
/// Identifier and timestamp fields are optional on the wire so hand-crafted or
/// legacy jobs still deserialize; [`normalize`] completes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    pub message: String,
    pub level: Level,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<NewLogEntry> for LogPayload {
    fn from(entry: NewLogEntry) -> Self {
        LogPayload {
            id: None,
            trace_id: entry.trace_id,
            message: entry.message,
            level: entry.level,
            service_name: entry.service_name,
            timestamp: entry.timestamp,
        }
    }
}

impl From<LogRecord> for LogPayload {
    fn from(record: LogRecord) -> Self {
        LogPayload {
            id: Some(record.id),
            trace_id: Some(record.trace_id),
            message: record.message,
            level: record.level,
            service_name: record.service_name,
            timestamp: Some(record.timestamp),
        }
    }
}

/// A fully populated entry, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub message: String,
    pub level: Level,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
}

/// A durable entry as held by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub message: String,
    pub level: Level,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogEntry {
    /// Stamps a record with its write time.
    pub fn from_record(record: LogRecord, written_at: DateTime<Utc>) -> Self {
        LogEntry {
            id: record.id,
            trace_id: record.trace_id,
            message: record.message,
            level: record.level,
            service_name: record.service_name,
            timestamp: record.timestamp,
            created_at: written_at,
            updated_at: written_at,
        }
    }
}

/// Fills whatever identifiers and timestamp the payload lacks.
///
/// A nil UUID counts as missing. Values already present are kept untouched.
pub fn normalize(payload: LogPayload, now: DateTime<Utc>) -> LogRecord {
    LogRecord {
        id: present(payload.id).unwrap_or_else(Uuid::new_v4),
        trace_id: present(payload.trace_id).unwrap_or_else(Uuid::new_v4),
        message: payload.message,
        level: payload.level,
        service_name: payload.service_name,
        timestamp: payload.timestamp.unwrap_or(now),
    }
}

fn present(id: Option<Uuid>) -> Option<Uuid> {
    id.filter(|id| !id.is_nil())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn payload() -> LogPayload {
        LogPayload {
            id: None,
            trace_id: None,
            message: "boom".to_string(),
            level: Level::Error,
            service_name: "api".to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn test_level_round_trips_through_str() {
        for level in Level::ALL {
            assert_eq!(level.as_str().parse::<Level>(), Ok(level));
        }
    }

    #[test]
    fn test_level_rejects_unknown_and_uppercase() {
        assert_eq!(
            "fatal".parse::<Level>(),
            Err(UnknownLevel("fatal".to_string()))
        );
        assert!("ERROR".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Level::Warning).unwrap(),
            "\"warning\""
        );
        let level: Level = serde_json::from_str("\"emergency\"").unwrap();
        assert_eq!(level, Level::Emergency);
    }

    #[test]
    fn test_normalize_fills_missing_fields() {
        let now = Utc.with_ymd_and_hms(2024, 12, 7, 10, 0, 0).unwrap();
        let record = normalize(payload(), now);

        assert!(!record.id.is_nil());
        assert!(!record.trace_id.is_nil());
        assert_ne!(record.id, record.trace_id);
        assert_eq!(record.timestamp, now);
        assert_eq!(record.message, "boom");
        assert_eq!(record.level, Level::Error);
    }

    #[test]
    fn test_normalize_keeps_present_fields() {
        let id = Uuid::new_v4();
        let trace_id = Uuid::new_v4();
        let timestamp = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let record = normalize(
            LogPayload {
                id: Some(id),
                trace_id: Some(trace_id),
                timestamp: Some(timestamp),
                ..payload()
            },
            Utc::now(),
        );

        assert_eq!(record.id, id);
        assert_eq!(record.trace_id, trace_id);
        assert_eq!(record.timestamp, timestamp);
    }

    #[test]
    fn test_normalize_treats_nil_ids_as_missing() {
        let record = normalize(
            LogPayload {
                id: Some(Uuid::nil()),
                trace_id: Some(Uuid::nil()),
                ..payload()
            },
            Utc::now(),
        );
        assert!(!record.id.is_nil());
        assert!(!record.trace_id.is_nil());
    }

    #[test]
    fn test_payload_deserializes_without_identifiers() {
        let payload: LogPayload = serde_json::from_str(
            r#"{"message":"legacy","level":"info","service_name":"billing"}"#,
        )
        .unwrap();
        assert_eq!(payload.id, None);
        assert_eq!(payload.trace_id, None);
        assert_eq!(payload.timestamp, None);
    }

    #[test]
    fn test_payload_from_record_is_complete() {
        let record = normalize(payload(), Utc::now());
        let payload = LogPayload::from(record.clone());
        assert_eq!(payload.id, Some(record.id));
        assert_eq!(payload.trace_id, Some(record.trace_id));
        assert_eq!(payload.timestamp, Some(record.timestamp));
        assert_eq!(normalize(payload, Utc::now()), record);
    }
}
