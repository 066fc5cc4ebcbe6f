use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" | "out" => Some(LogStream::Stdout),
            "stderr" | "err" => Some(LogStream::Stderr),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted line of job output. `id` is assigned by the store and is the
/// authoritative order for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    #[serde(rename = "task_id")]
    pub job_id: String,
    pub stream: LogStream,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Everything that travels over the bus or down an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    Connected {
        #[serde(rename = "task_id")]
        job_id: String,
    },
    NewLog(LogRecord),
    Keepalive,
    Done {
        #[serde(rename = "task_id")]
        job_id: String,
        status: JobStatus,
    },
}

impl BroadcastMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastMessage::Connected { .. } => "connected",
            BroadcastMessage::NewLog(_) => "new_log",
            BroadcastMessage::Keepalive => "keepalive",
            BroadcastMessage::Done { .. } => "done",
        }
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            BroadcastMessage::NewLog(record) => Some(record.id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn record() -> LogRecord {
        LogRecord {
            id: 7,
            job_id: "job-1".into(),
            stream: LogStream::Stderr,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            message: "boom".into(),
        }
    }

    #[test]
    fn new_log_carries_wire_fields() {
        let json = BroadcastMessage::NewLog(record()).to_json().unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "new_log");
        assert_eq!(v["id"], 7);
        assert_eq!(v["task_id"], "job-1");
        assert_eq!(v["stream"], "stderr");
        assert_eq!(v["message"], "boom");
        assert_eq!(v["timestamp"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn connected_and_keepalive_shapes() {
        let connected = BroadcastMessage::Connected {
            job_id: "abc".into(),
        };
        assert_eq!(
            connected.to_json().unwrap(),
            r#"{"type":"connected","task_id":"abc"}"#
        );
        assert_eq!(
            BroadcastMessage::Keepalive.to_json().unwrap(),
            r#"{"type":"keepalive"}"#
        );
    }

    #[test]
    fn parses_bus_payload() {
        let payload = r#"{"type":"new_log","id":3,"task_id":"t","stream":"stdout","timestamp":"2024-05-01T12:30:00Z","message":"hi"}"#;
        let msg = BroadcastMessage::from_json(payload).unwrap();
        assert_eq!(msg.record_id(), Some(3));
        assert_eq!(msg.kind(), "new_log");
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(BroadcastMessage::from_json(r#"{"type":"bogus"}"#).is_err());
        assert!(BroadcastMessage::from_json("not json").is_err());
    }

    #[test]
    fn stream_parse_accepts_short_names() {
        assert_eq!(LogStream::parse("out"), Some(LogStream::Stdout));
        assert_eq!(LogStream::parse("stderr"), Some(LogStream::Stderr));
        assert_eq!(LogStream::parse("tty"), None);
    }
}
