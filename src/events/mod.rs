//! Panel events and their Server-Sent Events encoding

pub mod bus;

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::Status;

pub use bus::{EventBus, Subscription, MAX_SUBSCRIBERS, SUBSCRIBER_BUFFER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Log,
    Restart,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Log => "log",
            EventKind::Restart => "restart",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bus event. String payloads go on the wire verbatim, anything else as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    pub fn status(status: &Status) -> Self {
        Self {
            kind: EventKind::Status,
            data: serde_json::to_value(status).unwrap_or(Value::Null),
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Log,
            data: Value::String(line.into()),
        }
    }

    pub fn restart(restarting: bool) -> Self {
        Self {
            kind: EventKind::Restart,
            data: json!({ "restarting": restarting }),
        }
    }

    /// Payload text for the `data:` field
    pub fn data_string(&self) -> String {
        data_string(&self.data)
    }

    pub fn to_sse(&self) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .event(self.kind.as_str())
            .data(self.data_string())
    }
}

fn data_string(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode one SSE frame: `event: <name>\ndata: <payload>\n\n`
pub fn format_sse(event: &str, data: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data_string(data))
}
