//! Agent status events

use chrono::{DateTime, SecondsFormat, Utc};

use dm_protocol::{Record, Template};

/// Lifecycle milestones reported to the platform as events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Startup,
    Reconnect,
    Disconnect,
    Error,
    Shutdown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Reconnect => "reconnect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        }
    }
}

/// `400,ts_<status>,<text>,<time>` stamped now; the text defaults to the status name
pub fn status_event(status: AgentStatus, text: Option<&str>) -> Record {
    status_event_at(status, text, Utc::now())
}

pub fn status_event_at(status: AgentStatus, text: Option<&str>, time: DateTime<Utc>) -> Record {
    Record::new(Template::CreateEvent)
        .with_field(format!("ts_{}", status.as_str()))
        .with_field(text.unwrap_or(status.as_str()))
        .with_field(time.to_rfc3339_opts(SecondsFormat::Millis, true))
}
