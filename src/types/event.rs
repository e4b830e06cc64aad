//! External event identity for the dedupe gate

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{Result, TipRelayError};

/// Source stream an event was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// Ledger transaction
    Tx,
    /// Inbox message
    Message,
    /// Triggering social post
    Post,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tx => "tx",
            Self::Message => "message",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = TipRelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tx" => Ok(Self::Tx),
            "message" => Ok(Self::Message),
            "post" => Ok(Self::Post),
            other => Err(TipRelayError::Internal(format!("unknown event class: {}", other))),
        }
    }
}

/// Key of a ProcessedEvent row: `(event_class, event_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub class: EventClass,
    pub id: String,
}

impl EventKey {
    pub fn tx(id: impl Into<String>) -> Self {
        Self { class: EventClass::Tx, id: id.into() }
    }

    pub fn message(id: impl Into<String>) -> Self {
        Self { class: EventClass::Message, id: id.into() }
    }

    pub fn post(id: impl Into<String>) -> Self {
        Self { class: EventClass::Post, id: id.into() }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// A persisted record that an event's handler ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedEvent {
    pub event_class: EventClass,
    pub event_id: String,
    pub observed_at: String,
}
