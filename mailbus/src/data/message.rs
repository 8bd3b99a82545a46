//! The unit of mail exchanged with the broker.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::clock::Timestamp;

/// What a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Application publication.
    Notify,
    /// Heartbeat outbound; broker timing echo inbound.
    Timing,
    /// Legacy broker preamble carrying the broker send time as its value.
    Null,
    /// Subscribe to a key.
    Register,
    /// Drop a subscription.
    Unregister,
    /// Directed command to a named client.
    Command,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Payload {
    #[default]
    Empty,
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

/// One piece of mail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub key: String,
    pub time: Timestamp,
    pub value: Payload,
    /// Name of the publishing client; filled in by the broker on delivery.
    pub source: String,
}

impl Message {
    /// Builds a message with an empty source.
    #[must_use]
    pub fn new(
        kind: MessageKind,
        key: impl Into<String>,
        value: impl Into<Payload>,
        time: Timestamp,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            time,
            value: value.into(),
            source: String::new(),
        }
    }

    /// A publication of `value` under `key`.
    #[must_use]
    pub fn notify(key: impl Into<String>, value: impl Into<Payload>, time: Timestamp) -> Self {
        Self::new(MessageKind::Notify, key, value, time)
    }

    /// The writer's periodic heartbeat.
    #[must_use]
    pub fn heartbeat(time: Timestamp) -> Self {
        Self::new(MessageKind::Timing, "_async_timing", 0.0, time)
    }

    /// The numeric value, if the payload is a double.
    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self.value {
            Payload::Double(v) => Some(v),
            _ => None,
        }
    }

    /// The text value, if the payload is a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this message is timing or legacy-null control traffic.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self.kind, MessageKind::Timing | MessageKind::Null)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} @ {}", self.kind, self.key, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_control_timing() {
        let hb = Message::heartbeat(Timestamp::from_secs(12.0));
        assert_eq!(hb.kind, MessageKind::Timing);
        assert!(hb.is_control());
        assert_eq!(hb.time, Timestamp::from_secs(12.0));
        assert_eq!(hb.as_double(), Some(0.0));
    }

    #[test]
    fn payload_accessors() {
        let m = Message::notify("DEPTH", 3.5, Timestamp::ZERO);
        assert_eq!(m.as_double(), Some(3.5));
        assert_eq!(m.as_text(), None);
        assert!(!m.is_control());

        let m = Message::notify("STATUS", "ok", Timestamp::ZERO);
        assert_eq!(m.as_text(), Some("ok"));
        assert_eq!(m.as_double(), None);
    }

    #[test]
    fn display_names_kind_and_key() {
        let m = Message::notify("X", Payload::Empty, Timestamp::from_secs(1.5));
        assert_eq!(m.to_string(), "Notify X @ 1.500000s");
    }
}
