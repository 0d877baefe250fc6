//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::fmt;

/// Message types carried in the second header field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Server to client telemetry push.
    NotifyToFrontend,
    /// Client to server device command.
    DeviceControl,
    /// Any type this revision does not know. Kept verbatim so newer servers
    /// do not break older clients.
    Unrecognized(String),
}

impl MessageKind {
    /// Wire spelling of the message type.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::NotifyToFrontend => "notify-to-frontend",
            MessageKind::DeviceControl => "device_control",
            MessageKind::Unrecognized(raw) => raw,
        }
    }

    /// Returns `true` for types this revision knows how to handle.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, MessageKind::Unrecognized(_))
    }
}

impl From<&str> for MessageKind {
    fn from(raw: &str) -> Self {
        match raw {
            "notify-to-frontend" => MessageKind::NotifyToFrontend,
            "device_control" => MessageKind::DeviceControl,
            other => MessageKind::Unrecognized(other.to_owned()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
