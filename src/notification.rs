//! Notification kinds and payloads.
//!
//! Every inbound message is classified by the transport as either an
//! [`Event`](NotificationKind::Event) carrying a [`Value`], or an
//! [`Error`](NotificationKind::Error) carrying an [`ErrorDescriptor`].
//! The set of kinds is closed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Subscription channel tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    Event,
    Error,
}

impl NotificationKind {
    /// All kinds, in index order.
    pub const ALL: [NotificationKind; 2] = [NotificationKind::Event, NotificationKind::Error];

    /// Number of kinds.
    pub const COUNT: usize = 2;

    /// Stable array index for per-kind storage.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            NotificationKind::Event => 0,
            NotificationKind::Error => 1,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Event => f.write_str("event"),
            NotificationKind::Error => f.write_str("error"),
        }
    }
}

/// Error payload delivered on the `Error` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDescriptor {
    /// The service went away temporarily; the connection may recover.
    ConnectionInterrupted,
    /// The connection can no longer be used.
    ConnectionInvalid,
    /// An inbound payload could not be decoded.
    Malformed(String),
    /// A registered handler failed while processing a notification.
    HandlerFailed {
        kind: NotificationKind,
        message: String,
    },
    /// Error reported by the service itself.
    Service(String),
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDescriptor::ConnectionInterrupted => f.write_str("connection interrupted"),
            ErrorDescriptor::ConnectionInvalid => f.write_str("connection invalid"),
            ErrorDescriptor::Malformed(msg) => write!(f, "malformed payload: {}", msg),
            ErrorDescriptor::HandlerFailed { kind, message } => {
                write!(f, "{} handler failed: {}", kind, message)
            }
            ErrorDescriptor::Service(msg) => write!(f, "service error: {}", msg),
        }
    }
}

/// An inbound notification, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Event(Value),
    Error(ErrorDescriptor),
}

impl Notification {
    /// The channel this notification is routed to.
    #[inline]
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Event(_) => NotificationKind::Event,
            Notification::Error(_) => NotificationKind::Error,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Event(v) => write!(f, "{}", v),
            Notification::Error(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indices_are_distinct() {
        assert_eq!(NotificationKind::Event.index(), 0);
        assert_eq!(NotificationKind::Error.index(), 1);
        for (i, kind) in NotificationKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(NotificationKind::ALL.len(), NotificationKind::COUNT);
    }

    #[test]
    fn test_notification_kind() {
        assert_eq!(
            Notification::Event(Value::from("ping")).kind(),
            NotificationKind::Event
        );
        assert_eq!(
            Notification::Error(ErrorDescriptor::ConnectionInvalid).kind(),
            NotificationKind::Error
        );
    }

    #[test]
    fn test_error_descriptor_messages() {
        assert_eq!(
            ErrorDescriptor::ConnectionInterrupted.to_string(),
            "connection interrupted"
        );
        assert_eq!(
            ErrorDescriptor::ConnectionInvalid.to_string(),
            "connection invalid"
        );
        let failed = ErrorDescriptor::HandlerFailed {
            kind: NotificationKind::Event,
            message: "boom".to_string(),
        };
        assert_eq!(failed.to_string(), "event handler failed: boom");
    }
}
