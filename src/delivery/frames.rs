/// Push frame types for the long-lived notification connection
use serde::{Deserialize, Serialize};

use crate::models::Notification;

/// Frames pushed to a connected client. The wire form carries a `type`
/// discriminator and a `data` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// Connection acknowledged, sent first on every connection.
    Connected,

    /// Full unread snapshot, sent right after `connected`.
    Notifications { data: Vec<Notification> },

    /// Unread rows that appeared since the connection's watermark.
    NewNotifications { data: Vec<Notification> },

    /// Fast-path delivery of a single just-created notification.
    InstantNotification { data: Box<Notification> },

    /// Keepalive, sent on every tick.
    Ping,
}

impl PushFrame {
    pub fn snapshot(data: Vec<Notification>) -> Self {
        PushFrame::Notifications { data }
    }

    pub fn incremental(data: Vec<Notification>) -> Self {
        PushFrame::NewNotifications { data }
    }

    pub fn instant(notification: Notification) -> Self {
        PushFrame::InstantNotification {
            data: Box::new(notification),
        }
    }

    /// Label used for metrics and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PushFrame::Connected => "connected",
            PushFrame::Notifications { .. } => "notifications",
            PushFrame::NewNotifications { .. } => "new_notifications",
            PushFrame::InstantNotification { .. } => "instant_notification",
            PushFrame::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
