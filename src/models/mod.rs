use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A broadcaster's stream identity. `is_live` reflects the last accepted
/// liveness transition and is only ever mutated through the conditional
/// update in the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: Uuid,

    /// Internal user id of the broadcaster.
    pub owner_id: Uuid,

    /// Last path segment the ingest server publishes under
    /// (`live/{slug}`), also the broadcaster's public handle.
    pub slug: String,

    /// Current stream title, copied onto sessions at open.
    pub title: String,

    pub is_live: bool,

    pub created_at: DateTime<Utc>,
}

/// One contiguous live period. Sealed once `ended_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StreamSession {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Derived at close: ended_at - started_at, whole seconds.
    pub duration_seconds: Option<i64>,
    pub peak_viewers: i32,
    /// Derived at close from samples within the session window.
    pub average_viewers: f64,
    pub message_count: i32,
}

impl StreamSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Point-in-time viewer count. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricSample {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub viewer_count: i32,
    pub recorded_at: DateTime<Utc>,
}

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Someone started following the recipient
    Follow,
    /// A followed broadcaster went live
    StreamStarted,
    /// A followed broadcaster stopped streaming
    StreamEnded,
    /// Recipient was mentioned in chat
    Mention,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::StreamStarted => "stream_started",
            NotificationKind::StreamEnded => "stream_ended",
            NotificationKind::Mention => "mention",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "follow" => NotificationKind::Follow,
            "stream_started" => NotificationKind::StreamStarted,
            "stream_ended" => NotificationKind::StreamEnded,
            _ => NotificationKind::Mention,
        }
    }
}

/// Durable per-recipient notification. Only the read flag mutates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Opaque structured payload for the presentation layer.
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
}

impl NewNotification {
    pub fn follow(recipient_id: Uuid, follower_username: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Follow,
            title: "New follower!".to_string(),
            message: format!("{} is now following you", follower_username),
            payload: serde_json::json!({ "follower_username": follower_username }),
        }
    }

    pub fn stream_started(recipient_id: Uuid, streamer_username: &str, stream_title: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::StreamStarted,
            title: format!("{} is live!", streamer_username),
            message: stream_title.to_string(),
            payload: serde_json::json!({
                "streamer_username": streamer_username,
                "stream_title": stream_title,
            }),
        }
    }

    pub fn stream_ended(recipient_id: Uuid, streamer_username: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::StreamEnded,
            title: "Stream ended".to_string(),
            message: format!("{}'s stream just ended", streamer_username),
            payload: serde_json::json!({ "streamer_username": streamer_username }),
        }
    }

    pub fn mention(recipient_id: Uuid, mentioner_username: &str, message: &str) -> Self {
        let snippet: String = message.chars().take(100).collect();
        let truncated = message.chars().count() > 100;
        Self {
            recipient_id,
            kind: NotificationKind::Mention,
            title: "You were mentioned".to_string(),
            message: format!(
                "{}: {}{}",
                mentioner_username,
                snippet,
                if truncated { "..." } else { "" }
            ),
            payload: serde_json::json!({
                "mentioner_username": mentioner_username,
                "full_message": message,
            }),
        }
    }
}

/// Follow edge between two users.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follow {
    pub follower_id: Uuid,
    pub followee_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One day's rollup for a broadcaster, upserted by the daily aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyAggregate {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub new_followers: i64,
    pub total_views: i64,
    pub stream_duration_seconds: i64,
    pub peak_viewers: i32,
    pub message_count: i64,
}

/// Dashboard overview for a broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overview {
    pub total_followers: i64,
    /// Last 30 days vs the 30 before, percent.
    pub follower_growth: f64,
    pub current_viewers: i32,
    pub is_live: bool,
    pub sessions_this_month: i64,
    pub total_stream_duration_seconds: i64,
}

/// Unread badge count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: i64,
}

/// Page of notifications plus pagination metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedNotifications {
    pub items: Vec<Notification>,
    pub total: i64,
    pub has_more: bool,
}

/// Outcome of feeding one liveness signal to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    WentLive,
    WentOffline,
    /// Signal matched the stored state; nothing to do.
    Unchanged,
}

/// Ingest-server event kinds accepted by the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEventKind {
    Publish,
    Unpublish,
}

impl IngestEventKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(IngestEventKind::Publish),
            "unpublish" => Some(IngestEventKind::Unpublish),
            _ => None,
        }
    }
}

/// Result of one sweep over channels marked live.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub went_offline: usize,
    pub failed: usize,
}

/// Result of one fan-out batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}
