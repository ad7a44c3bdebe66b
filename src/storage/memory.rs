/// In-memory store
///
/// Backs tests and database-less development runs. Each map sits behind
/// its own `tokio::sync::RwLock`; check-and-mutate operations hold the
/// write guard for the whole operation, which gives the same atomicity
/// the SQL conditional updates give `PgStore`.
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Channel, DailyAggregate, Follow, MetricSample, NewNotification, Notification,
    PagedNotifications, StreamSession,
};
use crate::storage::{
    AnalyticsRepository, ChannelRepository, FollowRepository, NotificationRepository,
    SessionRepository,
};

#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<HashMap<Uuid, Channel>>,
    sessions: RwLock<HashMap<Uuid, StreamSession>>,
    samples: RwLock<Vec<MetricSample>>,
    notifications: RwLock<Vec<Notification>>,
    follows: RwLock<Vec<Follow>>,
    daily: RwLock<HashMap<(Uuid, NaiveDate), DailyAggregate>>,

    // Fault injection for tests: writes targeting these ids fail with a
    // storage error.
    failing_recipients: RwLock<HashSet<Uuid>>,
    failing_channels: RwLock<HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_notification` fail for a recipient (fanout isolation
    /// tests).
    pub async fn fail_notification_creates_for(&self, recipient_id: Uuid) {
        self.failing_recipients.write().await.insert(recipient_id);
    }

    /// Make `set_live` fail for a channel (sweep isolation tests).
    pub async fn fail_set_live_for(&self, channel_id: Uuid) {
        self.failing_channels.write().await.insert(channel_id);
    }
}

#[async_trait]
impl ChannelRepository for MemoryStore {
    async fn create_channel(&self, owner_id: Uuid, slug: &str, title: &str) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4(),
            owner_id,
            slug: slug.to_string(),
            title: title.to_string(),
            is_live: false,
            created_at: Utc::now(),
        };
        self.channels
            .write()
            .await
            .insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn channel(&self, id: Uuid) -> Result<Option<Channel>> {
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn channel_by_slug(&self, slug: &str) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn channel_by_owner(&self, owner_id: Uuid) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .find(|c| c.owner_id == owner_id)
            .cloned())
    }

    async fn live_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .filter(|c| c.is_live)
            .cloned()
            .collect())
    }

    async fn set_live(&self, channel_id: Uuid, live: bool) -> Result<bool> {
        if self.failing_channels.read().await.contains(&channel_id) {
            return Err(AppError::Database("injected set_live failure".into()));
        }
        let mut channels = self.channels.write().await;
        match channels.get_mut(&channel_id) {
            Some(channel) if channel.is_live != live => {
                channel.is_live = live;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(
        &self,
        channel_id: Uuid,
        title: Option<&str>,
    ) -> Result<StreamSession> {
        let mut sessions = self.sessions.write().await;
        if sessions
            .values()
            .any(|s| s.channel_id == channel_id && s.is_open())
        {
            return Err(AppError::Conflict(format!(
                "channel {} already has an open session",
                channel_id
            )));
        }
        let session = StreamSession {
            id: Uuid::new_v4(),
            channel_id,
            title: title.map(String::from),
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            peak_viewers: 0,
            average_viewers: 0.0,
            message_count: 0,
        };
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session(&self, id: Uuid) -> Result<Option<StreamSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn active_session(&self, channel_id: Uuid) -> Result<Option<StreamSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.channel_id == channel_id && s.is_open())
            .cloned())
    }

    async fn close_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        average_viewers: f64,
    ) -> Result<StreamSession> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.is_open() => {
                session.ended_at = Some(ended_at);
                session.duration_seconds = Some(duration_seconds);
                session.average_viewers = average_viewers;
                Ok(session.clone())
            }
            _ => Err(AppError::NotFound(format!("open session {}", id))),
        }
    }

    async fn raise_peak(&self, channel_id: Uuid, viewer_count: i32) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions
            .values_mut()
            .find(|s| s.channel_id == channel_id && s.is_open())
        {
            session.peak_viewers = session.peak_viewers.max(viewer_count);
        }
        Ok(())
    }

    async fn add_messages(&self, channel_id: Uuid, count: i32) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions
            .values_mut()
            .find(|s| s.channel_id == channel_id && s.is_open())
        {
            session.message_count += count;
        }
        Ok(())
    }

    async fn insert_sample(&self, channel_id: Uuid, viewer_count: i32) -> Result<MetricSample> {
        let sample = MetricSample {
            id: Uuid::new_v4(),
            channel_id,
            viewer_count,
            recorded_at: Utc::now(),
        };
        self.samples.write().await.push(sample.clone());
        Ok(sample)
    }

    async fn samples_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>> {
        let mut out: Vec<MetricSample> = self
            .samples
            .read()
            .await
            .iter()
            .filter(|s| s.channel_id == channel_id && s.recorded_at >= from && s.recorded_at <= to)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.recorded_at);
        Ok(out)
    }

    async fn latest_sample(&self, channel_id: Uuid) -> Result<Option<MetricSample>> {
        Ok(self
            .samples
            .read()
            .await
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .max_by_key(|s| s.recorded_at)
            .cloned())
    }

    async fn sessions_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StreamSession>> {
        let mut out: Vec<StreamSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.channel_id == channel_id && s.started_at >= from && s.started_at < to)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    async fn session_history(&self, channel_id: Uuid, limit: i64) -> Result<Vec<StreamSession>> {
        let mut out: Vec<StreamSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        if self
            .failing_recipients
            .read()
            .await
            .contains(&new.recipient_id)
        {
            return Err(AppError::Database("injected create failure".into()));
        }
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: new.recipient_id,
            kind: new.kind,
            title: new.title.clone(),
            message: new.message.clone(),
            payload: new.payload.clone(),
            read: false,
            created_at: Utc::now(),
        };
        self.notifications.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if n.recipient_id == recipient_id => {
                n.read = true;
                Ok(())
            }
            Some(_) => Err(AppError::Forbidden(
                "notification belongs to another recipient".into(),
            )),
            None => Err(AppError::NotFound(format!("notification {}", id))),
        }
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let mut flipped = 0;
        for n in notifications
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
        {
            n.read = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn unread(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let mut out: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn page(&self, recipient_id: Uuid, page: i64, limit: i64) -> Result<PagedNotifications> {
        let page = page.max(1);
        let limit = limit.max(0);
        let mut all: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = all.len() as i64;
        let skip = ((page - 1) * limit) as usize;
        let items: Vec<Notification> = all.into_iter().skip(skip).take(limit as usize).collect();
        let has_more = (skip as i64 + items.len() as i64) < total;

        Ok(PagedNotifications {
            items,
            total,
            has_more,
        })
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .count() as i64)
    }

    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|n| !(n.read && n.created_at < cutoff));
        Ok((before - notifications.len()) as u64)
    }
}

#[async_trait]
impl FollowRepository for MemoryStore {
    async fn create_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let mut follows = self.follows.write().await;
        if follows
            .iter()
            .any(|f| f.follower_id == follower_id && f.followee_id == followee_id)
        {
            return Ok(false);
        }
        follows.push(Follow {
            follower_id,
            followee_id,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let mut follows = self.follows.write().await;
        let before = follows.len();
        follows.retain(|f| !(f.follower_id == follower_id && f.followee_id == followee_id));
        Ok(follows.len() < before)
    }

    async fn follower_ids(&self, followee_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .follows
            .read()
            .await
            .iter()
            .filter(|f| f.followee_id == followee_id)
            .map(|f| f.follower_id)
            .collect())
    }

    async fn follower_count(&self, followee_id: Uuid) -> Result<i64> {
        Ok(self
            .follows
            .read()
            .await
            .iter()
            .filter(|f| f.followee_id == followee_id)
            .count() as i64)
    }

    async fn followers_between(
        &self,
        followee_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(self
            .follows
            .read()
            .await
            .iter()
            .filter(|f| {
                f.followee_id == followee_id && f.created_at >= from && f.created_at < to
            })
            .count() as i64)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn upsert_daily(&self, aggregate: &DailyAggregate) -> Result<DailyAggregate> {
        self.daily
            .write()
            .await
            .insert((aggregate.user_id, aggregate.date), aggregate.clone());
        Ok(aggregate.clone())
    }

    async fn daily_series(&self, user_id: Uuid, from: NaiveDate) -> Result<Vec<DailyAggregate>> {
        let mut out: Vec<DailyAggregate> = self
            .daily
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id && d.date >= from)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.date);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;

    #[tokio::test]
    async fn test_set_live_is_a_compare_and_set() {
        let store = MemoryStore::new();
        let channel = store
            .create_channel(Uuid::new_v4(), "alice", "Alice live")
            .await
            .unwrap();

        assert!(store.set_live(channel.id, true).await.unwrap());
        // Duplicate signal observes no change.
        assert!(!store.set_live(channel.id, true).await.unwrap());
        assert!(store.set_live(channel.id, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_open_session_conflicts() {
        let store = MemoryStore::new();
        let channel = store
            .create_channel(Uuid::new_v4(), "alice", "Alice live")
            .await
            .unwrap();

        store.create_session(channel.id, None).await.unwrap();
        let err = store.create_session(channel.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_close_session_twice_is_not_found() {
        let store = MemoryStore::new();
        let channel = store
            .create_channel(Uuid::new_v4(), "alice", "Alice live")
            .await
            .unwrap();
        let session = store.create_session(channel.id, None).await.unwrap();

        store
            .close_session(session.id, Utc::now(), 10, 1.0)
            .await
            .unwrap();
        let err = store
            .close_session(session.id, Utc::now(), 10, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_read_checks_ownership() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let n = store
            .create_notification(&NewNotification::follow(owner, "bob"))
            .await
            .unwrap();

        let err = store.mark_read(n.id, stranger).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        store.mark_read(n.id, owner).await.unwrap();
        // Second call is a no-op, not an error.
        store.mark_read(n.id, owner).await.unwrap();
        assert_eq!(store.unread_count(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_only_touches_read_rows() {
        let store = MemoryStore::new();
        let recipient = Uuid::new_v4();
        let read = store
            .create_notification(&NewNotification::follow(recipient, "a"))
            .await
            .unwrap();
        store
            .create_notification(&NewNotification::follow(recipient, "b"))
            .await
            .unwrap();
        store.mark_read(read.id, recipient).await.unwrap();

        let purged = store
            .purge_read_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.unread_count(recipient).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_reports_total_and_has_more() {
        let store = MemoryStore::new();
        let recipient = Uuid::new_v4();
        for i in 0..5 {
            store
                .create_notification(&NewNotification::mention(
                    recipient,
                    "bob",
                    &format!("hi {}", i),
                ))
                .await
                .unwrap();
        }

        let first = store.page(recipient, 1, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total, 5);
        assert!(first.has_more);

        let last = store.page(recipient, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.items[0].kind, NotificationKind::Mention);
    }
}
