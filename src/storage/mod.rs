/// Storage layer for broadcast-service
///
/// Repository traits with two implementations: `PgStore` (Postgres via
/// sqlx) for production and `MemoryStore` for tests and database-less
/// runs. The two genuine contention points, the liveness flag and the
/// session peak, are conditional updates inside the store, never
/// read-then-write in the services.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Channel, DailyAggregate, MetricSample, NewNotification, Notification, PagedNotifications,
    StreamSession,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create_channel(&self, owner_id: Uuid, slug: &str, title: &str) -> Result<Channel>;

    async fn channel(&self, id: Uuid) -> Result<Option<Channel>>;

    async fn channel_by_slug(&self, slug: &str) -> Result<Option<Channel>>;

    async fn channel_by_owner(&self, owner_id: Uuid) -> Result<Option<Channel>>;

    /// Channels currently marked live (sweep input).
    async fn live_channels(&self) -> Result<Vec<Channel>>;

    /// Compare-and-set on the liveness flag. Returns true iff this call
    /// changed the stored state; duplicate signals observe false.
    async fn set_live(&self, channel_id: Uuid, live: bool) -> Result<bool>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Opens a session. Fails with `Conflict` when the channel already
    /// has an open one.
    async fn create_session(&self, channel_id: Uuid, title: Option<&str>)
        -> Result<StreamSession>;

    async fn session(&self, id: Uuid) -> Result<Option<StreamSession>>;

    async fn active_session(&self, channel_id: Uuid) -> Result<Option<StreamSession>>;

    /// Seals an open session. Fails with `NotFound` when the session is
    /// missing or already closed.
    async fn close_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        average_viewers: f64,
    ) -> Result<StreamSession>;

    /// Max-on-write peak update for the channel's open session, if any.
    async fn raise_peak(&self, channel_id: Uuid, viewer_count: i32) -> Result<()>;

    /// Bumps the open session's message counter, if any.
    async fn add_messages(&self, channel_id: Uuid, count: i32) -> Result<()>;

    async fn insert_sample(&self, channel_id: Uuid, viewer_count: i32) -> Result<MetricSample>;

    /// Samples with `from <= recorded_at <= to`.
    async fn samples_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>>;

    async fn latest_sample(&self, channel_id: Uuid) -> Result<Option<MetricSample>>;

    /// Sessions with `from <= started_at < to`.
    async fn sessions_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StreamSession>>;

    async fn session_history(&self, channel_id: Uuid, limit: i64) -> Result<Vec<StreamSession>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification>;

    /// Flips the read flag. Idempotent when already read; `NotFound` for
    /// an unknown id, `Forbidden` when the record belongs to someone
    /// else. Ownership is part of the update predicate.
    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<()>;

    /// Returns the number of rows flipped.
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64>;

    async fn unread(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>>;

    async fn page(&self, recipient_id: Uuid, page: i64, limit: i64) -> Result<PagedNotifications>;

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64>;

    /// Retention sweep: deletes read rows older than the cutoff.
    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// Idempotent; true iff a new edge was inserted.
    async fn create_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    /// Idempotent; true iff an edge was removed.
    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    async fn follower_ids(&self, followee_id: Uuid) -> Result<Vec<Uuid>>;

    async fn follower_count(&self, followee_id: Uuid) -> Result<i64>;

    async fn followers_between(
        &self,
        followee_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Upsert keyed by (user, date); re-running a day overwrites.
    async fn upsert_daily(&self, aggregate: &DailyAggregate) -> Result<DailyAggregate>;

    async fn daily_series(&self, user_id: Uuid, from: NaiveDate) -> Result<Vec<DailyAggregate>>;
}

/// Everything the services need, behind one object-safe bound.
pub trait Store:
    ChannelRepository
    + SessionRepository
    + NotificationRepository
    + FollowRepository
    + AnalyticsRepository
{
}

impl<T> Store for T where
    T: ChannelRepository
        + SessionRepository
        + NotificationRepository
        + FollowRepository
        + AnalyticsRepository
{
}
