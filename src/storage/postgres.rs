/// Postgres store
///
/// sqlx-backed implementation of the repository traits. Contended
/// updates (liveness flag, session peak) are expressed as conditional
/// SQL so concurrent writers cannot lose updates.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Channel, DailyAggregate, MetricSample, NewNotification, Notification, NotificationKind,
    PagedNotifications, StreamSession,
};
use crate::storage::{
    AnalyticsRepository, ChannelRepository, FollowRepository, NotificationRepository,
    SessionRepository,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_notification(row: &PgRow) -> Notification {
    let kind: String = row.get("kind");
    Notification {
        id: row.get("id"),
        recipient_id: row.get("recipient_id"),
        kind: NotificationKind::parse(&kind),
        title: row.get("title"),
        message: row.get("message"),
        payload: row.get("payload"),
        read: row.get("read"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl ChannelRepository for PgStore {
    async fn create_channel(&self, owner_id: Uuid, slug: &str, title: &str) -> Result<Channel> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            INSERT INTO channels (id, owner_id, slug, title, is_live, created_at)
            VALUES ($1, $2, $3, $4, FALSE, NOW())
            RETURNING id, owner_id, slug, title, is_live, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(slug)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn channel(&self, id: Uuid) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, owner_id, slug, title, is_live, created_at
            FROM channels
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn channel_by_slug(&self, slug: &str) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, owner_id, slug, title, is_live, created_at
            FROM channels
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn channel_by_owner(&self, owner_id: Uuid) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, owner_id, slug, title, is_live, created_at
            FROM channels
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn live_channels(&self) -> Result<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, owner_id, slug, title, is_live, created_at
            FROM channels
            WHERE is_live = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    async fn set_live(&self, channel_id: Uuid, live: bool) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE channels
            SET is_live = $2
            WHERE id = $1 AND is_live <> $2
            "#,
        )
        .bind(channel_id)
        .bind(live)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn create_session(
        &self,
        channel_id: Uuid,
        title: Option<&str>,
    ) -> Result<StreamSession> {
        // The WHERE NOT EXISTS guard plus the partial unique index on
        // open sessions keeps "at most one open session per channel"
        // true under concurrent opens.
        let session = sqlx::query_as::<_, StreamSession>(
            r#"
            INSERT INTO stream_sessions
                (id, channel_id, title, started_at, peak_viewers, average_viewers, message_count)
            SELECT $1, $2, $3, NOW(), 0, 0, 0
            WHERE NOT EXISTS (
                SELECT 1 FROM stream_sessions
                WHERE channel_id = $2 AND ended_at IS NULL
            )
            RETURNING id, channel_id, title, started_at, ended_at,
                      duration_seconds, peak_viewers, average_viewers, message_count
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(channel_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or_else(|| {
            AppError::Conflict(format!("channel {} already has an open session", channel_id))
        })
    }

    async fn session(&self, id: Uuid) -> Result<Option<StreamSession>> {
        let session = sqlx::query_as::<_, StreamSession>(
            r#"
            SELECT id, channel_id, title, started_at, ended_at,
                   duration_seconds, peak_viewers, average_viewers, message_count
            FROM stream_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn active_session(&self, channel_id: Uuid) -> Result<Option<StreamSession>> {
        let session = sqlx::query_as::<_, StreamSession>(
            r#"
            SELECT id, channel_id, title, started_at, ended_at,
                   duration_seconds, peak_viewers, average_viewers, message_count
            FROM stream_sessions
            WHERE channel_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn close_session(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        average_viewers: f64,
    ) -> Result<StreamSession> {
        let session = sqlx::query_as::<_, StreamSession>(
            r#"
            UPDATE stream_sessions
            SET ended_at = $2, duration_seconds = $3, average_viewers = $4
            WHERE id = $1 AND ended_at IS NULL
            RETURNING id, channel_id, title, started_at, ended_at,
                      duration_seconds, peak_viewers, average_viewers, message_count
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .bind(duration_seconds)
        .bind(average_viewers)
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or_else(|| AppError::NotFound(format!("open session {}", id)))
    }

    async fn raise_peak(&self, channel_id: Uuid, viewer_count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stream_sessions
            SET peak_viewers = GREATEST(peak_viewers, $2)
            WHERE channel_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(channel_id)
        .bind(viewer_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_messages(&self, channel_id: Uuid, count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stream_sessions
            SET message_count = message_count + $2
            WHERE channel_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(channel_id)
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_sample(&self, channel_id: Uuid, viewer_count: i32) -> Result<MetricSample> {
        let sample = sqlx::query_as::<_, MetricSample>(
            r#"
            INSERT INTO metric_samples (id, channel_id, viewer_count, recorded_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, channel_id, viewer_count, recorded_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(channel_id)
        .bind(viewer_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(sample)
    }

    async fn samples_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>> {
        let samples = sqlx::query_as::<_, MetricSample>(
            r#"
            SELECT id, channel_id, viewer_count, recorded_at
            FROM metric_samples
            WHERE channel_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(channel_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }

    async fn latest_sample(&self, channel_id: Uuid) -> Result<Option<MetricSample>> {
        let sample = sqlx::query_as::<_, MetricSample>(
            r#"
            SELECT id, channel_id, viewer_count, recorded_at
            FROM metric_samples
            WHERE channel_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sample)
    }

    async fn sessions_between(
        &self,
        channel_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StreamSession>> {
        let sessions = sqlx::query_as::<_, StreamSession>(
            r#"
            SELECT id, channel_id, title, started_at, ended_at,
                   duration_seconds, peak_viewers, average_viewers, message_count
            FROM stream_sessions
            WHERE channel_id = $1 AND started_at >= $2 AND started_at < $3
            ORDER BY started_at ASC
            "#,
        )
        .bind(channel_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn session_history(&self, channel_id: Uuid, limit: i64) -> Result<Vec<StreamSession>> {
        let sessions = sqlx::query_as::<_, StreamSession>(
            r#"
            SELECT id, channel_id, title, started_at, ended_at,
                   duration_seconds, peak_viewers, average_viewers, message_count
            FROM stream_sessions
            WHERE channel_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_id, kind, title, message, payload, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, NOW())
            RETURNING id, recipient_id, kind, title, message, payload, read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.recipient_id)
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(&new.message)
        .bind(&new.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(map_notification(&row))
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<()> {
        // Ownership sits in the update predicate; the follow-up select
        // only picks the right error for a zero-row outcome.
        let affected = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE id = $1 AND recipient_id = $2
            "#,
        )
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected > 0 {
            return Ok(());
        }

        let owner: Option<Uuid> =
            sqlx::query_scalar(r#"SELECT recipient_id FROM notifications WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match owner {
            Some(_) => Err(AppError::Forbidden(
                "notification belongs to another recipient".into(),
            )),
            None => Err(AppError::NotFound(format!("notification {}", id))),
        }
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE recipient_id = $1 AND read = FALSE
            "#,
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn unread(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, kind, title, message, payload, read, created_at
            FROM notifications
            WHERE recipient_id = $1 AND read = FALSE
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_notification).collect())
    }

    async fn page(&self, recipient_id: Uuid, page: i64, limit: i64) -> Result<PagedNotifications> {
        let page = page.max(1);
        let offset = (page - 1) * limit;

        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, kind, title, message, payload, read, created_at
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM notifications WHERE recipient_id = $1"#)
                .bind(recipient_id)
                .fetch_one(&self.pool)
                .await?;

        let items: Vec<Notification> = rows.iter().map(map_notification).collect();
        let has_more = (offset + items.len() as i64) < total;

        Ok(PagedNotifications {
            items,
            total,
            has_more,
        })
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE recipient_id = $1 AND read = FALSE
            "#,
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let affected = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE read = TRUE AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }
}

#[async_trait]
impl FollowRepository for PgStore {
    async fn create_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO follows (follower_id, followee_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (follower_id, followee_id) DO NOTHING
            RETURNING follower_id
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            DELETE FROM follows
            WHERE follower_id = $1 AND followee_id = $2
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn follower_ids(&self, followee_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT follower_id FROM follows WHERE followee_id = $1"#)
                .bind(followee_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn follower_count(&self, followee_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM follows WHERE followee_id = $1"#)
                .bind(followee_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn followers_between(
        &self,
        followee_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM follows
            WHERE followee_id = $1 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(followee_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl AnalyticsRepository for PgStore {
    async fn upsert_daily(&self, aggregate: &DailyAggregate) -> Result<DailyAggregate> {
        let row = sqlx::query_as::<_, DailyAggregate>(
            r#"
            INSERT INTO daily_aggregates
                (user_id, date, new_followers, total_views,
                 stream_duration_seconds, peak_viewers, message_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, date) DO UPDATE SET
                new_followers = EXCLUDED.new_followers,
                total_views = EXCLUDED.total_views,
                stream_duration_seconds = EXCLUDED.stream_duration_seconds,
                peak_viewers = EXCLUDED.peak_viewers,
                message_count = EXCLUDED.message_count
            RETURNING user_id, date, new_followers, total_views,
                      stream_duration_seconds, peak_viewers, message_count
            "#,
        )
        .bind(aggregate.user_id)
        .bind(aggregate.date)
        .bind(aggregate.new_followers)
        .bind(aggregate.total_views)
        .bind(aggregate.stream_duration_seconds)
        .bind(aggregate.peak_viewers)
        .bind(aggregate.message_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn daily_series(&self, user_id: Uuid, from: NaiveDate) -> Result<Vec<DailyAggregate>> {
        let rows = sqlx::query_as::<_, DailyAggregate>(
            r#"
            SELECT user_id, date, new_followers, total_views,
                   stream_duration_seconds, peak_viewers, message_count
            FROM daily_aggregates
            WHERE user_id = $1 AND date >= $2
            ORDER BY date ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
