/// Analytics rollups and dashboard reads
///
/// Everything here is off the real-time path: the daily aggregation
/// batch job and the read models the dashboard renders.
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{DailyAggregate, Overview};
use crate::storage::{
    AnalyticsRepository, ChannelRepository, FollowRepository, SessionRepository, Store,
};

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn Store>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recomputes one day's rollup for a broadcaster and upserts it.
    /// Idempotent: re-running a day overwrites the previous rollup.
    /// Returns None for users without a channel.
    pub async fn aggregate_daily(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyAggregate>> {
        let Some(channel) = self.store.channel_by_owner(user_id).await? else {
            return Ok(None);
        };

        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);

        let sessions = self
            .store
            .sessions_between(channel.id, day_start, day_end)
            .await?;
        let stream_duration_seconds = sessions
            .iter()
            .filter_map(|s| s.duration_seconds)
            .sum::<i64>();
        let peak_viewers = sessions.iter().map(|s| s.peak_viewers).max().unwrap_or(0);
        let message_count = sessions.iter().map(|s| s.message_count as i64).sum::<i64>();

        let new_followers = self
            .store
            .followers_between(user_id, day_start, day_end)
            .await?;

        let samples = self
            .store
            .samples_between(channel.id, day_start, day_end)
            .await?;
        let total_views = samples.iter().map(|s| s.viewer_count as i64).sum::<i64>();

        let aggregate = self
            .store
            .upsert_daily(&DailyAggregate {
                user_id,
                date,
                new_followers,
                total_views,
                stream_duration_seconds,
                peak_viewers,
                message_count,
            })
            .await?;

        info!(%user_id, %date, "daily aggregate updated");
        Ok(Some(aggregate))
    }

    /// Dashboard header: follower totals and growth, liveness, and this
    /// month's streaming volume.
    pub async fn overview(&self, user_id: Uuid) -> Result<Overview> {
        let channel = self
            .store
            .channel_by_owner(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("channel for user {}", user_id)))?;

        let now = Utc::now();
        let total_followers = self.store.follower_count(user_id).await?;

        let thirty_days_ago = now - Duration::days(30);
        let sixty_days_ago = now - Duration::days(60);
        let recent = self
            .store
            .followers_between(user_id, thirty_days_ago, now)
            .await?;
        let previous = self
            .store
            .followers_between(user_id, sixty_days_ago, thirty_days_ago)
            .await?;
        let follower_growth = if previous > 0 {
            (recent - previous) as f64 / previous as f64 * 100.0
        } else {
            0.0
        };

        let month_start = now
            .date_naive()
            .with_day(1)
            .unwrap_or_else(|| now.date_naive())
            .and_time(NaiveTime::MIN)
            .and_utc();
        let month_sessions = self
            .store
            .sessions_between(channel.id, month_start, now)
            .await?;
        let sessions_this_month = month_sessions.len() as i64;
        let total_stream_duration_seconds = month_sessions
            .iter()
            .filter_map(|s| s.duration_seconds)
            .sum::<i64>();

        let current_viewers = if self.store.active_session(channel.id).await?.is_some() {
            self.store
                .latest_sample(channel.id)
                .await?
                .map(|s| s.viewer_count)
                .unwrap_or(0)
        } else {
            0
        };

        Ok(Overview {
            total_followers,
            follower_growth,
            current_viewers,
            is_live: channel.is_live,
            sessions_this_month,
            total_stream_duration_seconds,
        })
    }

    /// Daily aggregate series for the trailing `days`.
    pub async fn history(&self, user_id: Uuid, days: i64) -> Result<Vec<DailyAggregate>> {
        let from = (Utc::now() - Duration::days(days)).date_naive();
        self.store.daily_series(user_id, from).await
    }
}
