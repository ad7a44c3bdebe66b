/// Session tracking and metrics recording
///
/// Brackets one live period per channel for analytics. Opening is
/// guarded by the store's open-session uniqueness; closing seals the
/// record with duration and the average computed from samples inside
/// the session window.
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{MetricSample, StreamSession};
use crate::storage::{SessionRepository, Store};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Opens a session for the channel. `Conflict` when one is already
    /// open; the liveness transition treats that as already handled.
    pub async fn start_session(
        &self,
        channel_id: Uuid,
        title: Option<&str>,
    ) -> Result<StreamSession> {
        let session = self.store.create_session(channel_id, title).await?;
        debug!(%channel_id, session_id = %session.id, "session opened");
        Ok(session)
    }

    /// Seals a session: duration from the wall clock, average viewers
    /// from samples within [started_at, now], 0 when no samples exist.
    /// `NotFound` when the session is missing or already closed.
    pub async fn end_session(&self, session_id: Uuid) -> Result<StreamSession> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;

        if !session.is_open() {
            return Err(AppError::NotFound(format!(
                "session {} already closed",
                session_id
            )));
        }

        let now = Utc::now();
        let duration_seconds = (now - session.started_at).num_seconds().max(0);

        let samples = self
            .store
            .samples_between(session.channel_id, session.started_at, now)
            .await?;
        let average_viewers = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.viewer_count as f64).sum::<f64>() / samples.len() as f64
        };

        let sealed = self
            .store
            .close_session(session_id, now, duration_seconds, average_viewers)
            .await?;
        debug!(
            session_id = %session_id,
            duration_seconds,
            peak = sealed.peak_viewers,
            average = sealed.average_viewers,
            "session closed"
        );
        Ok(sealed)
    }

    /// Closes whatever session is open for the channel.
    pub async fn end_active_session(&self, channel_id: Uuid) -> Result<StreamSession> {
        let active = self
            .store
            .active_session(channel_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("open session for channel {}", channel_id)))?;
        self.end_session(active.id).await
    }

    pub async fn active_session(&self, channel_id: Uuid) -> Result<Option<StreamSession>> {
        self.store.active_session(channel_id).await
    }

    /// Appends a viewer-count sample and raises the open session's peak
    /// in the same logical operation (max-on-write in the store).
    pub async fn record_metric(&self, channel_id: Uuid, viewer_count: i32) -> Result<MetricSample> {
        let sample = self.store.insert_sample(channel_id, viewer_count).await?;
        self.store.raise_peak(channel_id, viewer_count).await?;
        Ok(sample)
    }

    /// Bumps the open session's chat-message counter, if one is open.
    pub async fn increment_messages(&self, channel_id: Uuid, count: i32) -> Result<()> {
        self.store.add_messages(channel_id, count).await
    }

    pub async fn session_history(
        &self,
        channel_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StreamSession>> {
        self.store.session_history(channel_id, limit).await
    }

    /// Samples recorded over the trailing window, oldest first.
    pub async fn realtime_metrics(
        &self,
        channel_id: Uuid,
        minutes: i64,
    ) -> Result<Vec<MetricSample>> {
        let now = Utc::now();
        self.store
            .samples_between(channel_id, now - Duration::minutes(minutes), now)
            .await
    }
}
