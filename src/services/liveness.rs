/// Stream-liveness state machine
///
/// Consumes ingest-server events and probe results and decides
/// OFFLINE/LIVE transitions. The stored flag is the single source of
/// truth: every signal goes through the store's compare-and-set, so
/// duplicate and racing signals collapse to one transition and
/// re-delivery after the fact is a no-op.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{Channel, IngestEventKind, SweepReport, Transition};
use crate::services::fanout::FanoutService;
use crate::services::probe::ManifestProbe;
use crate::services::sessions::SessionService;
use crate::storage::{ChannelRepository, Store};

#[derive(Clone)]
pub struct LivenessService {
    store: Arc<dyn Store>,
    sessions: SessionService,
    fanout: FanoutService,
    probe: Arc<dyn ManifestProbe>,
}

impl LivenessService {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: SessionService,
        fanout: FanoutService,
        probe: Arc<dyn ManifestProbe>,
    ) -> Self {
        Self {
            store,
            sessions,
            fanout,
            probe,
        }
    }

    /// Resolves an ingest path (`live/{slug}` or `app/live/{slug}`) and
    /// feeds the event to the state machine. Malformed paths are a
    /// validation error; unknown channels are not found. Neither crashes
    /// the webhook.
    pub async fn handle_ingest_event(
        &self,
        event: IngestEventKind,
        path: &str,
    ) -> Result<Transition> {
        let channel = self.channel_for_path(path).await?;

        match event {
            IngestEventKind::Publish => self.apply(&channel, true).await,
            IngestEventKind::Unpublish => self.apply(&channel, false).await,
        }
    }

    /// Resolves an ingest path to its channel.
    pub async fn channel_for_path(&self, path: &str) -> Result<Channel> {
        let slug = parse_ingest_path(path)?;
        self.store
            .channel_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no channel for path {}", path)))
    }

    /// Probes one channel and applies whatever the probe says, in either
    /// direction. Returns the transition and the probed status.
    pub async fn check_channel(&self, slug: &str) -> Result<(Transition, bool)> {
        let channel = self
            .store
            .channel_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("channel {}", slug)))?;

        let status = self.probe.probe(slug).await;
        let transition = self.apply(&channel, status.live).await?;
        Ok((transition, status.live))
    }

    /// Re-probes every channel currently marked live and transitions the
    /// unreachable ones offline. Failures are isolated per channel; one
    /// bad channel never aborts the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let channels = match self.store.live_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(error = %err, "sweep could not list live channels");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport::default();
        for channel in channels {
            report.checked += 1;
            let status = self.probe.probe(&channel.slug).await;
            if status.live {
                continue;
            }
            match self.apply(&channel, false).await {
                Ok(Transition::WentOffline) => report.went_offline += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(slug = %channel.slug, error = %err, "sweep transition failed");
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                went_offline = report.went_offline,
                failed = report.failed,
                "liveness sweep finished"
            );
        }
        report
    }

    /// Channels currently marked live, for the status endpoint.
    pub async fn live_channels(&self) -> Result<Vec<Channel>> {
        self.store.live_channels().await
    }

    pub async fn channel_by_owner(&self, owner_id: uuid::Uuid) -> Result<Option<Channel>> {
        self.store.channel_by_owner(owner_id).await
    }

    /// The transition core. The compare-and-set against stored state
    /// makes this commutative with duplicate delivery: whichever signal
    /// loses the race observes no change and does nothing.
    async fn apply(&self, channel: &Channel, live: bool) -> Result<Transition> {
        let changed = self.store.set_live(channel.id, live).await?;
        if !changed {
            debug!(slug = %channel.slug, live, "signal matched stored state");
            return Ok(Transition::Unchanged);
        }

        if live {
            metrics::observe_live_transition("live");
            info!(slug = %channel.slug, "channel went live");

            match self
                .sessions
                .start_session(channel.id, Some(&channel.title))
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_benign() => {
                    debug!(slug = %channel.slug, error = %err, "session already open");
                }
                Err(err) => return Err(err),
            }

            if let Err(err) = self.fanout.stream_started(channel).await {
                warn!(slug = %channel.slug, error = %err, "stream-started fanout failed");
            }
            Ok(Transition::WentLive)
        } else {
            metrics::observe_live_transition("offline");
            info!(slug = %channel.slug, "channel went offline");

            match self.sessions.end_active_session(channel.id).await {
                Ok(_) => {}
                Err(err) if err.is_benign() => {
                    debug!(slug = %channel.slug, error = %err, "no open session to close");
                }
                Err(err) => return Err(err),
            }

            if let Err(err) = self.fanout.stream_ended(channel).await {
                warn!(slug = %channel.slug, error = %err, "stream-ended fanout failed");
            }
            Ok(Transition::WentOffline)
        }
    }
}

/// Extracts the channel slug from an ingest path. The ingest server
/// publishes under `live/{slug}` (sometimes prefixed, e.g.
/// `app/live/{slug}`).
pub fn parse_ingest_path(path: &str) -> Result<&str> {
    if !path.contains("live/") {
        return Err(AppError::Validation(format!(
            "ingest path must contain 'live/': {}",
            path
        )));
    }
    match path.rsplit('/').next() {
        Some(slug) if !slug.is_empty() => Ok(slug),
        _ => Err(AppError::Validation(format!(
            "ingest path has no slug: {}",
            path
        ))),
    }
}
