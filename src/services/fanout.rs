/// Notification fan-out
///
/// Turns one liveness transition into one stored notification per
/// follower. Creates run with all-settled semantics: a single
/// recipient's failure is logged and counted, never raised for the
/// batch.
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery::DeliveryRegistry;
use crate::error::Result;
use crate::metrics;
use crate::models::{Channel, FanoutReport, NewNotification, Notification};
use crate::services::notifications::NotificationService;
use crate::storage::{FollowRepository, Store};

#[derive(Clone)]
pub struct FanoutService {
    store: Arc<dyn Store>,
    notifications: NotificationService,
    registry: DeliveryRegistry,
}

impl FanoutService {
    pub fn new(
        store: Arc<dyn Store>,
        notifications: NotificationService,
        registry: DeliveryRegistry,
    ) -> Self {
        Self {
            store,
            notifications,
            registry,
        }
    }

    /// Writes one notification per follower of `host_user_id`, built by
    /// `build`. Per-recipient failures are isolated; only the follower
    /// resolution itself can fail the call.
    pub async fn notify_followers<F>(&self, host_user_id: Uuid, build: F) -> Result<FanoutReport>
    where
        F: Fn(Uuid) -> NewNotification,
    {
        let followers = self.store.follower_ids(host_user_id).await?;

        let creates = followers.iter().map(|&follower| {
            let new = build(follower);
            async move { self.notifications.create(&new).await }
        });
        let results = join_all(creates).await;

        let mut report = FanoutReport::default();
        for result in results {
            match result {
                Ok(notification) => {
                    report.delivered += 1;
                    // Instant push for recipients with an open connection;
                    // the tick path remains the guarantee of record.
                    self.registry.offer(&notification).await;
                }
                Err(err) => {
                    report.failed += 1;
                    metrics::observe_fanout_failure();
                    warn!(error = %err, "fanout create failed for one recipient");
                }
            }
        }

        info!(
            host = %host_user_id,
            delivered = report.delivered,
            failed = report.failed,
            "fanout batch finished"
        );
        Ok(report)
    }

    pub async fn stream_started(&self, channel: &Channel) -> Result<FanoutReport> {
        self.notify_followers(channel.owner_id, |follower| {
            NewNotification::stream_started(follower, &channel.slug, &channel.title)
        })
        .await
    }

    pub async fn stream_ended(&self, channel: &Channel) -> Result<FanoutReport> {
        self.notify_followers(channel.owner_id, |follower| {
            NewNotification::stream_ended(follower, &channel.slug)
        })
        .await
    }

    /// Single-recipient write plus the instant-push offer, used by the
    /// direct notification paths (follow, mention).
    pub async fn notify_one(&self, new: NewNotification) -> Result<Notification> {
        let notification = self.notifications.create(&new).await?;
        self.registry.offer(&notification).await;
        Ok(notification)
    }
}
