/// Notification store operations
///
/// Thin service over the notification repository; the only writes are
/// create and the idempotent read-flag flips.
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics;
use crate::models::{NewNotification, Notification, PagedNotifications};
use crate::storage::{NotificationRepository, Store};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn Store>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new: &NewNotification) -> Result<Notification> {
        let notification = self.store.create_notification(new).await?;
        metrics::observe_notification_created(notification.kind.as_str());
        info!(
            recipient = %notification.recipient_id,
            kind = notification.kind.as_str(),
            "notification created"
        );
        Ok(notification)
    }

    /// Idempotent: marking an already-read notification succeeds.
    pub async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<()> {
        self.store.mark_read(id, recipient_id).await
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        self.store.mark_all_read(recipient_id).await
    }

    pub async fn unread(&self, recipient_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        self.store.unread(recipient_id, limit).await
    }

    pub async fn list_all(
        &self,
        recipient_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<PagedNotifications> {
        self.store.page(recipient_id, page, limit).await
    }

    pub async fn unread_count(&self, recipient_id: Uuid) -> Result<i64> {
        self.store.unread_count(recipient_id).await
    }

    /// Retention sweep: drops read notifications older than `days`.
    pub async fn purge_read_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let purged = self.store.purge_read_older_than(cutoff).await?;
        if purged > 0 {
            info!(purged, days, "purged old read notifications");
        }
        Ok(purged)
    }
}
