/// Follow relationships
///
/// Idempotent follow/unfollow plus the follow notification the followee
/// receives. Notification failure never undoes the follow.
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::NewNotification;
use crate::services::fanout::FanoutService;
use crate::storage::{FollowRepository, Store};

#[derive(Clone)]
pub struct SocialService {
    store: Arc<dyn Store>,
    fanout: FanoutService,
}

impl SocialService {
    pub fn new(store: Arc<dyn Store>, fanout: FanoutService) -> Self {
        Self { store, fanout }
    }

    /// Creates the follow edge; true iff it was new. A new edge also
    /// notifies the followee.
    pub async fn follow(
        &self,
        follower_id: Uuid,
        followee_id: Uuid,
        follower_name: &str,
    ) -> Result<bool> {
        if follower_id == followee_id {
            return Err(AppError::Validation("cannot follow yourself".into()));
        }

        let created = self.store.create_follow(follower_id, followee_id).await?;
        if created {
            if let Err(err) = self
                .fanout
                .notify_one(NewNotification::follow(followee_id, follower_name))
                .await
            {
                warn!(error = %err, "follow notification failed");
            }
        }
        Ok(created)
    }

    /// Removes the follow edge; true iff one existed.
    pub async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        self.store.delete_follow(follower_id, followee_id).await
    }

    /// Mention notification for a chat callout, delivered through the
    /// same store-then-offer path as everything else.
    pub async fn record_mention(
        &self,
        recipient_id: Uuid,
        mentioner_name: &str,
        message: &str,
    ) -> Result<()> {
        self.fanout
            .notify_one(NewNotification::mention(
                recipient_id,
                mentioner_name,
                message,
            ))
            .await?;
        Ok(())
    }
}
