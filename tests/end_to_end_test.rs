/// Full live-cycle scenario: publish, metrics, unpublish, with two
/// followers receiving exactly one stream-started and one stream-ended
/// notification each and the session sealing with the right aggregates.
mod common;

use broadcast_service::models::{IngestEventKind, NotificationKind, Transition};
use broadcast_service::storage::{ChannelRepository, FollowRepository, SessionRepository};
use common::TestContext;
use uuid::Uuid;

#[tokio::test]
async fn test_full_live_cycle() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let f1 = Uuid::new_v4();
    let f2 = Uuid::new_v4();

    ctx.store
        .create_channel(owner, "alice", "Speedrun Sunday")
        .await
        .unwrap();
    ctx.store.create_follow(f1, owner).await.unwrap();
    ctx.store.create_follow(f2, owner).await.unwrap();

    // OFFLINE -> LIVE
    let transition = ctx
        .liveness
        .handle_ingest_event(IngestEventKind::Publish, "live/alice")
        .await
        .unwrap();
    assert_eq!(transition, Transition::WentLive);

    let channel = ctx.store.channel_by_slug("alice").await.unwrap().unwrap();
    assert!(channel.is_live);
    let open = ctx.store.active_session(channel.id).await.unwrap().unwrap();
    assert_eq!(open.title.as_deref(), Some("Speedrun Sunday"));

    for follower in [f1, f2] {
        let unread = ctx.notifications.unread(follower, 10).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::StreamStarted);
        assert_eq!(unread[0].title, "alice is live!");
    }

    // Viewer samples while live.
    for viewers in [10, 15, 8] {
        ctx.sessions.record_metric(channel.id, viewers).await.unwrap();
    }

    // LIVE -> OFFLINE
    let transition = ctx
        .liveness
        .handle_ingest_event(IngestEventKind::Unpublish, "live/alice")
        .await
        .unwrap();
    assert_eq!(transition, Transition::WentOffline);

    let channel = ctx.store.channel_by_slug("alice").await.unwrap().unwrap();
    assert!(!channel.is_live);

    let history = ctx.store.session_history(channel.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let sealed = &history[0];
    assert!(sealed.ended_at.is_some());
    assert_eq!(sealed.peak_viewers, 15);
    assert!((sealed.average_viewers - 11.0).abs() < 1e-9);
    assert!(sealed.duration_seconds.unwrap() >= 0);

    // Two notifications per follower over the whole cycle.
    for follower in [f1, f2] {
        let page = ctx.notifications.list_all(follower, 1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        let kinds: Vec<NotificationKind> = page.items.iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NotificationKind::StreamStarted));
        assert!(kinds.contains(&NotificationKind::StreamEnded));
    }
}
