/// Session lifecycle and metrics: peak/average math, conflict and
/// idempotent-close behavior, and the daily rollup.
mod common;

use broadcast_service::error::AppError;
use broadcast_service::models::IngestEventKind;
use broadcast_service::storage::{ChannelRepository, FollowRepository};
use chrono::Utc;
use common::TestContext;
use uuid::Uuid;

#[tokio::test]
async fn test_peak_and_average_from_recorded_samples() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let channel = ctx
        .store
        .create_channel(owner, "alice", "Alice live")
        .await
        .unwrap();

    ctx.sessions
        .start_session(channel.id, Some("Alice live"))
        .await
        .unwrap();
    for viewers in [3, 7, 5, 9, 2] {
        ctx.sessions.record_metric(channel.id, viewers).await.unwrap();
    }

    let sealed = ctx.sessions.end_active_session(channel.id).await.unwrap();
    assert_eq!(sealed.peak_viewers, 9);
    assert!((sealed.average_viewers - 5.2).abs() < 1e-9);
    assert!(sealed.duration_seconds.unwrap() >= 0);
    assert!(sealed.ended_at.is_some());
}

#[tokio::test]
async fn test_average_defaults_to_zero_without_samples() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();

    let session = ctx.sessions.start_session(channel.id, None).await.unwrap();
    let sealed = ctx.sessions.end_session(session.id).await.unwrap();
    assert_eq!(sealed.average_viewers, 0.0);
    assert_eq!(sealed.peak_viewers, 0);
}

#[tokio::test]
async fn test_second_open_conflicts_and_second_close_is_not_found() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();

    let session = ctx.sessions.start_session(channel.id, None).await.unwrap();
    let err = ctx
        .sessions
        .start_session(channel.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    ctx.sessions.end_session(session.id).await.unwrap();
    let err = ctx.sessions.end_session(session.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(err.is_benign());
}

#[tokio::test]
async fn test_peak_update_is_max_on_write() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();
    ctx.sessions.start_session(channel.id, None).await.unwrap();

    ctx.sessions.record_metric(channel.id, 20).await.unwrap();
    // A lower sample must not regress the peak.
    ctx.sessions.record_metric(channel.id, 4).await.unwrap();

    let session = ctx.sessions.active_session(channel.id).await.unwrap().unwrap();
    assert_eq!(session.peak_viewers, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_metric_recording_keeps_the_max() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();
    ctx.sessions.start_session(channel.id, None).await.unwrap();

    let mut tasks = Vec::new();
    for viewers in [11, 42, 7, 29, 35, 3] {
        let sessions = ctx.sessions.clone();
        tasks.push(tokio::spawn(async move {
            sessions.record_metric(channel.id, viewers).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let session = ctx.sessions.active_session(channel.id).await.unwrap().unwrap();
    assert_eq!(session.peak_viewers, 42);
}

#[tokio::test]
async fn test_message_counter_only_touches_the_open_session() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();

    // No open session: a no-op, not an error.
    ctx.sessions.increment_messages(channel.id, 3).await.unwrap();

    ctx.sessions.start_session(channel.id, None).await.unwrap();
    ctx.sessions.increment_messages(channel.id, 2).await.unwrap();
    ctx.sessions.increment_messages(channel.id, 1).await.unwrap();

    let sealed = ctx.sessions.end_active_session(channel.id).await.unwrap();
    assert_eq!(sealed.message_count, 3);
}

#[tokio::test]
async fn test_metric_samples_append_even_between_sessions() {
    let ctx = TestContext::new();
    let channel = ctx
        .store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();

    ctx.sessions.record_metric(channel.id, 12).await.unwrap();
    let recent = ctx.sessions.realtime_metrics(channel.id, 5).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].viewer_count, 12);
}

#[tokio::test]
async fn test_daily_aggregate_is_idempotent() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let follower = Uuid::new_v4();
    ctx.store.create_channel(owner, "alice", "Alice live").await.unwrap();
    ctx.store.create_follow(follower, owner).await.unwrap();

    ctx.liveness
        .handle_ingest_event(IngestEventKind::Publish, "live/alice")
        .await
        .unwrap();
    let channel = ctx.store.channel_by_slug("alice").await.unwrap().unwrap();
    for viewers in [10, 20] {
        ctx.sessions.record_metric(channel.id, viewers).await.unwrap();
    }
    ctx.sessions.increment_messages(channel.id, 5).await.unwrap();
    ctx.liveness
        .handle_ingest_event(IngestEventKind::Unpublish, "live/alice")
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let first = ctx
        .analytics
        .aggregate_daily(owner, today)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.new_followers, 1);
    assert_eq!(first.total_views, 30);
    assert_eq!(first.peak_viewers, 20);
    assert_eq!(first.message_count, 5);

    // Re-running the same day overwrites, never accumulates.
    let second = ctx
        .analytics
        .aggregate_daily(owner, today)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.new_followers, first.new_followers);
    assert_eq!(second.total_views, first.total_views);

    let series = ctx.analytics.history(owner, 7).await.unwrap();
    assert_eq!(series.len(), 1);
}

#[tokio::test]
async fn test_daily_aggregate_without_channel_is_none() {
    let ctx = TestContext::new();
    let result = ctx
        .analytics
        .aggregate_daily(Uuid::new_v4(), Utc::now().date_naive())
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_overview_reflects_follower_and_session_state() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    ctx.store.create_channel(owner, "alice", "Alice live").await.unwrap();
    for _ in 0..3 {
        ctx.store.create_follow(Uuid::new_v4(), owner).await.unwrap();
    }

    ctx.liveness
        .handle_ingest_event(IngestEventKind::Publish, "live/alice")
        .await
        .unwrap();
    let channel = ctx.store.channel_by_slug("alice").await.unwrap().unwrap();
    ctx.sessions.record_metric(channel.id, 17).await.unwrap();

    let live_overview = ctx.analytics.overview(owner).await.unwrap();
    assert_eq!(live_overview.total_followers, 3);
    assert!(live_overview.is_live);
    assert_eq!(live_overview.current_viewers, 17);
    assert_eq!(live_overview.sessions_this_month, 1);

    ctx.liveness
        .handle_ingest_event(IngestEventKind::Unpublish, "live/alice")
        .await
        .unwrap();

    let offline_overview = ctx.analytics.overview(owner).await.unwrap();
    assert!(!offline_overview.is_live);
    assert_eq!(offline_overview.current_viewers, 0);
}
