/// Wire-level tests: webhook validation, the pull API through the
/// connection client, and the push connection over a real socket.
mod common;

use std::time::Duration;

use broadcast_service::delivery::{PushFrame, StreamClient};
use broadcast_service::identity::USER_ID_HEADER;
use broadcast_service::storage::{ChannelRepository, FollowRepository, NotificationRepository};
use broadcast_service::models::NewNotification;
use common::{start_http, TestContext};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::timeout;
use uuid::Uuid;

#[actix_rt::test]
async fn test_webhook_rejects_malformed_input_without_crashing() {
    let ctx = TestContext::new();
    ctx.store
        .create_channel(Uuid::new_v4(), "alice", "Alice live")
        .await
        .unwrap();
    let (addr, server) = start_http(&ctx).await.unwrap();
    let base = format!("http://{}", addr);
    let http = reqwest::Client::new();

    // Unknown event kind.
    let resp = http
        .post(format!("{}/api/v1/ingest/webhook", base))
        .json(&serde_json::json!({ "event": "republish", "path": "live/alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Path without the live/ prefix.
    let resp = http
        .post(format!("{}/api/v1/ingest/webhook", base))
        .json(&serde_json::json!({ "event": "publish", "path": "vod/alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown channel.
    let resp = http
        .post(format!("{}/api/v1/ingest/webhook", base))
        .json(&serde_json::json!({ "event": "publish", "path": "live/nobody" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // The happy path still works after all of the above.
    let resp = http
        .post(format!("{}/api/v1/ingest/webhook", base))
        .json(&serde_json::json!({ "event": "publish", "path": "live/alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server.stop(true).await;
}

#[actix_rt::test]
async fn test_notification_routes_require_identity() {
    let ctx = TestContext::new();
    let (addr, server) = start_http(&ctx).await.unwrap();
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("http://{}/api/v1/notifications", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = http
        .get(format!("http://{}/api/v1/notifications", addr))
        .header(USER_ID_HEADER, "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    server.stop(true).await;
}

#[actix_rt::test]
async fn test_pull_api_through_connection_client() {
    let ctx = TestContext::new();
    let recipient = Uuid::new_v4();
    for name in ["a", "b", "c"] {
        ctx.store
            .create_notification(&NewNotification::follow(recipient, name))
            .await
            .unwrap();
    }

    let (addr, server) = start_http(&ctx).await.unwrap();
    let client = StreamClient::new(&format!("http://{}", addr), recipient);

    assert_eq!(client.unread_count().await.unwrap(), 3);

    let unread = client.unread().await.unwrap();
    assert_eq!(unread.len(), 3);

    client.mark_read(unread[0].id).await.unwrap();
    assert_eq!(client.unread_count().await.unwrap(), 2);

    let page = client.list(1, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);

    client.mark_all_read().await.unwrap();
    assert_eq!(client.unread_count().await.unwrap(), 0);

    server.stop(true).await;
}

#[actix_rt::test]
async fn test_push_connection_delivers_over_the_wire() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let follower = Uuid::new_v4();
    ctx.store
        .create_channel(owner, "alice", "Alice live")
        .await
        .unwrap();
    ctx.store.create_follow(follower, owner).await.unwrap();

    let (addr, server) = start_http(&ctx).await.unwrap();
    let base = format!("http://{}", addr);

    let client = StreamClient::new(&base, follower);
    let (tx, mut rx) = unbounded_channel();
    actix_rt::spawn(async move {
        let _ = client.stream_once(&tx).await;
    });

    let connected = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no frame before timeout")
        .expect("stream closed early");
    assert_eq!(connected, PushFrame::Connected);

    // A publish event fans out to the follower, who is connected.
    reqwest::Client::new()
        .post(format!("{}/api/v1/ingest/webhook", base))
        .json(&serde_json::json!({ "event": "publish", "path": "live/alice" }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut delivered = false;
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_secs(3), rx.recv()).await {
            Ok(Some(PushFrame::InstantNotification { data })) => {
                assert_eq!(data.recipient_id, follower);
                delivered = true;
                break;
            }
            Ok(Some(PushFrame::NewNotifications { data })) => {
                assert!(data.iter().any(|n| n.recipient_id == follower));
                delivered = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(delivered, "follower received a pushed notification");

    server.stop(true).await;
}
