/// Notification endpoints
///
/// Pull-based list/read operations plus the long-lived push connection.
/// The push connection is server-sent events: each frame is one
/// `data: {json}` event.
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{web, HttpResponse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::delivery::{DeliveryRegistry, PushFrame, SubscriberId};
use crate::error::Result;
use crate::handlers::ApiResponse;
use crate::identity::Identity;
use crate::models::UnreadCount;
use crate::services::NotificationService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadQuery {
    #[serde(default = "default_unread_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

fn default_unread_limit() -> i64 {
    50
}

/// GET /api/v1/notifications
pub async fn list(
    identity: Identity,
    service: web::Data<NotificationService>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse> {
    let page = service
        .list_all(identity.0, query.page, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

/// GET /api/v1/notifications/unread
pub async fn unread(
    identity: Identity,
    service: web::Data<NotificationService>,
    query: web::Query<UnreadQuery>,
) -> Result<HttpResponse> {
    let items = service.unread(identity.0, query.limit).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(items)))
}

/// GET /api/v1/notifications/unread/count
pub async fn unread_count(
    identity: Identity,
    service: web::Data<NotificationService>,
) -> Result<HttpResponse> {
    let count = service.unread_count(identity.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(UnreadCount { count })))
}

/// PATCH /api/v1/notifications/{id}/read
pub async fn mark_read(
    identity: Identity,
    service: web::Data<NotificationService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    service.mark_read(path.into_inner(), identity.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "read": true }))))
}

/// POST /api/v1/notifications/read-all
pub async fn mark_all_read(
    identity: Identity,
    service: web::Data<NotificationService>,
) -> Result<HttpResponse> {
    let flipped = service.mark_all_read(identity.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "marked": flipped }))))
}

/// GET /api/v1/notifications/stream
///
/// Registers a push connection and streams frames until the client goes
/// away. Dropping the response body runs the same deregistration path
/// as a broken push.
pub async fn stream(
    identity: Identity,
    registry: web::Data<DeliveryRegistry>,
) -> Result<HttpResponse> {
    let (id, rx) = registry.register(identity.0).await;
    let body = SseConnection::new(identity.0, id, registry.get_ref().clone(), rx);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache, no-transform"))
        .streaming(body))
}

/// Streaming body adapter: frames in, SSE bytes out. Deregisters the
/// connection when dropped, which covers explicit client cancellation
/// (navigation away, closed tab).
struct SseConnection {
    recipient: Uuid,
    id: SubscriberId,
    registry: DeliveryRegistry,
    frames: UnboundedReceiverStream<PushFrame>,
}

impl SseConnection {
    fn new(
        recipient: Uuid,
        id: SubscriberId,
        registry: DeliveryRegistry,
        rx: tokio::sync::mpsc::UnboundedReceiver<PushFrame>,
    ) -> Self {
        Self {
            recipient,
            id,
            registry,
            frames: UnboundedReceiverStream::new(rx),
        }
    }
}

impl Stream for SseConnection {
    type Item = std::result::Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.frames).poll_next(cx) {
            Poll::Ready(Some(frame)) => match frame.to_json() {
                Ok(json) => Poll::Ready(Some(Ok(web::Bytes::from(format!(
                    "data: {}\n\n",
                    json
                ))))),
                Err(err) => {
                    warn!(error = %err, "dropping unserializable frame");
                    // Keep the connection alive; skip the frame.
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let recipient = self.recipient;
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.deregister(recipient, id).await;
            });
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/notifications")
            .route("", web::get().to(list))
            .route("/unread", web::get().to(unread))
            .route("/unread/count", web::get().to(unread_count))
            .route("/read-all", web::post().to(mark_all_read))
            .route("/stream", web::get().to(stream))
            .route("/{id}/read", web::patch().to(mark_read)),
    );
}
