/// Ingest-server callbacks
///
/// The media ingest server reports publish/unpublish events and the
/// real-time layer reports participant counts and chat activity. All of
/// it arrives as plain JSON callbacks.
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::handlers::ApiResponse;
use crate::models::IngestEventKind;
use crate::services::{LivenessService, SessionService};

/// Event body the ingest server posts, e.g.
/// `{"event": "publish", "path": "live/alice"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestWebhook {
    pub event: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantCountEvent {
    pub path: String,
    pub participant_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatActivityEvent {
    pub path: String,
    #[serde(default = "one")]
    pub count: i32,
}

fn one() -> i32 {
    1
}

/// POST /api/v1/ingest/webhook
pub async fn webhook(
    liveness: web::Data<LivenessService>,
    body: web::Json<IngestWebhook>,
) -> Result<HttpResponse> {
    let event = IngestEventKind::parse(&body.event)
        .ok_or_else(|| AppError::Validation(format!("unknown ingest event: {}", body.event)))?;

    let transition = liveness.handle_ingest_event(event, &body.path).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "transition": transition,
    }))))
}

/// POST /api/v1/ingest/participants
pub async fn participants(
    liveness: web::Data<LivenessService>,
    sessions: web::Data<SessionService>,
    body: web::Json<ParticipantCountEvent>,
) -> Result<HttpResponse> {
    if body.participant_count < 0 {
        return Err(AppError::Validation(
            "participant_count cannot be negative".into(),
        ));
    }

    let channel = liveness.channel_for_path(&body.path).await?;
    let sample = sessions
        .record_metric(channel.id, body.participant_count)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(sample)))
}

/// POST /api/v1/ingest/messages
pub async fn chat_activity(
    liveness: web::Data<LivenessService>,
    sessions: web::Data<SessionService>,
    body: web::Json<ChatActivityEvent>,
) -> Result<HttpResponse> {
    if body.count <= 0 {
        return Err(AppError::Validation("count must be positive".into()));
    }

    let channel = liveness.channel_for_path(&body.path).await?;
    sessions.increment_messages(channel.id, body.count).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "recorded": true }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/ingest")
            .route("/webhook", web::post().to(webhook))
            .route("/participants", web::post().to(participants))
            .route("/messages", web::post().to(chat_activity)),
    );
}
