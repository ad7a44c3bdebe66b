/// Follow/unfollow and chat-mention callbacks.
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::handlers::ApiResponse;
use crate::identity::Identity;
use crate::services::SocialService;

/// Display name comes from the presentation layer; identity resolution
/// only supplies the caller's id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionRequest {
    pub recipient_id: Uuid,
    pub mentioner_username: String,
    pub message: String,
}

/// POST /api/v1/follows/{followee_id}
pub async fn follow(
    identity: Identity,
    social: web::Data<SocialService>,
    path: web::Path<Uuid>,
    body: Option<web::Json<FollowRequest>>,
) -> Result<HttpResponse> {
    let followee_id = path.into_inner();
    let follower_name = body
        .as_ref()
        .and_then(|b| b.username.clone())
        .unwrap_or_else(|| identity.0.to_string());

    let created = social.follow(identity.0, followee_id, &follower_name).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "following": true,
        "created": created,
    }))))
}

/// DELETE /api/v1/follows/{followee_id}
pub async fn unfollow(
    identity: Identity,
    social: web::Data<SocialService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let followee_id = path.into_inner();
    let removed = social.unfollow(identity.0, followee_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "following": false,
        "removed": removed,
    }))))
}

/// POST /api/v1/mentions, the chat layer's callback for a mention.
pub async fn mention(
    social: web::Data<SocialService>,
    body: web::Json<MentionRequest>,
) -> Result<HttpResponse> {
    social
        .record_mention(body.recipient_id, &body.mentioner_username, &body.message)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "recorded": true }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/follows")
            .route("/{followee_id}", web::post().to(follow))
            .route("/{followee_id}", web::delete().to(unfollow)),
    );
    cfg.route("/api/v1/mentions", web::post().to(mention));
}
