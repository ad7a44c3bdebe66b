/// Stream status endpoints: the scheduled sweep trigger, the one-shot
/// probe-and-apply check, and the live-status map the browse surface
/// polls.
use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::handlers::ApiResponse;
use crate::services::LivenessService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub slug: String,
}

/// POST /api/v1/streams/sweep
///
/// Re-probes every channel currently marked live.
pub async fn sweep(liveness: web::Data<LivenessService>) -> Result<HttpResponse> {
    let report = liveness.sweep().await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(report)))
}

/// POST /api/v1/streams/check
///
/// Probes one channel and applies the result in either direction.
pub async fn check(
    liveness: web::Data<LivenessService>,
    body: web::Json<CheckRequest>,
) -> Result<HttpResponse> {
    let (transition, is_live) = liveness.check_channel(&body.slug).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "slug": body.slug,
        "is_live": is_live,
        "transition": transition,
    }))))
}

/// GET /api/v1/streams/live
///
/// Map of broadcaster user id -> true for every channel marked live.
pub async fn live_status(liveness: web::Data<LivenessService>) -> Result<HttpResponse> {
    let channels = liveness.live_channels().await?;
    let live_status: HashMap<Uuid, bool> =
        channels.into_iter().map(|c| (c.owner_id, true)).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "live_status": live_status,
    }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/streams")
            .route("/sweep", web::post().to(sweep))
            .route("/check", web::post().to(check))
            .route("/live", web::get().to(live_status)),
    );
}
