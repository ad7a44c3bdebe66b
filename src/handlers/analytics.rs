/// Analytics endpoints for the broadcaster dashboard.
use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::handlers::ApiResponse;
use crate::identity::Identity;
use crate::services::{AnalyticsService, LivenessService, SessionService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_sessions_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeQuery {
    #[serde(default = "default_minutes")]
    pub minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub date: NaiveDate,
}

fn default_days() -> i64 {
    7
}

fn default_sessions_limit() -> i64 {
    10
}

fn default_minutes() -> i64 {
    60
}

/// GET /api/v1/analytics/overview
pub async fn overview(
    identity: Identity,
    analytics: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let overview = analytics.overview(identity.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(overview)))
}

/// GET /api/v1/analytics/history
pub async fn history(
    identity: Identity,
    analytics: web::Data<AnalyticsService>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let series = analytics.history(identity.0, query.days).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(series)))
}

/// GET /api/v1/analytics/sessions
pub async fn sessions(
    identity: Identity,
    liveness: web::Data<LivenessService>,
    session_service: web::Data<SessionService>,
    query: web::Query<SessionsQuery>,
) -> Result<HttpResponse> {
    let channel = channel_for(&liveness, identity).await?;
    let history = session_service
        .session_history(channel.id, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(history)))
}

/// GET /api/v1/analytics/realtime
pub async fn realtime(
    identity: Identity,
    liveness: web::Data<LivenessService>,
    session_service: web::Data<SessionService>,
    query: web::Query<RealtimeQuery>,
) -> Result<HttpResponse> {
    let channel = channel_for(&liveness, identity).await?;
    let samples = session_service
        .realtime_metrics(channel.id, query.minutes)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(samples)))
}

/// POST /api/v1/analytics/aggregate
///
/// Batch rollup trigger, normally fired by a scheduler.
pub async fn aggregate(
    identity: Identity,
    analytics: web::Data<AnalyticsService>,
    body: web::Json<AggregateRequest>,
) -> Result<HttpResponse> {
    let aggregate = analytics
        .aggregate_daily(identity.0, body.date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("channel for user {}", identity.0)))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(aggregate)))
}

async fn channel_for(
    liveness: &web::Data<LivenessService>,
    identity: Identity,
) -> Result<crate::models::Channel> {
    liveness
        .channel_by_owner(identity.0)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("channel for user {}", identity.0)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/analytics")
            .route("/overview", web::get().to(overview))
            .route("/history", web::get().to(history))
            .route("/sessions", web::get().to(sessions))
            .route("/realtime", web::get().to(realtime))
            .route("/aggregate", web::post().to(aggregate)),
    );
}
