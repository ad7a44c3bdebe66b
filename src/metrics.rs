use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, TextEncoder};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "broadcast_service_http_requests_total",
            "Total HTTP requests handled by broadcast-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create broadcast_service_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register broadcast_service_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "broadcast_service_http_request_duration_seconds",
            "HTTP request latency for broadcast-service",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "path", "status"],
    )
    .expect("failed to create broadcast_service_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register broadcast_service_http_request_duration_seconds");
    histogram
});

static LIVE_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "broadcast_service_live_transitions_total",
            "Accepted liveness transitions by direction",
        ),
        &["direction"],
    )
    .expect("failed to create broadcast_service_live_transitions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register broadcast_service_live_transitions_total");
    counter
});

static NOTIFICATIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "broadcast_service_notifications_created_total",
            "Notifications written, by kind",
        ),
        &["kind"],
    )
    .expect("failed to create broadcast_service_notifications_created_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register broadcast_service_notifications_created_total");
    counter
});

static PUSH_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "broadcast_service_push_frames_total",
            "Frames pushed to connected clients, by frame type",
        ),
        &["frame"],
    )
    .expect("failed to create broadcast_service_push_frames_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register broadcast_service_push_frames_total");
    counter
});

static FANOUT_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "broadcast_service_fanout_failures_total",
        "Per-recipient create failures inside fanout batches",
    )
    .expect("failed to create broadcast_service_fanout_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register broadcast_service_fanout_failures_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn observe_live_transition(direction: &str) {
    LIVE_TRANSITIONS_TOTAL.with_label_values(&[direction]).inc();
}

pub fn observe_notification_created(kind: &str) {
    NOTIFICATIONS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_push_frame(frame: &str) {
    PUSH_FRAMES_TOTAL.with_label_values(&[frame]).inc();
}

pub fn observe_fanout_failure() {
    FANOUT_FAILURES_TOTAL.inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req.path().to_string();
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
