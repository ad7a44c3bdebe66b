/// Shared fixtures for the integration tests: an in-memory store, a
/// scriptable probe, the full service graph with fast tick intervals,
/// and a real HTTP server bound to an ephemeral port for tests that
/// exercise the wire.
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use async_trait::async_trait;
use tokio::sync::RwLock;

use broadcast_service::handlers::{
    analytics::register_routes as register_analytics, ingest::register_routes as register_ingest,
    notifications::register_routes as register_notifications,
    social::register_routes as register_social, streams::register_routes as register_streams,
};
use broadcast_service::services::{
    AnalyticsService, FanoutService, LiveStatus, LivenessService, ManifestProbe,
    NotificationService, SessionService, SocialService,
};
use broadcast_service::{DeliveryRegistry, MemoryStore, Store};

/// Probe whose answers are set by the test.
#[derive(Default)]
pub struct StubProbe {
    statuses: RwLock<HashMap<String, bool>>,
}

impl StubProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_live(&self, slug: &str, live: bool) {
        self.statuses.write().await.insert(slug.to_string(), live);
    }
}

#[async_trait]
impl ManifestProbe for StubProbe {
    async fn probe(&self, slug: &str) -> LiveStatus {
        let live = self
            .statuses
            .read()
            .await
            .get(slug)
            .copied()
            .unwrap_or(false);
        LiveStatus { live }
    }
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub probe: Arc<StubProbe>,
    pub registry: DeliveryRegistry,
    pub notifications: NotificationService,
    pub fanout: FanoutService,
    pub sessions: SessionService,
    pub liveness: LivenessService,
    pub analytics: AnalyticsService,
    pub social: SocialService,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn Store> = store.clone();
        let probe = Arc::new(StubProbe::new());

        let registry = DeliveryRegistry::new(store_dyn.clone(), Duration::from_millis(25), 50);
        let notifications = NotificationService::new(store_dyn.clone());
        let fanout = FanoutService::new(store_dyn.clone(), notifications.clone(), registry.clone());
        let sessions = SessionService::new(store_dyn.clone());
        let liveness = LivenessService::new(
            store_dyn.clone(),
            sessions.clone(),
            fanout.clone(),
            probe.clone(),
        );
        let analytics = AnalyticsService::new(store_dyn.clone());
        let social = SocialService::new(store_dyn, fanout.clone());

        Self {
            store,
            probe,
            registry,
            notifications,
            fanout,
            sessions,
            liveness,
            analytics,
            social,
        }
    }
}

/// Starts the full HTTP surface on an ephemeral local port.
pub async fn start_http(ctx: &TestContext) -> std::io::Result<(SocketAddr, ServerHandle)> {
    let liveness = ctx.liveness.clone();
    let sessions = ctx.sessions.clone();
    let analytics = ctx.analytics.clone();
    let notifications = ctx.notifications.clone();
    let social = ctx.social.clone();
    let registry = ctx.registry.clone();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(liveness.clone()))
            .app_data(web::Data::new(sessions.clone()))
            .app_data(web::Data::new(analytics.clone()))
            .app_data(web::Data::new(notifications.clone()))
            .app_data(web::Data::new(social.clone()))
            .app_data(web::Data::new(registry.clone()))
            .configure(|cfg| {
                register_ingest(cfg);
                register_streams(cfg);
                register_notifications(cfg);
                register_social(cfg);
                register_analytics(cfg);
            })
    })
    .workers(1)
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_rt::spawn(server);
    Ok((addr, handle))
}
