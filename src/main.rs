use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcast_service::handlers::{
    analytics::register_routes as register_analytics, ingest::register_routes as register_ingest,
    notifications::register_routes as register_notifications,
    social::register_routes as register_social, streams::register_routes as register_streams,
};
use broadcast_service::metrics;
use broadcast_service::services::{
    AnalyticsService, FanoutService, HttpManifestProbe, LivenessService, ManifestProbe,
    NotificationService, SessionService, SocialService,
};
use broadcast_service::{Config, DeliveryRegistry, PgStore, Store};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting broadcast service");

    let config = Config::from_env()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

    let pool = match PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => {
            tracing::info!("Successfully connected to database");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "database connection failed",
            ));
        }
    };

    if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!("Migration failed: {}", err);
        return Err(io::Error::new(io::ErrorKind::Other, "migration failed"));
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let registry = DeliveryRegistry::new(
        store.clone(),
        Duration::from_millis(config.delivery.push_interval_ms),
        config.delivery.snapshot_limit,
    );
    let notifications = NotificationService::new(store.clone());
    let fanout = FanoutService::new(store.clone(), notifications.clone(), registry.clone());
    let sessions = SessionService::new(store.clone());
    let probe: Arc<dyn ManifestProbe> = Arc::new(HttpManifestProbe::new(
        &config.ingest.hls_base_url,
        Duration::from_millis(config.ingest.probe_timeout_ms),
    ));
    let liveness = LivenessService::new(store.clone(), sessions.clone(), fanout.clone(), probe);
    let analytics = AnalyticsService::new(store.clone());
    let social = SocialService::new(store.clone(), fanout.clone());

    // Periodic sweep over channels marked live. The task owns its
    // ticker; the probe carries its own per-candidate timeout, so one
    // hung channel cannot stall the schedule indefinitely.
    let sweep_liveness = liveness.clone();
    let sweep_interval = Duration::from_secs(config.ingest.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_liveness.sweep().await;
        }
    });

    // Daily retention sweep for read notifications.
    let purge_notifications = notifications.clone();
    let retention_days = config.delivery.retention_days;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = purge_notifications
                .purge_read_older_than(retention_days)
                .await
            {
                tracing::warn!("Notification retention sweep failed: {}", err);
            }
        }
    });

    let addr = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(liveness.clone()))
            .app_data(web::Data::new(sessions.clone()))
            .app_data(web::Data::new(analytics.clone()))
            .app_data(web::Data::new(notifications.clone()))
            .app_data(web::Data::new(social.clone()))
            .app_data(web::Data::new(registry.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(|cfg| {
                register_ingest(cfg);
                register_streams(cfg);
                register_notifications(cfg);
                register_social(cfg);
                register_analytics(cfg);
            })
    })
    .bind(&addr)?
    .run()
    .await
}
