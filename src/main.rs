use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulsefeed::app_state::AppState;
use pulsefeed::config::Config;
use pulsefeed::db::{PostRepo, ProfileRepo, StatsRepo};
use pulsefeed::events::{
    score_aggregator::{start_hourly_flush, start_score_consumer},
    stats_consumer::start_stats_consumer,
    EventProducer, ScoreAggregator,
};
use pulsefeed::handlers;
use pulsefeed::jobs;
use pulsefeed::services::{
    CreatorService, FeedService, InterestService, PostMetricsService, SessionLifecycle,
};
use pulsefeed::session::{SessionLocks, SessionStore};

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env().expect("Failed to load configuration"));
    info!("Starting pulsefeed v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.env);

    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let sessions = SessionStore::connect(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");
    let locks = SessionLocks::new();

    let profiles = Arc::new(ProfileRepo::new(db_pool.clone()));
    let posts = Arc::new(PostRepo::new(db_pool.clone()));
    let stats = Arc::new(StatsRepo::new(db_pool.clone()));

    let engagement_producer = Arc::new(
        EventProducer::new(
            &config.kafka.bootstrap_servers,
            config.kafka.engagement_topic.clone(),
        )
        .expect("Failed to create engagement producer"),
    );
    let score_producer = Arc::new(
        EventProducer::new(
            &config.kafka.bootstrap_servers,
            config.kafka.score_topic.clone(),
        )
        .expect("Failed to create score producer"),
    );

    let post_metrics = Arc::new(PostMetricsService::new(
        posts.clone(),
        stats.clone(),
        config.clone(),
    ));
    let lifecycle = Arc::new(SessionLifecycle::new(
        sessions.clone(),
        profiles.clone(),
        locks.clone(),
        config.clone(),
    ));
    let aggregator = Arc::new(ScoreAggregator::new(
        sessions.clone(),
        posts.clone(),
        post_metrics.clone(),
    ));
    if let Err(e) = aggregator.hydrate().await {
        error!("Score buffer hydration failed: {:?}", e);
    }

    // Background workers share a shutdown signal; each drains its in-flight
    // work when it fires.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(start_stats_consumer(
        config.kafka.clone(),
        posts.clone(),
        stats.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(start_score_consumer(
        config.kafka.clone(),
        aggregator.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(start_hourly_flush(aggregator.clone(), shutdown_rx.clone()));
    tokio::spawn(jobs::start_session_expiry_worker(
        lifecycle.clone(),
        config.session.expiry_tick_seconds,
        shutdown_rx.clone(),
    ));
    tokio::spawn(jobs::start_rising_decay(
        profiles.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(jobs::start_evergreen_recompute(
        posts.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));
    info!("Background workers spawned");

    let state = web::Data::new(AppState {
        config: config.clone(),
        profiles: profiles.clone(),
        posts: posts.clone(),
        sessions: sessions.clone(),
        locks: locks.clone(),
        interest: InterestService::new(stats.clone(), config.clone()),
        creator: CreatorService::new(config.clone()),
        post_metrics: post_metrics.clone(),
        lifecycle: lifecycle.clone(),
        feed: FeedService::new(
            posts.clone(),
            profiles.clone(),
            stats.clone(),
            sessions.clone(),
            config.clone(),
        ),
        engagement_producer: engagement_producer.clone(),
        score_producer: score_producer.clone(),
    });

    let port = config.app.port;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(pulsefeed::metrics::serve_metrics))
            .service(handlers::positive_engagement)
            .service(handlers::negative_engagement)
            .service(handlers::get_feed)
            .service(handlers::toggle_follow)
            .service(handlers::logout)
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await;

    // Server has exited: signal the workers and drain the producers.
    let _ = shutdown_tx.send(true);
    if let Err(e) = aggregator.flush(true).await {
        error!("Final aggregator flush failed: {:?}", e);
    }
    engagement_producer.flush().await;
    score_producer.flush().await;
    info!("Shutdown complete");

    server
}
