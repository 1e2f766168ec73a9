//! Prometheus counters for the engagement, feed and background paths.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref ENGAGEMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pulsefeed_engagements_total",
        "Engagement requests processed, by kind",
        &["kind"]
    )
    .expect("engagements metric registration");
    pub static ref FEED_REQUESTS: IntCounter = register_int_counter!(
        "pulsefeed_feed_requests_total",
        "Feed assemblies served"
    )
    .expect("feed requests metric registration");
    pub static ref SESSIONS_STARTED: IntCounter = register_int_counter!(
        "pulsefeed_sessions_started_total",
        "Sessions hydrated from the persistent profile"
    )
    .expect("sessions started metric registration");
    pub static ref SESSIONS_EXPIRED: IntCounter = register_int_counter!(
        "pulsefeed_sessions_expired_total",
        "Sessions merged back and destroyed by the expiry worker"
    )
    .expect("sessions expired metric registration");
    pub static ref CONSUMER_MESSAGES: IntCounterVec = register_int_counter_vec!(
        "pulsefeed_consumer_messages_total",
        "Messages handled per consumer",
        &["consumer"]
    )
    .expect("consumer messages metric registration");
    pub static ref AGGREGATOR_FLUSHES: IntCounter = register_int_counter!(
        "pulsefeed_aggregator_flushes_total",
        "Hourly aggregator flush rounds that moved at least one post"
    )
    .expect("aggregator flushes metric registration");
    pub static ref SCORE_BUFFER_SIZE: IntGauge = register_int_gauge!(
        "pulsefeed_score_buffer_size",
        "Posts currently buffered by the hourly aggregator"
    )
    .expect("score buffer gauge registration");
}

pub async fn serve_metrics() -> HttpResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
