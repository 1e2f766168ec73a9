//! Hourly score aggregator (group `hourly-aggregator`): buffers score
//! deltas per post in process, mirrored to the fast-store `score_buffer`
//! hash so a restarted worker can recover the buffer. A top-of-hour flush
//! feeds the buffered deltas through the post metrics engine.

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::KafkaConfig;
use crate::db::PostRepo;
use crate::error::Result;
use crate::events::PostScoreEvent;
use crate::metrics;
use crate::services::post_metrics::PostMetricsService;
use crate::session::SessionStore;
use crate::util::now_ms;

/// A post is only flushed once its metrics have been quiet for this long;
/// the request path remains the estimator inside the window.
const FLUSH_MIN_IDLE_MS: i64 = 3_600_000;

pub struct ScoreAggregator {
    buffer: DashMap<Uuid, f64>,
    store: SessionStore,
    posts: Arc<PostRepo>,
    post_metrics: Arc<PostMetricsService>,
}

impl ScoreAggregator {
    pub fn new(
        store: SessionStore,
        posts: Arc<PostRepo>,
        post_metrics: Arc<PostMetricsService>,
    ) -> Self {
        Self {
            buffer: DashMap::new(),
            store,
            posts,
            post_metrics,
        }
    }

    /// Recover the in-process buffer from the fast-store mirror.
    pub async fn hydrate(&self) -> Result<()> {
        let snapshot = self.store.buffer_snapshot().await?;
        let count = snapshot.len();
        for (post_id, delta) in snapshot {
            self.buffer.insert(post_id, delta);
        }
        if count > 0 {
            info!("Hydrated score buffer with {} entries", count);
        }
        Ok(())
    }

    /// Accumulate a delta in process and in the mirror.
    pub async fn record(&self, event: &PostScoreEvent) -> Result<()> {
        *self.buffer.entry(event.post_id).or_insert(0.0) += event.score_delta;
        self.store
            .buffer_incr(event.post_id, event.score_delta)
            .await?;
        metrics::SCORE_BUFFER_SIZE.set(self.buffer.len() as i64);
        Ok(())
    }

    /// Flush buffered deltas through the metrics engine. With `force`, the
    /// quiet-window check is skipped (shutdown drain).
    pub async fn flush(&self, force: bool) -> Result<usize> {
        let entries: Vec<(Uuid, f64)> = self
            .buffer
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();

        let now = now_ms();
        let mut flushed = 0usize;

        for (post_id, delta) in entries {
            if !force {
                let quiet = match self.posts.get(post_id).await {
                    Ok(Some(post)) => {
                        now - post.last_trending_update.timestamp_millis() >= FLUSH_MIN_IDLE_MS
                    }
                    Ok(None) => true, // deleted post: drop the entry below
                    Err(e) => {
                        warn!(post_id = %post_id, error = %e, "Flush probe failed");
                        continue;
                    }
                };
                if !quiet {
                    continue;
                }
            }

            match self.post_metrics.record(post_id, delta).await {
                Ok(()) => flushed += 1,
                Err(crate::error::AppError::NotFound(_)) => {
                    // Post is gone; drop the buffered delta with it.
                }
                Err(e) => {
                    error!(post_id = %post_id, error = %e, "Flush failed; keeping delta");
                    continue;
                }
            }

            self.buffer.remove(&post_id);
            if let Err(e) = self.store.buffer_remove(post_id).await {
                warn!(post_id = %post_id, error = %e, "Mirror cleanup failed");
            }
        }

        metrics::SCORE_BUFFER_SIZE.set(self.buffer.len() as i64);
        if flushed > 0 {
            metrics::AGGREGATOR_FLUSHES.inc();
            info!("Score aggregator flushed {} posts", flushed);
        }
        Ok(flushed)
    }

    #[cfg(test)]
    pub fn buffered(&self, post_id: Uuid) -> Option<f64> {
        self.buffer.get(&post_id).map(|v| *v)
    }
}

/// Consume score events into the aggregator buffer.
pub async fn start_score_consumer(
    kafka: KafkaConfig,
    aggregator: Arc<ScoreAggregator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &kafka.bootstrap_servers)
        .set("group.id", &kafka.aggregator_group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "5000")
        .set("session.timeout.ms", "10000")
        .create()?;

    consumer.subscribe(&[kafka.score_topic.as_str()])?;
    info!("Score aggregator subscribed to {}", kafka.score_topic);

    loop {
        tokio::select! {
            msg_result = consumer.recv() => {
                match msg_result {
                    Ok(msg) => {
                        let Some(payload) = msg.payload() else { continue };
                        match serde_json::from_slice::<PostScoreEvent>(payload) {
                            Ok(event) => {
                                if let Err(e) = aggregator.record(&event).await {
                                    error!("Failed to buffer score event: {:?}", e);
                                } else {
                                    metrics::CONSUMER_MESSAGES.with_label_values(&["score"]).inc();
                                }
                            }
                            Err(e) => warn!("Failed to deserialize score event: {:?}", e),
                        }
                    }
                    Err(e) => {
                        error!("Score consumer error: {:?}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Score consumer shutting down; draining buffer");
                if let Err(e) = aggregator.flush(true).await {
                    error!("Shutdown flush failed: {:?}", e);
                }
                return Ok(());
            }
        }
    }
}

/// Fire the aggregator flush at the top of every hour.
pub async fn start_hourly_flush(
    aggregator: Arc<ScoreAggregator>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let seconds_into_hour = (now.minute() * 60 + now.second()) as u64;
        let until_next_hour = 3_600 - seconds_into_hour.min(3_599);

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(until_next_hour)) => {
                if let Err(e) = aggregator.flush(false).await {
                    error!("Hourly flush failed: {:?}", e);
                }
            }
            _ = shutdown.changed() => {
                info!("Hourly flush worker shutting down");
                return;
            }
        }
    }
}
