//! Engagement stats consumer (group `engagement-stats`): fans one
//! engagement record out into the four counter families. Increments are
//! commutative so their relative order does not matter.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::db::{PostRepo, StatsRepo};
use crate::error::Result;
use crate::events::EngagementEvent;
use crate::metrics;
use crate::models::EntityType;

pub async fn start_stats_consumer(
    kafka: KafkaConfig,
    posts: Arc<PostRepo>,
    stats: Arc<StatsRepo>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &kafka.bootstrap_servers)
        .set("group.id", &kafka.stats_group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "5000")
        .set("session.timeout.ms", "10000")
        .create()?;

    consumer.subscribe(&[kafka.engagement_topic.as_str()])?;
    info!(
        "Engagement stats consumer subscribed to {}",
        kafka.engagement_topic
    );

    loop {
        tokio::select! {
            msg_result = consumer.recv() => {
                match msg_result {
                    Ok(msg) => {
                        let Some(payload) = msg.payload() else { continue };
                        match serde_json::from_slice::<EngagementEvent>(payload) {
                            Ok(event) => {
                                if let Err(e) = apply_event(&posts, &stats, &event).await {
                                    error!("Failed to apply engagement event: {:?}", e);
                                } else {
                                    metrics::CONSUMER_MESSAGES.with_label_values(&["engagement"]).inc();
                                }
                            }
                            Err(e) => {
                                warn!("Failed to deserialize engagement event: {:?}", e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Stats consumer error: {:?}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Engagement stats consumer shutting down");
                return Ok(());
            }
        }
    }
}

/// All four counter families move for one engagement; the subcategory
/// variants only when the event carries one.
async fn apply_event(
    posts: &PostRepo,
    stats: &StatsRepo,
    event: &EngagementEvent,
) -> Result<()> {
    let score = event.engagement_score;

    posts.bump_counters(event.post_id, 1, score).await?;
    stats
        .bump_global(EntityType::Category, &event.category, 1, score)
        .await?;
    stats
        .bump_user_interest(event.user_id, EntityType::Category, &event.category, 1, score)
        .await?;
    stats.bump_creator(event.creator_id, 1, score).await?;

    if let Some(sub) = &event.sub_category {
        stats
            .bump_global(EntityType::Subcategory, sub, 1, score)
            .await?;
        stats
            .bump_user_interest(event.user_id, EntityType::Subcategory, sub, 1, score)
            .await?;
    }
    Ok(())
}
