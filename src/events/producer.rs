//! Kafka producers, one per topic, with payload validation before publish
//! and a single lazy reconnect attempt on send failure.

use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use validator::Validate;

use crate::error::{AppError, Result};

pub struct EventProducer {
    client_config: ClientConfig,
    producer: RwLock<FutureProducer>,
    topic: String,
    timeout: Duration,
}

impl EventProducer {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("acks", "all")
            .set("compression.type", "lz4");

        let producer: FutureProducer = client_config.create().map_err(AppError::Kafka)?;

        Ok(Self {
            client_config,
            producer: RwLock::new(producer),
            topic,
            timeout: Duration::from_secs(5),
        })
    }

    /// Validate and publish. An invalid payload is a non-retriable error; a
    /// failed send gets one reconnect before surfacing as unhealthy.
    pub async fn publish<T: Serialize + Validate>(&self, key: &str, event: &T) -> Result<()> {
        event
            .validate()
            .map_err(|e| AppError::Validation(format!("invalid event payload: {}", e)))?;

        let payload = serde_json::to_string(event)?;
        debug!("Publishing event to topic {} (key={})", self.topic, key);

        if self.try_send(key, &payload).await.is_ok() {
            return Ok(());
        }

        warn!(
            "Publish to {} failed, attempting producer reconnect",
            self.topic
        );
        self.reconnect().await?;
        self.try_send(key, &payload).await.map_err(|e| {
            AppError::ProducerUnhealthy(format!("topic {}: {}", self.topic, e))
        })
    }

    async fn try_send(&self, key: &str, payload: &str) -> std::result::Result<(), String> {
        let producer = self.producer.read().await;
        let record = FutureRecord::to(&self.topic).payload(payload).key(key);
        match tokio::time::timeout(self.timeout, producer.send(record, self.timeout)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(e.to_string()),
            Err(_) => Err("publish timeout".to_string()),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh: FutureProducer = self.client_config.create().map_err(AppError::Kafka)?;
        *self.producer.write().await = fresh;
        Ok(())
    }

    /// Drain buffered messages; called on shutdown.
    pub async fn flush(&self) {
        let producer = self.producer.read().await;
        if let Err(e) = producer.flush(self.timeout) {
            warn!("Producer flush for {} failed: {}", self.topic, e);
        }
    }
}
