//! Kafka-family broker backend.
//!
//! Selected with `BUS_MODE=broker` + `BROKER_BOOTSTRAP`, compiled only
//! under the `broker` cargo feature. The mapping onto the bus contract
//! is direct: topics are broker topics, consumer groups are broker
//! consumer groups (which already provide split-within-group,
//! copy-across-groups and at-least-once delivery), and the retained
//! backlog is the broker's log read from the earliest offset.

use crate::{BusError, MessageBus, Subscription};
use async_trait::async_trait;
use hive_event::Envelope;
use hive_types::TopicName;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Queue depth between the broker pump task and a subscription.
const PUMP_DEPTH: usize = 1024;

/// Broker-backed bus.
pub struct BrokerBus {
    bootstrap: String,
    producer: FutureProducer,
}

impl BrokerBus {
    /// Connects a producer to the given bootstrap servers.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] when the client cannot be
    /// constructed.
    pub fn connect(bootstrap: &str) -> Result<Self, BusError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        Ok(Self {
            bootstrap: bootstrap.to_owned(),
            producer,
        })
    }
}

#[async_trait]
impl MessageBus for BrokerBus {
    async fn publish(&self, topic: &TopicName, event: Envelope) -> Result<(), BusError> {
        let bytes = event.encode().map_err(|e| BusError::Codec(e.to_string()))?;
        // Keying by producer pins one agent's events to one partition,
        // which is what carries the per-(producer, topic) ordering
        // guarantee over to the broker.
        let key = event.agent.as_str().to_owned();
        let record = FutureRecord::to(topic.as_str()).payload(&bytes).key(&key);

        self.producer
            .send(record, Timeout::After(Duration::from_secs(30)))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BusError::Unavailable(e.to_string()))
    }

    async fn subscribe(&self, topic: &TopicName, group: &str) -> Result<Subscription, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap)
            .set("group.id", group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(PUMP_DEPTH);
        let pump_topic = topic.clone();
        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            continue;
                        };
                        match Envelope::decode(payload) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break; // subscription dropped
                                }
                            }
                            Err(e) => {
                                warn!(topic = %pump_topic, error = %e, "dropping malformed event");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(topic = %pump_topic, error = %e, "broker receive failed");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });

        Ok(Subscription::from_receiver(
            topic.clone(),
            group.to_owned(),
            rx,
        ))
    }
}
