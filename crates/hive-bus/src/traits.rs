//! The bus contract.
//!
//! Two implementations share this trait: the in-process
//! [`MemoryBus`](crate::MemoryBus) (tests, single-host development)
//! and the broker-backed bus behind the `broker` feature. Both honor
//! the same delivery contract:
//!
//! - **At-least-once**: consumers must be idempotent on `event.id`.
//! - **Per-(producer, topic) ordering**: one producer's events on one
//!   topic arrive in publish order at every subscriber of that topic.
//!   Nothing is promised across topics or producers.
//! - **Consumer groups**: members of one group split the stream (each
//!   event to exactly one member); distinct groups each see every
//!   event.

use crate::BusError;
use async_trait::async_trait;
use hive_event::Envelope;
use hive_types::TopicName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A handle onto one consumer group's stream for one topic.
///
/// Cloning the subscription adds another member to the same group:
/// the clones compete for events. Subscribe under a different group
/// name to receive an independent copy of the stream.
#[derive(Clone)]
pub struct Subscription {
    topic: TopicName,
    group: String,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl Subscription {
    /// Builds a subscription over a receiver. Used by bus
    /// implementations; not part of the public contract.
    #[must_use]
    pub fn from_receiver(topic: TopicName, group: String, rx: mpsc::Receiver<Envelope>) -> Self {
        Self {
            topic,
            group,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Topic this subscription reads.
    #[must_use]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Consumer group this subscription belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Receives the next event, suspending until one arrives.
    ///
    /// Returns `None` when the topic is closed (bus dropped).
    pub async fn recv(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }

    /// Receives without suspending. `None` when nothing is queued.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Topic-based publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes one event to a topic.
    ///
    /// # Errors
    ///
    /// - [`BusError::Full`]: the topic's retention is saturated; fatal
    ///   for this attempt.
    /// - [`BusError::Unavailable`]: transient transport failure; retry
    ///   with [`crate::Backoff`].
    async fn publish(&self, topic: &TopicName, event: Envelope) -> Result<(), BusError>;

    /// Subscribes a consumer group to a topic.
    ///
    /// Events published before the group's first subscription are
    /// replayed from the topic's retained backlog.
    ///
    /// # Errors
    ///
    /// [`BusError::Unavailable`] when the transport cannot register the
    /// group.
    async fn subscribe(&self, topic: &TopicName, group: &str) -> Result<Subscription, BusError>;

    /// Publishes `event` and waits for the correlated reply.
    ///
    /// Convention: responders publish their answer on `<topic>-reply`
    /// carrying the same `correlation_id` in `meta`. When the outgoing
    /// event has no correlation id, its event id is stamped in.
    ///
    /// # Errors
    ///
    /// [`BusError::Timeout`] when no reply arrives before the deadline,
    /// plus any publish/subscribe error.
    async fn request_reply(
        &self,
        topic: &TopicName,
        event: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let correlation = match event.meta.correlation_id() {
            Some(id) => id.to_owned(),
            None => event.id.to_string(),
        };

        let mut event = event;
        if event.meta.correlation_id().is_none() {
            event.meta = event.meta.clone().with_correlation_id(correlation.clone());
        }

        // A single-use group per exchange: replies are not load-balanced
        // with anyone else's.
        let reply_topic = topic.reply();
        let reply_group = format!("reply-{correlation}");
        let sub = self.subscribe(&reply_topic, &reply_group).await?;

        self.publish(topic, event).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(BusError::Timeout(topic.clone()));
            }
            match tokio::time::timeout(remaining, sub.recv()).await {
                Ok(Some(reply)) if reply.meta.correlation_id() == Some(correlation.as_str()) => {
                    return Ok(reply);
                }
                Ok(Some(_)) => continue, // someone else's reply
                Ok(None) => return Err(BusError::Unavailable("reply topic closed".into())),
                Err(_) => return Err(BusError::Timeout(topic.clone())),
            }
        }
    }
}
