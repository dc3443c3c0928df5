//! In-process bus.
//!
//! This is a first-class mode, not a test double: every runtime
//! operation must be exercisable on a single host with no external
//! infrastructure. `BUS_MODE=mock` selects it.
//!
//! # Topology
//!
//! ```text
//! publish("planner-in", e)
//!     │
//!     ▼
//! ┌───────────────────────────────────────────────┐
//! │ TopicState "planner-in"                       │
//! │   retained: [e1, e2, ...]  (bounded backlog)  │
//! │   group "planner"   ──► queue ──► members     │
//! │   group "auditors"  ──► queue ──► members     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Each publish is fanned out to every group's queue; members of one
//! group share the queue and so split the stream. A group subscribing
//! late is seeded from the retained backlog (the mock equivalent of
//! reading a log topic from the earliest offset), which is what makes
//! delivery at-least-once rather than best-effort.

use crate::{BusError, MessageBus, Subscription};
use async_trait::async_trait;
use hive_event::Envelope;
use hive_types::TopicName;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Default per-topic retention bound and per-group queue depth.
pub const DEFAULT_CAPACITY: usize = 4096;

struct GroupQueue {
    tx: mpsc::Sender<Envelope>,
    rx_template: Subscription,
}

struct TopicState {
    retained: VecDeque<Envelope>,
    groups: HashMap<String, GroupQueue>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            retained: VecDeque::new(),
            groups: HashMap::new(),
        }
    }
}

/// Unbounded-topology, bounded-queue in-process bus.
pub struct MemoryBus {
    capacity: usize,
    topics: Mutex<HashMap<String, TopicState>>,
}

impl MemoryBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit per-topic capacity (retention
    /// bound and per-group queue depth).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Number of events currently retained for a topic.
    #[must_use]
    pub fn retained_len(&self, topic: &TopicName) -> usize {
        self.topics
            .lock()
            .get(topic.as_str())
            .map_or(0, |t| t.retained.len())
    }

    /// Registered consumer groups for a topic.
    #[must_use]
    pub fn group_count(&self, topic: &TopicName) -> usize {
        self.topics
            .lock()
            .get(topic.as_str())
            .map_or(0, |t| t.groups.len())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &TopicName, event: Envelope) -> Result<(), BusError> {
        // One lock over the topic table is the linearization point:
        // publishes to a topic are totally ordered, and each group's
        // bounded channel preserves that order.
        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.as_str().to_owned())
            .or_insert_with(TopicState::new);

        for (group, queue) in &state.groups {
            match queue.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(topic = %topic, group = %group, "consumer group queue saturated");
                    return Err(BusError::Full(topic.clone()));
                }
                // All members dropped; the backlog still retains the
                // event for a future subscriber of this group name.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        if state.retained.len() >= self.capacity {
            state.retained.pop_front();
        }
        state.retained.push_back(event);
        trace!(topic = %topic, retained = state.retained.len(), "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicName, group: &str) -> Result<Subscription, BusError> {
        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.as_str().to_owned())
            .or_insert_with(TopicState::new);

        if let Some(queue) = state.groups.get(group) {
            // Another member of an existing group shares the queue.
            return Ok(queue.rx_template.clone());
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        for event in &state.retained {
            // Backlog length and channel depth share `capacity`, so
            // seeding a fresh queue cannot overflow it.
            let _ = tx.try_send(event.clone());
        }

        let sub = Subscription::from_receiver(topic.clone(), group.to_owned(), rx);
        state.groups.insert(
            group.to_owned(),
            GroupQueue {
                tx,
                rx_template: sub.clone(),
            },
        );
        debug!(topic = %topic, group, "consumer group registered");
        Ok(sub)
    }
}
