//! Topic-based message bus for HIVE.
//!
//! All inter-agent traffic flows over named topics with an
//! at-least-once delivery contract:
//!
//! ```text
//! ┌───────────┐ publish  ┌──────────────────┐ recv ┌─────────────┐
//! │ producer  │ ───────► │ topic "plan-in"  │ ───► │ group "a"   │
//! └───────────┘          │  (per-group      │      ├─────────────┤
//!                        │   queues +       │ ───► │ group "b"   │
//!                        │   retained log)  │      └─────────────┘
//!                        └──────────────────┘
//! ```
//!
//! Two implementations share the [`MessageBus`] contract:
//!
//! - [`MemoryBus`]: in-process, zero infrastructure, first-class mode
//!   (`BUS_MODE=mock`). Everything in the runtime is exercisable on it.
//! - `BrokerBus`: Kafka-family adapter behind the `broker` cargo
//!   feature (`BUS_MODE=broker`).
//!
//! # Delivery Contract
//!
//! - At-least-once: consumers are idempotent on `event.id`.
//! - Publish order per (producer, topic) is preserved per subscriber.
//! - Consumer groups split a stream; distinct groups each get a copy.
//! - `Unavailable` failures are retried with the shared [`Backoff`]
//!   schedule (100 ms base, ×2, 30 s cap, ±25% jitter); `Full` is
//!   fatal for the attempt that hit it.

mod backoff;
#[cfg(feature = "broker")]
mod broker;
mod error;
mod memory;
mod traits;

pub use backoff::{Backoff, BASE_DELAY, JITTER, MAX_DELAY};
#[cfg(feature = "broker")]
pub use broker::BrokerBus;
pub use error::BusError;
pub use memory::{MemoryBus, DEFAULT_CAPACITY};
pub use traits::{MessageBus, Subscription};
