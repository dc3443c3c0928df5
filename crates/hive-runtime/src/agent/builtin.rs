//! Builtin workers.
//!
//! Trivial agent behaviors shipped with the runtime for tests, local
//! development, and the CLI's mock cycle. Real deployments provide
//! their own [`Worker`] implementations.

use crate::agent::{Worker, WorkerContext, WorkerError};
use async_trait::async_trait;
use hive_event::{Envelope, Payload};

/// Answers every `tool_call` with a `completion` carrying the call's
/// arguments back, charging one fixed-cost credit per call. Other
/// event kinds are ignored.
pub struct EchoWorker {
    credits_per_call: u64,
    tokens_per_call: u64,
}

impl EchoWorker {
    /// Creates an echo worker with explicit per-call costs.
    #[must_use]
    pub fn new(credits_per_call: u64, tokens_per_call: u64) -> Self {
        Self {
            credits_per_call,
            tokens_per_call,
        }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

#[async_trait]
impl Worker for EchoWorker {
    async fn on_event(
        &mut self,
        event: Envelope,
        ctx: &mut WorkerContext,
    ) -> Result<Vec<Envelope>, WorkerError> {
        let Payload::ToolCall(call) = event.payload else {
            return Ok(Vec::new());
        };

        ctx.charge(&call.tool, self.credits_per_call, self.tokens_per_call)
            .await?;

        let task = event
            .meta
            .intent_id
            .as_ref()
            .map_or_else(|| event.id.to_string(), |intent| intent.to_string());
        let mut meta = ctx.meta().with_credits(self.credits_per_call);
        if let Some(intent) = event.meta.intent_id.clone() {
            meta = meta.with_intent(intent);
        }

        Ok(vec![Envelope::completion(
            ctx.agent().clone(),
            task,
            call.args,
            meta,
        )])
    }
}

/// Consumes everything, produces nothing. Charges one credit per
/// event so governor paths stay exercised.
#[derive(Default)]
pub struct SinkWorker;

#[async_trait]
impl Worker for SinkWorker {
    async fn on_event(
        &mut self,
        event: Envelope,
        ctx: &mut WorkerContext,
    ) -> Result<Vec<Envelope>, WorkerError> {
        ctx.charge(event.kind.as_str(), 1, 0).await?;
        Ok(Vec::new())
    }
}
