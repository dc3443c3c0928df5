//! Snapshot determinism over live components.

use chrono::Utc;
use hive_bus::MemoryBus;
use hive_runtime::config::{AgentCaps, HiveConfig};
use hive_runtime::sentinel::{AuditSink, CreditSentinel, SentinelConfig, Verdict};
use hive_runtime::snapshot::{NullVcs, Snapshotter};
use hive_runtime::{AgentRuntime, LockManager};
use hive_types::{AgentName, ResourceName, SessionId};
use std::sync::Arc;

struct Stack {
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    runtime: Arc<AgentRuntime>,
}

fn stack() -> Stack {
    let config = HiveConfig::default();
    let (sentinel, _sentinel_rx) =
        CreditSentinel::new(SentinelConfig::from(&config), AuditSink::null());
    let (locks, _lock_rx) = LockManager::new();
    let runtime = AgentRuntime::new(
        Arc::new(MemoryBus::new()),
        sentinel.clone(),
        locks.clone(),
        SessionId::new("hive-2025-06-01-001"),
        config,
    );
    Stack {
        sentinel,
        locks,
        runtime,
    }
}

fn snapshotter(stack: &Stack) -> Snapshotter {
    Snapshotter::new(
        stack.sentinel.clone(),
        stack.locks.clone(),
        stack.runtime.clone(),
        Arc::new(NullVcs),
        SessionId::new("hive-2025-06-01-001"),
        Utc::now(),
    )
}

/// Scenario: run the checkpoint-cadence workload, then snapshot twice
/// back to back. Bytes and hash must be identical.
#[tokio::test]
async fn back_to_back_snapshots_are_byte_identical() {
    let stack = stack();
    let b = AgentName::new("b").unwrap();
    stack.sentinel.register(
        &b,
        &AgentCaps {
            soft_cap: 10_000,
            hard_cap: 20_000,
            wall_time_limit_ms: 60_000,
        },
    );
    for _ in 0..20 {
        let v = stack.sentinel.track(&b, "t", 5, 0);
        assert_ne!(v, Verdict::Abort);
    }

    let snapshotter = snapshotter(&stack);
    let first = snapshotter.snapshot().unwrap();
    let second = snapshotter.snapshot().unwrap();

    assert_eq!(
        first.canonical_json().unwrap(),
        second.canonical_json().unwrap()
    );
    assert_eq!(first.context_hash, second.context_hash);
    assert!(first.validate().is_empty());
}

/// Any state change between snapshots changes the hash.
#[tokio::test]
async fn state_change_changes_hash() {
    let stack = stack();
    let a = AgentName::new("a").unwrap();
    stack.sentinel.register(
        &a,
        &AgentCaps {
            soft_cap: 1000,
            hard_cap: 2000,
            wall_time_limit_ms: 60_000,
        },
    );
    stack.sentinel.track(&a, "t", 5, 0);

    let snapshotter = snapshotter(&stack);
    let before = snapshotter.snapshot().unwrap();

    stack.sentinel.track(&a, "t", 5, 0);
    let after = snapshotter.snapshot().unwrap();

    assert_ne!(before.context_hash, after.context_hash);
}

/// Lock holdings appear in the summary and affect the hash.
#[tokio::test]
async fn lock_state_is_captured() {
    let stack = stack();
    let holder = AgentName::new("holder").unwrap();
    let r = ResourceName::new("src/main.rs");

    let snapshotter = snapshotter(&stack);
    let empty = snapshotter.snapshot().unwrap();

    stack.locks.acquire(&holder, &r).await.unwrap();
    let held = snapshotter.snapshot().unwrap();

    assert_eq!(held.locks.held[&r], holder);
    assert_ne!(empty.context_hash, held.context_hash);
}

/// Credit arithmetic in the summary always balances.
#[tokio::test]
async fn credit_arithmetic_balances() {
    let stack = stack();
    let a = AgentName::new("a").unwrap();
    stack.sentinel.register(
        &a,
        &AgentCaps {
            soft_cap: 500,
            hard_cap: 900,
            wall_time_limit_ms: 60_000,
        },
    );
    for _ in 0..7 {
        stack.sentinel.track(&a, "t", 11, 0);
    }

    let summary = snapshotter(&stack).snapshot().unwrap();
    assert_eq!(summary.credits.used, 77);
    assert_eq!(
        summary.credits.used + summary.credits.remaining,
        summary.credits.cap
    );
    assert_eq!(summary.credits.max_per_agent[&a], 77);
    assert!(summary.validate().is_empty());
}
