//! End-to-end sentinel scenarios over the full runtime stack.

use hive_bus::MemoryBus;
use hive_runtime::agent::{AgentSpec, EchoWorker};
use hive_runtime::config::{AgentCaps, HiveConfig};
use hive_runtime::sentinel::{AuditSink, CreditSentinel, SentinelConfig, Verdict};
use hive_runtime::{AgentRuntime, AgentState};
use hive_types::{AgentName, SessionId};
use std::sync::Arc;
use std::time::Duration;

fn agent(name: &str) -> AgentName {
    AgentName::new(name).unwrap()
}

fn caps(soft: u64, hard: u64) -> AgentCaps {
    AgentCaps {
        soft_cap: soft,
        hard_cap: hard,
        wall_time_limit_ms: 60_000,
    }
}

fn fresh_sentinel(
    global_cap: u64,
) -> (
    Arc<CreditSentinel>,
    tokio::sync::mpsc::UnboundedReceiver<hive_runtime::AbortNotice>,
) {
    CreditSentinel::new(
        SentinelConfig {
            global_hard_cap: global_cap,
            checkpoint_interval: 50,
            warn_threshold: 0.80,
            throttle_threshold: 0.95,
            default_caps: caps(150, 200),
        },
        AuditSink::null(),
    )
}

/// Scenario: a fresh sentinel, one call at 85% of the soft cap.
#[test]
fn soft_cap_warn() {
    let (sentinel, _rx) = fresh_sentinel(1000);
    let a = agent("a");
    sentinel.register(&a, &caps(100, 200));

    assert_eq!(sentinel.track(&a, "t", 85, 0), Verdict::Warn);
    assert_eq!(sentinel.metrics().agents[&a].credits_used, 85);
}

/// Scenario: twenty 5-credit calls checkpoint at exactly 50 and 100.
#[test]
fn checkpoint_cadence() {
    let (sentinel, _rx) = fresh_sentinel(100_000);
    let b = agent("b");
    sentinel.register(&b, &caps(10_000, 20_000));

    let verdicts: Vec<Verdict> = (0..20).map(|_| sentinel.track(&b, "t", 5, 0)).collect();

    let expected: Vec<Verdict> = (0..20)
        .map(|i| {
            if i == 9 || i == 19 {
                Verdict::Checkpoint
            } else {
                Verdict::Allow
            }
        })
        .collect();
    assert_eq!(verdicts, expected);

    let metrics = &sentinel.metrics().agents[&b];
    assert_eq!(metrics.credits_used, 100);
    assert_eq!(metrics.last_checkpoint_credits, 100);
}

/// Property: between two consecutive checkpoints at least
/// `checkpoint_interval` credits accrue, and the watermark equals the
/// running total right after each checkpoint.
#[test]
fn checkpoint_cadence_property() {
    let (sentinel, _rx) = fresh_sentinel(1_000_000);
    let b = agent("b");
    sentinel.register(&b, &caps(500_000, 900_000));

    let mut at_checkpoint = Vec::new();
    for _ in 0..300 {
        if sentinel.track(&b, "t", 2, 0) == Verdict::Checkpoint {
            let m = &sentinel.metrics().agents[&b];
            assert_eq!(m.credits_used, m.last_checkpoint_credits);
            at_checkpoint.push(m.credits_used);
        }
    }

    assert!(!at_checkpoint.is_empty());
    for pair in at_checkpoint.windows(2) {
        assert!(pair[1] - pair[0] >= 50);
    }
}

/// Scenario: throttle at 96% of soft cap, then abort when the next
/// call would cross the hard cap; the runtime takes the agent down.
#[tokio::test]
async fn throttle_then_abort() {
    let mut config = HiveConfig::default();
    config.agents.insert("c".into(), caps(100, 110));

    let bus: Arc<MemoryBus> = Arc::new(MemoryBus::new());
    let (sentinel, sentinel_rx) =
        CreditSentinel::new(SentinelConfig::from(&config), AuditSink::null());
    let (locks, lock_rx) = hive_runtime::LockManager::new();
    let runtime = AgentRuntime::new(
        bus,
        sentinel.clone(),
        locks,
        SessionId::new("s3"),
        config.clone(),
    );
    let _l1 = runtime.spawn_abort_listener(sentinel_rx);
    let _l2 = runtime.spawn_abort_listener(lock_rx);

    let c = agent("c");
    runtime
        .spawn(AgentSpec::new(c.clone()), Box::new(EchoWorker::default()))
        .await
        .unwrap();

    assert_eq!(sentinel.track(&c, "t", 96, 0), Verdict::Throttle);
    assert_eq!(sentinel.track(&c, "t", 20, 0), Verdict::Abort);

    // The abort notice reaches the runtime and the agent leaves
    // `running` within a tick, landing in `dead` via `aborting`.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let state = runtime.health()[&c];
            if matches!(state, AgentState::Aborting | AgentState::Dead) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("abort should reach the runtime promptly");
}

/// Property: the sum of per-agent credits never exceeds the global
/// hard cap, no matter the interleaving.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn global_cap_holds_under_contention() {
    let (sentinel, _rx) = fresh_sentinel(500);

    let mut handles = Vec::new();
    for i in 0..8 {
        let s = sentinel.clone();
        let name = agent(&format!("worker-{i}"));
        s.register(&name, &caps(10_000, 10_000));
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                let _ = s.track(&name, "t", 3, 1);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let metrics = sentinel.metrics();
    assert!(metrics.global_credits <= 500);
    let per_agent_sum: u64 = metrics.agents.values().map(|m| m.credits_used).sum();
    assert_eq!(per_agent_sum, metrics.global_credits);
    assert!(sentinel.global_abort_seen());
}
