//! Lock manager: exclusive named resources with deadlock resolution.
//!
//! Agents acquire exclusive ownership of named resources (typically
//! file paths). A free resource is granted immediately; a held one
//! enqueues the caller FIFO and suspends it. The enqueue is the
//! linearization point of a contended acquire.
//!
//! # Deadlock Handling
//!
//! No persistent graph is maintained. A wait-for edge exists from
//! agent A to agent B whenever A waits on a resource B holds; since a
//! suspended agent waits on at most one resource, every agent has at
//! most one outgoing edge and cycles are found by walking the chain:
//!
//! ```text
//! X ──waits r2──► Y ──waits r1──► X        (cycle)
//! ```
//!
//! Detection runs after every enqueue and on a periodic poll
//! (≤ 500 ms). The victim is the cycle member with the most recent
//! acquisition attempt (tie-break: lexicographically greatest name).
//! Its pending wait fails with [`LockError::Deadlock`], its holdings
//! release with FIFO re-grants, and an [`AbortNotice`] is sent to the
//! agent runtime.
//!
//! Protocol violations (`release` of a lock you do not hold, double
//! `acquire`) are programming bugs: they are raised to the caller and
//! not recovered from here.

use crate::sentinel::{AbortKind, AbortNotice};
use hive_types::{AgentName, ErrorCode, ResourceName};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default cycle-detection poll period.
pub const DETECT_PERIOD: Duration = Duration::from_millis(500);

/// Lock manager errors.
///
/// | Error | Code | Recoverable |
/// |-------|------|-------------|
/// | [`LockError::NotHeld`] | `LOCK_NOT_HELD` | No |
/// | [`LockError::AlreadyHeld`] | `LOCK_ALREADY_HELD` | No |
/// | [`LockError::Deadlock`] | `LOCK_DEADLOCK` | No |
/// | [`LockError::Cancelled`] | `LOCK_CANCELLED` | No |
/// | [`LockError::Closed`] | `LOCK_CLOSED` | No |
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Released a resource the agent does not hold. Programming bug.
    #[error("agent '{agent}' does not hold '{resource}'")]
    NotHeld {
        agent: AgentName,
        resource: ResourceName,
    },

    /// Acquired a resource the agent already holds. Programming bug.
    #[error("agent '{agent}' already holds '{resource}'")]
    AlreadyHeld {
        agent: AgentName,
        resource: ResourceName,
    },

    /// The wait was broken to resolve a deadlock; the agent is being
    /// aborted.
    #[error("deadlock broken while waiting for '{resource}'")]
    Deadlock { resource: ResourceName },

    /// The wait was cancelled because the agent is terminating.
    #[error("wait cancelled for '{resource}'")]
    Cancelled { resource: ResourceName },

    /// The lock manager went away while the caller was suspended.
    #[error("lock manager closed")]
    Closed,
}

impl ErrorCode for LockError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotHeld { .. } => "LOCK_NOT_HELD",
            Self::AlreadyHeld { .. } => "LOCK_ALREADY_HELD",
            Self::Deadlock { .. } => "LOCK_DEADLOCK",
            Self::Cancelled { .. } => "LOCK_CANCELLED",
            Self::Closed => "LOCK_CLOSED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

struct Holder {
    agent: AgentName,
    #[allow(dead_code)] // acquisition timestamp, kept for diagnostics
    since: Instant,
    attempt: u64,
}

struct Waiter {
    agent: AgentName,
    tx: oneshot::Sender<Result<(), LockError>>,
    attempt: u64,
}

#[derive(Default)]
struct LockRecord {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct Table {
    resources: HashMap<ResourceName, LockRecord>,
    /// Each suspended agent waits on exactly one resource.
    waiting_on: HashMap<AgentName, ResourceName>,
    /// Most recent acquisition attempt per agent; victim selection key.
    last_attempt: HashMap<AgentName, u64>,
    attempt_seq: u64,
}

/// Current holders and waiters, for session snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LockHoldings {
    /// Resource → current holder.
    pub held: BTreeMap<ResourceName, AgentName>,
    /// Resource → waiters in FIFO order.
    pub waiting: BTreeMap<ResourceName, Vec<AgentName>>,
}

/// Exclusive-lock arbiter.
pub struct LockManager {
    table: Mutex<Table>,
    abort_tx: mpsc::UnboundedSender<AbortNotice>,
}

impl LockManager {
    /// Creates a lock manager and the abort feed the agent runtime
    /// drains for deadlock victims.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AbortNotice>) {
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                table: Mutex::new(Table::default()),
                abort_tx,
            }),
            abort_rx,
        )
    }

    /// Acquires exclusive ownership of `resource` for `agent`.
    ///
    /// Returns immediately when the resource is free; otherwise the
    /// caller is enqueued FIFO and suspended. Enqueueing triggers a
    /// cycle-detection pass.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyHeld`] on double acquire (bug in caller)
    /// - [`LockError::Deadlock`] when this wait was chosen to break a
    ///   cycle
    /// - [`LockError::Cancelled`] when the agent was terminated while
    ///   waiting
    pub async fn acquire(
        &self,
        agent: &AgentName,
        resource: &ResourceName,
    ) -> Result<(), LockError> {
        let rx = {
            let mut table = self.table.lock();
            table.attempt_seq += 1;
            let attempt = table.attempt_seq;
            table.last_attempt.insert(agent.clone(), attempt);

            let record = table.resources.entry(resource.clone()).or_default();
            match &record.holder {
                None => {
                    record.holder = Some(Holder {
                        agent: agent.clone(),
                        since: Instant::now(),
                        attempt,
                    });
                    debug!(agent = %agent, resource = %resource, "lock granted");
                    return Ok(());
                }
                Some(h) if h.agent == *agent => {
                    return Err(LockError::AlreadyHeld {
                        agent: agent.clone(),
                        resource: resource.clone(),
                    });
                }
                Some(_) => {
                    let (tx, rx) = oneshot::channel();
                    record.waiters.push_back(Waiter {
                        agent: agent.clone(),
                        tx,
                        attempt,
                    });
                    table.waiting_on.insert(agent.clone(), resource.clone());
                    debug!(agent = %agent, resource = %resource, "lock contended, enqueued");

                    let victims = resolve_deadlocks(&mut table);
                    drop(table);
                    self.dispatch(victims);
                    rx
                }
            }
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(LockError::Closed),
        }
    }

    /// Releases `resource` held by `agent`; the next FIFO waiter (if
    /// any) is granted.
    ///
    /// # Errors
    ///
    /// [`LockError::NotHeld`] when the agent is not the holder.
    pub fn release(&self, agent: &AgentName, resource: &ResourceName) -> Result<(), LockError> {
        let mut table = self.table.lock();
        let held = table
            .resources
            .get(resource)
            .and_then(|r| r.holder.as_ref())
            .is_some_and(|h| h.agent == *agent);
        if !held {
            return Err(LockError::NotHeld {
                agent: agent.clone(),
                resource: resource.clone(),
            });
        }

        table.resources.get_mut(resource).unwrap().holder = None;
        grant_next(&mut table, resource);
        debug!(agent = %agent, resource = %resource, "lock released");
        Ok(())
    }

    /// Releases every resource held by `agent`, re-granting FIFO.
    /// Used by the runtime's terminate path.
    pub fn release_all(&self, agent: &AgentName) {
        let mut table = self.table.lock();
        let held: Vec<ResourceName> = table
            .resources
            .iter()
            .filter(|(_, r)| r.holder.as_ref().is_some_and(|h| h.agent == *agent))
            .map(|(name, _)| name.clone())
            .collect();

        for resource in held {
            table.resources.get_mut(&resource).unwrap().holder = None;
            grant_next(&mut table, &resource);
        }
    }

    /// Dequeues every pending wait of `agent` with
    /// [`LockError::Cancelled`]. Used when the agent's sentinel
    /// verdict became `Abort` or it is otherwise terminating.
    pub fn cancel_waits(&self, agent: &AgentName) {
        let mut table = self.table.lock();
        if let Some(resource) = table.waiting_on.remove(agent) {
            if let Some(record) = table.resources.get_mut(&resource) {
                let mut kept = VecDeque::with_capacity(record.waiters.len());
                for waiter in record.waiters.drain(..) {
                    if waiter.agent == *agent {
                        let _ = waiter.tx.send(Err(LockError::Cancelled {
                            resource: resource.clone(),
                        }));
                    } else {
                        kept.push_back(waiter);
                    }
                }
                record.waiters = kept;
            }
        }
    }

    /// Runs one cycle-detection pass, resolving every cycle found.
    ///
    /// Victims are returned for observability; their abort notices
    /// have already been dispatched to the runtime.
    pub fn poll_deadlocks(&self) -> Vec<AbortNotice> {
        let victims = {
            let mut table = self.table.lock();
            resolve_deadlocks(&mut table)
        };
        self.dispatch(victims.clone());
        victims
    }

    /// Starts the periodic cycle detector.
    pub fn spawn_detector(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.poll_deadlocks();
            }
        })
    }

    /// Current holders and waiters, sorted, for session snapshots.
    #[must_use]
    pub fn holdings(&self) -> LockHoldings {
        let table = self.table.lock();
        let mut holdings = LockHoldings::default();
        for (resource, record) in &table.resources {
            if let Some(h) = &record.holder {
                holdings.held.insert(resource.clone(), h.agent.clone());
            }
            if !record.waiters.is_empty() {
                holdings.waiting.insert(
                    resource.clone(),
                    record.waiters.iter().map(|w| w.agent.clone()).collect(),
                );
            }
        }
        holdings
    }

    fn dispatch(&self, victims: Vec<AbortNotice>) {
        for notice in victims {
            warn!(agent = %notice.agent, reason = %notice.reason, "deadlock victim");
            let _ = self.abort_tx.send(notice);
        }
    }
}

/// Grants `resource` to its next live FIFO waiter, if any.
fn grant_next(table: &mut Table, resource: &ResourceName) {
    loop {
        let record = match table.resources.get_mut(resource) {
            Some(r) => r,
            None => return,
        };
        let Some(waiter) = record.waiters.pop_front() else {
            return;
        };
        record.holder = Some(Holder {
            agent: waiter.agent.clone(),
            since: Instant::now(),
            attempt: waiter.attempt,
        });
        table.waiting_on.remove(&waiter.agent);
        if waiter.tx.send(Ok(())).is_ok() {
            return;
        }
        // Waiter vanished before the grant landed; undo and try the
        // next one.
        table.resources.get_mut(resource).unwrap().holder = None;
    }
}

/// Detects and resolves every wait-for cycle in `table`.
fn resolve_deadlocks(table: &mut Table) -> Vec<AbortNotice> {
    let mut victims = Vec::new();

    loop {
        let Some(cycle) = find_cycle(table) else {
            break;
        };

        // Most recent acquisition attempt loses; ties go to the
        // lexicographically greatest name.
        let mut best: Option<(&AgentName, u64)> = None;
        for member in &cycle {
            let attempt = table.last_attempt.get(member).copied().unwrap_or(0);
            let better = match best {
                None => true,
                Some((name, seq)) => attempt > seq || (attempt == seq && member > name),
            };
            if better {
                best = Some((member, attempt));
            }
        }
        let victim = best.expect("cycle is non-empty").0.clone();

        // Break the victim's pending wait.
        if let Some(resource) = table.waiting_on.remove(&victim) {
            if let Some(record) = table.resources.get_mut(&resource) {
                if let Some(pos) = record.waiters.iter().position(|w| w.agent == victim) {
                    let waiter = record.waiters.remove(pos).unwrap();
                    let _ = waiter.tx.send(Err(LockError::Deadlock {
                        resource: resource.clone(),
                    }));
                }
            }
        }

        // Release everything the victim holds; waiters re-granted FIFO.
        let held: Vec<ResourceName> = table
            .resources
            .iter()
            .filter(|(_, r)| r.holder.as_ref().is_some_and(|h| h.agent == victim))
            .map(|(name, _)| name.clone())
            .collect();
        for resource in &held {
            table.resources.get_mut(resource).unwrap().holder = None;
            grant_next(table, resource);
        }

        victims.push(AbortNotice {
            agent: victim.clone(),
            reason: format!(
                "deadlock: aborted as youngest of cycle [{}]",
                cycle
                    .iter()
                    .map(AgentName::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            kind: AbortKind::Deadlock,
        });
    }

    victims
}

/// Finds one wait-for cycle, if any exists.
///
/// Each waiting agent has exactly one outgoing edge (to the holder of
/// the resource it waits on), so a cycle is found by chain-walking
/// from each waiting agent. Starts are scanned in name order for
/// deterministic results.
fn find_cycle(table: &Table) -> Option<Vec<AgentName>> {
    let mut starts: Vec<&AgentName> = table.waiting_on.keys().collect();
    starts.sort();

    for start in starts {
        let mut path: Vec<AgentName> = vec![start.clone()];
        let mut current = start.clone();

        loop {
            let Some(resource) = table.waiting_on.get(&current) else {
                break; // chain ends at a non-waiting agent
            };
            let Some(holder) = table
                .resources
                .get(resource)
                .and_then(|r| r.holder.as_ref())
            else {
                break; // resource is free; grant is imminent
            };

            if let Some(pos) = path.iter().position(|a| *a == holder.agent) {
                return Some(path[pos..].to_vec());
            }
            path.push(holder.agent.clone());
            current = holder.agent.clone();
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentName {
        AgentName::new(name).unwrap()
    }

    fn resource(name: &str) -> ResourceName {
        ResourceName::new(name)
    }

    #[tokio::test]
    async fn free_resource_granted_immediately() {
        let (locks, _rx) = LockManager::new();
        locks.acquire(&agent("x"), &resource("r1")).await.unwrap();
        assert_eq!(locks.holdings().held[&resource("r1")], agent("x"));
    }

    #[tokio::test]
    async fn double_acquire_is_protocol_violation() {
        let (locks, _rx) = LockManager::new();
        let x = agent("x");
        let r = resource("r1");
        locks.acquire(&x, &r).await.unwrap();
        let err = locks.acquire(&x, &r).await.unwrap_err();
        assert_eq!(err.code(), "LOCK_ALREADY_HELD");
    }

    #[tokio::test]
    async fn release_not_held_is_protocol_violation() {
        let (locks, _rx) = LockManager::new();
        let err = locks.release(&agent("x"), &resource("r1")).unwrap_err();
        assert_eq!(err.code(), "LOCK_NOT_HELD");
    }

    #[tokio::test]
    async fn waiters_served_fifo() {
        let (locks, _rx) = LockManager::new();
        let r = resource("r");
        locks.acquire(&agent("holder"), &r).await.unwrap();

        let l1 = locks.clone();
        let r1 = r.clone();
        let first = tokio::spawn(async move { l1.acquire(&agent("first"), &r1).await });
        // Let "first" enqueue before "second".
        tokio::time::sleep(Duration::from_millis(20)).await;
        let l2 = locks.clone();
        let r2 = r.clone();
        let second = tokio::spawn(async move { l2.acquire(&agent("second"), &r2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release(&agent("holder"), &r).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(locks.holdings().held[&r], agent("first"));

        locks.release(&agent("first"), &r).unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(locks.holdings().held[&r], agent("second"));
    }

    #[tokio::test]
    async fn two_agent_deadlock_resolved_to_younger_attempt() {
        let (locks, mut rx) = LockManager::new();
        let x = agent("x");
        let y = agent("y");
        let r1 = resource("r1");
        let r2 = resource("r2");

        locks.acquire(&x, &r1).await.unwrap();
        locks.acquire(&y, &r2).await.unwrap();

        // X waits on r2 (third attempt overall).
        let lx = locks.clone();
        let (xc, r2c) = (x.clone(), r2.clone());
        let x_wait = tokio::spawn(async move { lx.acquire(&xc, &r2c).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Y waits on r1 (fourth attempt), closing the cycle; detection
        // runs on enqueue.
        let y_result = locks.acquire(&y, &r1).await;
        assert_eq!(y_result.unwrap_err().code(), "LOCK_DEADLOCK");

        // Y was the victim (most recent attempt); X got r2.
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.agent, y);
        x_wait.await.unwrap().unwrap();
        assert_eq!(locks.holdings().held[&r2], x);
    }

    #[tokio::test]
    async fn periodic_poll_finds_cycles() {
        let (locks, mut rx) = LockManager::new();
        let a = agent("a");
        let b = agent("b");
        let r1 = resource("r1");
        let r2 = resource("r2");

        locks.acquire(&a, &r1).await.unwrap();
        locks.acquire(&b, &r2).await.unwrap();

        let l1 = locks.clone();
        let (ac, r2c) = (a.clone(), r2.clone());
        let wait_a = tokio::spawn(async move { l1.acquire(&ac, &r2c).await });
        let l2 = locks.clone();
        let (bc, r1c) = (b.clone(), r1.clone());
        let wait_b = tokio::spawn(async move { l2.acquire(&bc, &r1c).await });

        let detector = locks.spawn_detector(Duration::from_millis(50));
        let notice = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("cycle resolved within one poll period")
            .unwrap();
        detector.abort();

        // Exactly one of the two was aborted; the other proceeded.
        let (victim_result, survivor_result) = if notice.agent == a {
            (wait_a.await.unwrap(), wait_b.await.unwrap())
        } else {
            (wait_b.await.unwrap(), wait_a.await.unwrap())
        };
        assert_eq!(victim_result.unwrap_err().code(), "LOCK_DEADLOCK");
        survivor_result.unwrap();
    }

    #[tokio::test]
    async fn cancel_waits_dequeues_with_error() {
        let (locks, _rx) = LockManager::new();
        let r = resource("r");
        locks.acquire(&agent("holder"), &r).await.unwrap();

        let l = locks.clone();
        let rc = r.clone();
        let waiter = tokio::spawn(async move { l.acquire(&agent("w"), &rc).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.cancel_waits(&agent("w"));
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "LOCK_CANCELLED");
        assert!(locks.holdings().waiting.get(&r).is_none());
    }

    #[tokio::test]
    async fn release_all_regrants() {
        let (locks, _rx) = LockManager::new();
        let h = agent("holder");
        locks.acquire(&h, &resource("a")).await.unwrap();
        locks.acquire(&h, &resource("b")).await.unwrap();

        let l = locks.clone();
        let waiter = tokio::spawn(async move { l.acquire(&agent("w"), &resource("a")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release_all(&h);
        waiter.await.unwrap().unwrap();
        let holdings = locks.holdings();
        assert_eq!(holdings.held.get(&resource("a")), Some(&agent("w")));
        assert_eq!(holdings.held.get(&resource("b")), None);
    }

    #[test]
    fn exclusivity_invariant_in_holdings() {
        // holdings() maps each resource to at most one holder by
        // construction; exercised indirectly everywhere above, checked
        // directly here.
        let (locks, _rx) = LockManager::new();
        let holdings = locks.holdings();
        assert!(holdings.held.is_empty());
        assert!(holdings.waiting.is_empty());
    }
}
