//! External collaborators sampled by the snapshotter.
//!
//! Both interfaces are read-only to the core and allowed to fail:
//! a failed probe is recorded as `unknown` in the summary rather than
//! omitted, so two snapshots of the same state stay byte-identical
//! whether or not the collaborator was reachable.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Version-control facts.
///
/// `None` means the probe failed; the snapshotter renders it as
/// `"unknown"`.
pub trait Vcs: Send + Sync {
    /// Current HEAD commit hash.
    fn head_commit(&self) -> Option<String>;
    /// Whether the working tree has uncommitted changes.
    fn is_dirty(&self) -> Option<bool>;
    /// Open external work items (PR identifiers or similar), opaque
    /// to the core.
    fn open_work_items(&self) -> Option<Vec<String>>;
}

/// Git-backed [`Vcs`] shelling out to the `git` binary.
pub struct GitVcs {
    root: PathBuf,
}

impl GitVcs {
    /// Probes the repository at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(args = ?args, "git probe failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl Vcs for GitVcs {
    fn head_commit(&self) -> Option<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn is_dirty(&self) -> Option<bool> {
        self.git(&["status", "--porcelain"])
            .map(|out| !out.is_empty())
    }

    fn open_work_items(&self) -> Option<Vec<String>> {
        // Work items live in an external tracker this deployment may
        // not have; callers wanting them plug in their own Vcs.
        None
    }
}

/// A [`Vcs`] that knows nothing. For deployments outside any
/// repository.
pub struct NullVcs;

impl Vcs for NullVcs {
    fn head_commit(&self) -> Option<String> {
        None
    }

    fn is_dirty(&self) -> Option<bool> {
        None
    }

    fn open_work_items(&self) -> Option<Vec<String>> {
        None
    }
}

/// Runway reported when the burn rate is zero.
pub const INFINITE_RUNWAY_DAYS: i64 = 999;

/// Treasury facts. Read-only to the core; the orchestrator halts
/// cycles when `runway_days()` drops under 30.
pub trait Treasury: Send + Sync {
    /// Current balance.
    fn balance(&self) -> Decimal;
    /// Spend per day.
    fn burn_rate_per_day(&self) -> Decimal;
    /// Days of runway left at the current burn rate.
    fn runway_days(&self) -> i64 {
        let burn = self.burn_rate_per_day();
        if burn <= Decimal::ZERO {
            return INFINITE_RUNWAY_DAYS;
        }
        (self.balance() / burn).to_i64().unwrap_or(0)
    }
}

/// Treasury with fixed facts from configuration.
pub struct StaticTreasury {
    balance: Decimal,
    burn_rate_per_day: Decimal,
}

impl StaticTreasury {
    /// Creates a treasury with the given facts.
    #[must_use]
    pub fn new(balance: Decimal, burn_rate_per_day: Decimal) -> Self {
        Self {
            balance,
            burn_rate_per_day,
        }
    }
}

impl From<&crate::config::TreasuryConfig> for StaticTreasury {
    fn from(config: &crate::config::TreasuryConfig) -> Self {
        Self::new(config.balance, config.burn_rate_per_day)
    }
}

impl Treasury for StaticTreasury {
    fn balance(&self) -> Decimal {
        self.balance
    }

    fn burn_rate_per_day(&self) -> Decimal {
        self.burn_rate_per_day
    }
}
