//! Per-action-kind rolling-window throttle for write calls.
//!
//! Each [`ActionKind`] has an independent budget of `count` actions per
//! rolling `window`. [`ActionThrottle::permit`] reserves a slot; the slot is
//! only counted against the window once the returned [`Permit`] is committed
//! at dispatch. Dropping an uncommitted permit releases the reservation, so a
//! checked-then-abandoned call never consumes budget, while two concurrent
//! writers can never both be handed the last slot.
//!
//! A limit of `0` (or a zero window) disables throttling for that kind.
//! Read calls never pass through here.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shutter::ActionKind;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ThrottleLimit;

// ---------------------------------------------------------------------------
// Denied
// ---------------------------------------------------------------------------

/// The budget for `kind` is spent; `wait` is how long until a slot frees up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} budget exhausted, retry in {wait:?}")]
pub struct Denied {
    pub kind: ActionKind,
    pub wait: Duration,
}

// ---------------------------------------------------------------------------
// ActionThrottle
// ---------------------------------------------------------------------------

type Budgets = Arc<Mutex<HashMap<ActionKind, Budget>>>;

#[derive(Default)]
struct Budget {
    /// Dispatch times of committed actions still inside the window, oldest first.
    committed: VecDeque<Instant>,

    /// Permits handed out but not yet committed or dropped.
    reserved: u32,
}

impl Budget {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.committed.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.committed.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct ActionThrottle {
    limits: HashMap<ActionKind, ThrottleLimit>,
    state: Budgets,
}

impl ActionThrottle {
    pub fn new(limits: HashMap<ActionKind, ThrottleLimit>) -> Self {
        Self {
            limits,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve a slot for one `kind` action.
    ///
    /// Returns a [`Permit`] if the budget has room, or [`Denied`] with the
    /// time until the oldest counted action leaves the window. Kinds without
    /// a configured limit are always allowed.
    pub fn permit(&self, kind: ActionKind) -> Result<Permit, Denied> {
        let limit = match self.limits.get(&kind) {
            Some(limit) if !limit.is_unlimited() => *limit,
            _ => return Ok(Permit::unlimited(kind)),
        };

        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let budget = state.entry(kind).or_default();
        budget.prune(now, limit.window);

        let used = budget.committed.len() as u64 + u64::from(budget.reserved);
        if used >= u64::from(limit.count) {
            // Reservations count after every committed action, so only a
            // budget held entirely by reservations waits a full window.
            let wait = match budget.committed.front() {
                Some(&oldest) => (oldest + limit.window).saturating_duration_since(now),
                None => limit.window,
            };
            let wait = wait.max(Duration::from_millis(1));
            warn!("throttle: {kind} denied ({used}/{} in window), wait {wait:?}", limit.count);
            return Err(Denied { kind, wait });
        }

        budget.reserved += 1;
        debug!("throttle: {kind} reserved ({}/{})", used + 1, limit.count);
        Ok(Permit {
            kind,
            budgets: Some(Arc::clone(&self.state)),
            settled: false,
        })
    }

    /// Slots left for `kind` in the current window, counting reservations.
    /// `None` if `kind` is unlimited.
    pub fn remaining(&self, kind: ActionKind) -> Option<u32> {
        let limit = self.limits.get(&kind).filter(|l| !l.is_unlimited())?;
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let budget = state.entry(kind).or_default();
        budget.prune(Instant::now(), limit.window);
        let used = u32::try_from(budget.committed.len())
            .unwrap_or(u32::MAX)
            .saturating_add(budget.reserved);
        Some(limit.count.saturating_sub(used))
    }

    pub fn limit(&self, kind: ActionKind) -> Option<&ThrottleLimit> {
        self.limits.get(&kind)
    }
}

// ---------------------------------------------------------------------------
// Permit
// ---------------------------------------------------------------------------

/// A reserved throttle slot. Call [`Permit::commit`] when the write is
/// actually sent; dropping it uncommitted gives the slot back.
#[must_use = "an uncommitted permit is released when dropped"]
pub struct Permit {
    kind: ActionKind,
    budgets: Option<Budgets>,
    settled: bool,
}

impl Permit {
    fn unlimited(kind: ActionKind) -> Self {
        Self {
            kind,
            budgets: None,
            settled: true,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Count this action against the window, timestamped now.
    pub fn commit(mut self) {
        if let Some(budgets) = self.budgets.take() {
            let mut state = budgets.lock().unwrap_or_else(|p| p.into_inner());
            let budget = state.entry(self.kind).or_default();
            budget.reserved = budget.reserved.saturating_sub(1);
            budget.committed.push_back(Instant::now());
        }
        self.settled = true;
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(budgets) = self.budgets.take() {
            let mut state = budgets.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(budget) = state.get_mut(&self.kind) {
                budget.reserved = budget.reserved.saturating_sub(1);
            }
            debug!("throttle: {} reservation released", self.kind);
        }
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("kind", &self.kind)
            .field("limited", &self.budgets.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
