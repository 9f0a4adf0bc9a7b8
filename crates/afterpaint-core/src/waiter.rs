//! Drain predicates for test harnesses.
//!
//! A harness that wants to block until deferred work has drained supplies a
//! [`DrainRegistry`]. Each registered predicate answers "is there still
//! unflushed or unsettled work?"; the harness polls until every predicate
//! answers `false`. [`Waiters`] is a registry with such a polling loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::error::DrainTimeout;

/// Predicate returning `true` while work is still outstanding.
pub type PendingCheck = Rc<dyn Fn() -> bool>;

/// Identifies a registered predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(pub u64);

/// Registry a harness polls for quiescence.
pub trait DrainRegistry {
    fn register(&self, check: PendingCheck) -> WaiterId;

    /// Returns `false` if the predicate was unknown or already removed.
    fn unregister(&self, id: WaiterId) -> bool;
}

/// Default [`DrainRegistry`].
#[derive(Default)]
pub struct Waiters {
    next_id: Cell<u64>,
    checks: RefCell<Vec<(WaiterId, PendingCheck)>>,
}

impl Waiters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any registered predicate still reports outstanding work.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        let checks: Vec<PendingCheck> = self
            .checks
            .borrow()
            .iter()
            .map(|(_, check)| Rc::clone(check))
            .collect();
        checks.iter().any(|check| check())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.borrow().is_empty()
    }

    /// Poll every `poll_interval` until no predicate reports work.
    ///
    /// Frame callbacks only make progress while this future yields, so it
    /// has to run on the same local executor as the scheduler's frame source.
    pub async fn wait_until_drained(
        &self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<(), DrainTimeout> {
        let started = tokio::time::Instant::now();
        loop {
            if !self.has_pending_work() {
                tracing::debug!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Deferred work drained"
                );
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(DrainTimeout { waited });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl DrainRegistry for Waiters {
    fn register(&self, check: PendingCheck) -> WaiterId {
        let id = WaiterId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.checks.borrow_mut().push((id, check));
        id
    }

    fn unregister(&self, id: WaiterId) -> bool {
        let mut checks = self.checks.borrow_mut();
        let before = checks.len();
        checks.retain(|(existing, _)| *existing != id);
        checks.len() != before
    }
}

impl fmt::Debug for Waiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiters").field("registered", &self.len()).finish()
    }
}
