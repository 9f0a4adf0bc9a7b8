//! Cancellation handles for scheduled work.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Handle returned for every piece of scheduled work.
///
/// Clones share one flag: the caller keeps one handle and the queue entry
/// keeps the other. Cancelling only stops a callback that has not started
/// yet; it never interrupts or undoes one that already ran.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled from the start.
    #[must_use]
    pub(crate) fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Mark the work as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Whether both handles refer to the same flag.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
