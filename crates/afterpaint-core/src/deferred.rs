//! Resolve-once signals shared on a single thread.
//!
//! A [`Deferred`] is both the resolver and the observable side: every clone
//! sees the same state. Observers either `.await` a [`DeferredFuture`] or
//! register a synchronous continuation with [`Deferred::on_resolve`].
//! Continuations run in registration order at the moment of resolution,
//! after the internal borrow is released, so they may freely touch the
//! signal (or anything else) again.
//!
//! A signal that is dropped without being resolved simply never completes;
//! there is no "broken" state.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

type Continuation = Box<dyn FnOnce()>;

#[derive(Default)]
struct Core {
    resolved: bool,
    wakers: Vec<Waker>,
    continuations: Vec<Continuation>,
}

/// A clonable, resolve-once signal carrying no value.
#[derive(Clone, Default)]
pub struct Deferred {
    core: Rc<RefCell<Core>>,
}

impl Deferred {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the signal, waking awaiters and running continuations.
    ///
    /// Returns `false` if it was already resolved, in which case nothing runs.
    pub fn resolve(&self) -> bool {
        let (wakers, continuations) = {
            let mut core = self.core.borrow_mut();
            if core.resolved {
                return false;
            }
            core.resolved = true;
            (
                std::mem::take(&mut core.wakers),
                std::mem::take(&mut core.continuations),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation();
        }
        true
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.core.borrow().resolved
    }

    /// Run `f` once the signal resolves, or right away if it already has.
    pub fn on_resolve(&self, f: impl FnOnce() + 'static) {
        {
            let mut core = self.core.borrow_mut();
            if !core.resolved {
                core.continuations.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// A future that completes when the signal resolves.
    #[must_use]
    pub fn wait(&self) -> DeferredFuture {
        DeferredFuture {
            core: Rc::clone(&self.core),
        }
    }

    /// Whether both handles share one underlying signal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Deferred")
            .field("resolved", &core.resolved)
            .field("waiting", &(core.wakers.len() + core.continuations.len()))
            .finish()
    }
}

/// Future side of a [`Deferred`].
#[must_use = "futures do nothing unless polled"]
pub struct DeferredFuture {
    core: Rc<RefCell<Core>>,
}

impl Future for DeferredFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut core = self.core.borrow_mut();
        if core.resolved {
            return Poll::Ready(());
        }
        if !core.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            core.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for DeferredFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredFuture")
            .field("resolved", &self.core.borrow().resolved)
            .finish()
    }
}
