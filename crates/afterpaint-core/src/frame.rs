//! Frame boundaries.
//!
//! [`FrameSource`] is the platform seam: something that can call back once
//! the next frame has been produced. Hosts with a render loop plug in their
//! own (or drive a [`ManualFrameSource`] from it); everyone else gets the
//! [`TimerFrameSource`] fallback, a minimal-delay tokio timer.
//!
//! [`FrameSynchronizer`] sits on top and coalesces waits: any number of
//! callers asking for "the next frame" before it arrives share one armed
//! registration and one [`Deferred`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::deferred::Deferred;

/// Callback invoked once a frame boundary has passed.
pub type FrameCallback = Box<dyn FnOnce()>;

/// Identifies one armed frame registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameRequest(pub u64);

/// Platform frame-callback primitive.
///
/// `request_frame` must not invoke the callback before returning.
///
/// The callback marks the point where the frame has been *presented*, not
/// the point where it is about to be drawn. A source built on a
/// before-paint hook (an animation-frame callback) has to defer one more
/// zero-delay turn from inside that hook before invoking the callback, or
/// settle signals resolve before the flushed work is on screen.
pub trait FrameSource {
    /// Arm a one-shot callback for the next frame boundary.
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest;

    /// Disarm a registration. Returns `false` if it already fired or was
    /// never armed.
    fn cancel_frame(&self, request: FrameRequest) -> bool;
}

// =============================================================================
// Timer fallback
// =============================================================================

/// Minimal-delay timer used when no frame-callback API is available.
///
/// Each registration is a `spawn_local` task sleeping for `delay`, so this
/// must be used from inside a [`tokio::task::LocalSet`].
///
/// # Panics
///
/// `request_frame` panics when called outside a `LocalSet`.
pub struct TimerFrameSource {
    delay: Duration,
    next_id: Cell<u64>,
    armed: Rc<RefCell<BTreeMap<u64, AbortHandle>>>,
}

impl TimerFrameSource {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_id: Cell::new(0),
            armed: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of timers currently armed.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.armed.borrow().len()
    }
}

impl FrameSource for TimerFrameSource {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let delay = self.delay;
        let armed = Rc::downgrade(&self.armed);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(armed) = armed.upgrade() {
                armed.borrow_mut().remove(&id);
            }
            callback();
        });
        self.armed.borrow_mut().insert(id, handle.abort_handle());
        FrameRequest(id)
    }

    fn cancel_frame(&self, request: FrameRequest) -> bool {
        match self.armed.borrow_mut().remove(&request.0) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TimerFrameSource {
    fn drop(&mut self) {
        let armed = std::mem::take(&mut *self.armed.borrow_mut());
        for handle in armed.into_values() {
            handle.abort();
        }
    }
}

impl fmt::Debug for TimerFrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerFrameSource")
            .field("delay", &self.delay)
            .field("armed", &self.armed())
            .finish()
    }
}

// =============================================================================
// Manually pumped frames
// =============================================================================

/// Frame source advanced explicitly by its owner.
///
/// A render loop calls [`fire`](Self::fire) after presenting each frame;
/// tests call it to step through frame boundaries deterministically.
#[derive(Default)]
pub struct ManualFrameSource {
    next_id: Cell<u64>,
    armed: RefCell<BTreeMap<u64, FrameCallback>>,
    fired: Cell<u64>,
}

impl ManualFrameSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Present one frame: run every callback armed before this call.
    ///
    /// Callbacks armed while firing wait for the next call. Returns how many
    /// callbacks ran.
    pub fn fire(&self) -> usize {
        let due = std::mem::take(&mut *self.armed.borrow_mut());
        self.fired.set(self.fired.get() + 1);
        let count = due.len();
        for (_, callback) in due {
            callback();
        }
        count
    }

    /// Number of registrations waiting for the next frame.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.armed.borrow().len()
    }

    /// Number of frames presented so far.
    #[must_use]
    pub fn frames_fired(&self) -> u64 {
        self.fired.get()
    }
}

impl FrameSource for ManualFrameSource {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.armed.borrow_mut().insert(id, callback);
        FrameRequest(id)
    }

    fn cancel_frame(&self, request: FrameRequest) -> bool {
        self.armed.borrow_mut().remove(&request.0).is_some()
    }
}

impl fmt::Debug for ManualFrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualFrameSource")
            .field("armed", &self.armed())
            .field("fired", &self.fired.get())
            .finish()
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

struct PendingFrame {
    signal: Deferred,
    request: Option<FrameRequest>,
}

#[derive(Default)]
struct SyncState {
    pending: Option<PendingFrame>,
    frames_armed: u64,
    torn_down: bool,
}

/// Coalescing "after next frame" waits over a [`FrameSource`].
pub struct FrameSynchronizer {
    source: Rc<dyn FrameSource>,
    state: Rc<RefCell<SyncState>>,
}

impl FrameSynchronizer {
    #[must_use]
    pub fn new(source: Rc<dyn FrameSource>) -> Self {
        Self {
            source,
            state: Rc::new(RefCell::new(SyncState::default())),
        }
    }

    /// The shared wait for the next frame boundary.
    ///
    /// Returns the in-flight signal if one exists; otherwise arms exactly one
    /// registration on the frame source.
    pub fn after_next_frame(&self) -> Deferred {
        let signal = {
            let mut state = self.state.borrow_mut();
            if let Some(pending) = &state.pending {
                return pending.signal.clone();
            }
            if state.torn_down {
                tracing::debug!("Frame wait requested after teardown; it will never resolve");
                return Deferred::new();
            }
            let signal = Deferred::new();
            state.pending = Some(PendingFrame {
                signal: signal.clone(),
                request: None,
            });
            state.frames_armed += 1;
            signal
        };

        let weak = Rc::downgrade(&self.state);
        let fired = signal.clone();
        let request = self
            .source
            .request_frame(Box::new(move || Self::on_frame(&weak, &fired)));

        if let Some(pending) = self.state.borrow_mut().pending.as_mut() {
            if pending.signal.ptr_eq(&signal) {
                pending.request = Some(request);
            }
        }
        tracing::trace!(request = request.0, "Armed frame wait");
        signal
    }

    fn on_frame(state: &Weak<RefCell<SyncState>>, signal: &Deferred) {
        let Some(state) = state.upgrade() else {
            return;
        };
        let current = {
            let mut state = state.borrow_mut();
            match &state.pending {
                Some(pending) if pending.signal.ptr_eq(signal) => state.pending.take(),
                _ => None,
            }
        };
        if let Some(pending) = current {
            tracing::trace!("Frame boundary reached");
            pending.signal.resolve();
        }
    }

    /// Whether a frame wait is currently in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    /// Total registrations armed over this synchronizer's lifetime.
    #[must_use]
    pub fn frames_armed(&self) -> u64 {
        self.state.borrow().frames_armed
    }

    /// Disarm any in-flight registration and drop its signal unresolved.
    ///
    /// Idempotent. Later waits never resolve.
    pub fn teardown(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            state.torn_down = true;
            state.pending.take()
        };
        if let Some(PendingFrame {
            request: Some(request),
            ..
        }) = pending
        {
            let cancelled = self.source.cancel_frame(request);
            tracing::debug!(request = request.0, cancelled, "Cancelled pending frame wait");
        }
    }
}

impl fmt::Debug for FrameSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("FrameSynchronizer")
            .field("pending", &state.pending.is_some())
            .field("frames_armed", &state.frames_armed)
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> (Rc<ManualFrameSource>, FrameSynchronizer) {
        let source = Rc::new(ManualFrameSource::new());
        let sync = FrameSynchronizer::new(Rc::clone(&source) as Rc<dyn FrameSource>);
        (source, sync)
    }

    #[test]
    fn concurrent_waits_share_one_registration() {
        let (source, sync) = manual();
        let a = sync.after_next_frame();
        let b = sync.after_next_frame();
        assert!(a.ptr_eq(&b));
        assert_eq!(source.armed(), 1);
        assert_eq!(sync.frames_armed(), 1);

        source.fire();
        assert!(a.is_resolved());
        assert!(b.is_resolved());
        assert!(!sync.is_pending());
    }

    #[test]
    fn new_registration_only_after_previous_fired() {
        let (source, sync) = manual();
        let first = sync.after_next_frame();
        source.fire();
        let second = sync.after_next_frame();
        assert!(!first.ptr_eq(&second));
        assert!(!second.is_resolved());
        assert_eq!(sync.frames_armed(), 2);
        assert_eq!(source.armed(), 1);
    }

    #[test]
    fn wait_requested_inside_continuation_targets_next_frame() {
        let (source, sync) = manual();
        let sync = Rc::new(sync);
        let next = Rc::new(RefCell::new(None));
        let first = sync.after_next_frame();
        {
            let sync = Rc::clone(&sync);
            let next = Rc::clone(&next);
            first.on_resolve(move || *next.borrow_mut() = Some(sync.after_next_frame()));
        }
        source.fire();
        let next = next.borrow_mut().take().unwrap();
        assert!(!next.is_resolved());
        assert_eq!(source.armed(), 1);
        source.fire();
        assert!(next.is_resolved());
    }

    #[test]
    fn teardown_cancels_registration_without_resolving() {
        let (source, sync) = manual();
        let wait = sync.after_next_frame();
        sync.teardown();
        assert_eq!(source.armed(), 0);
        assert!(!sync.is_pending());
        source.fire();
        assert!(!wait.is_resolved());
    }

    #[test]
    fn teardown_is_idempotent_and_disables_new_waits() {
        let (source, sync) = manual();
        sync.teardown();
        sync.teardown();
        let wait = sync.after_next_frame();
        assert_eq!(source.armed(), 0);
        source.fire();
        assert!(!wait.is_resolved());
        assert_eq!(sync.frames_armed(), 0);
    }

    #[test]
    fn dropped_synchronizer_makes_callback_inert() {
        let (source, sync) = manual();
        let wait = sync.after_next_frame();
        drop(sync);
        assert_eq!(source.fire(), 1);
        assert!(!wait.is_resolved());
    }

    #[test]
    fn manual_source_defers_callbacks_armed_while_firing() {
        let source = Rc::new(ManualFrameSource::new());
        let inner = Rc::clone(&source);
        source.request_frame(Box::new(move || {
            inner.request_frame(Box::new(|| {}));
        }));
        assert_eq!(source.fire(), 1);
        assert_eq!(source.armed(), 1);
        assert_eq!(source.frames_fired(), 1);
    }

    #[test]
    fn manual_source_cancel() {
        let source = ManualFrameSource::new();
        let req = source.request_frame(Box::new(|| panic!("cancelled frame ran")));
        assert!(source.cancel_frame(req));
        assert!(!source.cancel_frame(req));
        assert_eq!(source.fire(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_source_resolves_after_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let source = Rc::new(TimerFrameSource::new(Duration::from_millis(16)));
                let sync = FrameSynchronizer::new(Rc::clone(&source) as Rc<dyn FrameSource>);
                let a = sync.after_next_frame();
                let b = sync.after_next_frame();
                assert_eq!(source.armed(), 1);

                a.wait().await;
                assert!(b.is_resolved());
                assert_eq!(source.armed(), 0);
                assert!(!sync.is_pending());
            })
            .await;
    }

    /// Animation-frame style source that hops one zero-delay timer turn
    /// after the hook fires, so the callback lands after paint.
    struct AfterPaint {
        hook: Rc<ManualFrameSource>,
        hop: Rc<TimerFrameSource>,
    }

    impl FrameSource for AfterPaint {
        fn request_frame(&self, callback: FrameCallback) -> FrameRequest {
            let hop = Rc::clone(&self.hop);
            self.hook.request_frame(Box::new(move || {
                hop.request_frame(callback);
            }))
        }

        fn cancel_frame(&self, request: FrameRequest) -> bool {
            self.hook.cancel_frame(request)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn before_paint_hook_with_hop_resolves_after_the_hook() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let hook = Rc::new(ManualFrameSource::new());
                let source = AfterPaint {
                    hook: Rc::clone(&hook),
                    hop: Rc::new(TimerFrameSource::new(Duration::ZERO)),
                };
                let sync = FrameSynchronizer::new(Rc::new(source) as Rc<dyn FrameSource>);
                let wait = sync.after_next_frame();

                hook.fire();
                assert!(!wait.is_resolved());
                wait.wait().await;
                assert!(!sync.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_source_cancel_aborts_timer() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let source = TimerFrameSource::new(Duration::ZERO);
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);
                let req = source.request_frame(Box::new(move || flag.set(true)));
                assert!(source.cancel_frame(req));
                assert!(!source.cancel_frame(req));
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert!(!ran.get());
                assert_eq!(source.armed(), 0);
            })
            .await;
    }
}
