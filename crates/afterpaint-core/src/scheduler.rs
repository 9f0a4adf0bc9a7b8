//! Frame-gated deferred work scheduler.
//!
//! Work is deferred into one of two queues and released by navigation:
//!
//! ```text
//! transition starting ──► reset both queues (unflushed work is dropped)
//!
//! transition settled ──► next frame ──► flush after-first-paint
//!                                           │
//!                                           ├─► next frame ──► first-paint settled
//!                                           │
//!                                           └─► next frame ──► flush after-content-paint
//!                                                                  │
//!                                                                  └─► next frame ──► content-paint settled
//! ```
//!
//! Both "next frame" waits issued right after the first-paint flush share a
//! single frame boundary, so first-paint settles on the same frame the
//! content-paint flush runs, just before it.
//!
//! Once a queue has flushed it stays open-but-inactive until the next
//! transition starts: new work scheduled in that window runs immediately.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::deferred::Deferred;
use crate::frame::{FrameSource, FrameSynchronizer, TimerFrameSource};
use crate::navigation::{NavigationEvents, SubscriptionId, TransitionEvent};
use crate::queue::{Enqueue, QueueName, QueueSnapshot, TaskQueue};
use crate::token::CancellationToken;
use crate::waiter::{DrainRegistry, WaiterId};

/// Serializable view of the whole scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Empty once torn down.
    pub queues: Vec<QueueSnapshot>,
    pub frame_pending: bool,
    pub frames_armed: u64,
    pub torn_down: bool,
}

struct Inner {
    /// `None` after teardown.
    queues: RefCell<Option<[TaskQueue; 2]>>,
    frames: FrameSynchronizer,
    navigation: Rc<dyn NavigationEvents>,
    subscriptions: RefCell<Vec<SubscriptionId>>,
    drain: RefCell<Option<(Rc<dyn DrainRegistry>, WaiterId)>>,
    torn_down: Cell<bool>,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    navigation: Rc<dyn NavigationEvents>,
    frame_source: Option<Rc<dyn FrameSource>>,
    drain_registry: Option<Rc<dyn DrainRegistry>>,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Use a platform frame-callback primitive instead of the timer fallback.
    #[must_use]
    pub fn frame_source(mut self, source: Rc<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// Register a drain predicate with a test harness.
    #[must_use]
    pub fn drain_registry(mut self, registry: Rc<dyn DrainRegistry>) -> Self {
        self.drain_registry = Some(registry);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to navigation and return the running scheduler.
    ///
    /// Without an explicit frame source this installs a
    /// [`TimerFrameSource`], which must then be driven from a tokio
    /// `LocalSet`.
    ///
    /// # Panics
    ///
    /// In debug builds, when no frame source was supplied and the caller is
    /// not inside a tokio runtime. Release builds defer that failure to the
    /// first frame wait.
    #[must_use]
    pub fn build(self) -> Scheduler {
        let source = self.frame_source.unwrap_or_else(|| {
            debug_assert!(
                tokio::runtime::Handle::try_current().is_ok(),
                "timer frame fallback needs a tokio runtime with a LocalSet; supply a frame source instead"
            );
            debug!(
                delay_ms = self.config.fallback_frame_delay_ms,
                "No frame source supplied; using timer fallback"
            );
            let fallback: Rc<dyn FrameSource> =
                Rc::new(TimerFrameSource::new(self.config.fallback_frame_delay()));
            fallback
        });

        let inner = Rc::new(Inner {
            queues: RefCell::new(Some(QueueName::ALL.map(TaskQueue::new))),
            frames: FrameSynchronizer::new(source),
            navigation: self.navigation,
            subscriptions: RefCell::new(Vec::new()),
            drain: RefCell::new(None),
            torn_down: Cell::new(false),
        });

        Inner::connect(&inner);
        if let Some(registry) = self.drain_registry {
            let weak = Rc::downgrade(&inner);
            let id = registry.register(Rc::new(move || {
                weak.upgrade().is_some_and(|inner| inner.has_pending_work())
            }));
            *inner.drain.borrow_mut() = Some((registry, id));
        }

        debug!("Scheduler started");
        Scheduler { inner }
    }
}

/// Deferred work scheduler owning the after-first-paint and
/// after-content-paint queues.
///
/// Single-threaded. Dropping the scheduler tears it down.
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    #[must_use]
    pub fn builder(navigation: Rc<dyn NavigationEvents>) -> SchedulerBuilder {
        SchedulerBuilder {
            navigation,
            frame_source: None,
            drain_registry: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Defer `callback` to `queue`.
    ///
    /// While the queue is active the callback is buffered until the queue
    /// flushes. Once flushed (until the next transition starts) the
    /// callback runs before this returns. Either way the returned token can
    /// be cancelled; cancelling work that already ran does nothing.
    pub fn schedule_work(
        &self,
        queue: QueueName,
        callback: impl FnOnce() + 'static,
    ) -> CancellationToken {
        self.inner.schedule_work(queue, Box::new(callback))
    }

    /// Cancel previously scheduled work.
    pub fn cancel_work(&self, token: &CancellationToken) {
        token.cancel();
    }

    /// Run `queue`'s buffered, non-cancelled callbacks in order, then
    /// resolve its settled signal one frame later.
    pub fn flush_queue(&self, queue: QueueName) {
        self.inner.flush_queue(queue);
    }

    /// The shared wait for the next frame boundary.
    pub fn after_next_frame(&self) -> Deferred {
        self.inner.frames.after_next_frame()
    }

    /// Signal resolved one frame after `queue`'s current flush.
    ///
    /// A reset replaces it; a replaced signal never resolves. `None` once
    /// torn down.
    #[must_use]
    pub fn settled(&self, queue: QueueName) -> Option<Deferred> {
        self.inner
            .queues
            .borrow()
            .as_ref()
            .map(|queues| queues[queue.index()].settled())
    }

    /// Whether `queue` is buffering (has not flushed since its last reset).
    #[must_use]
    pub fn is_active(&self, queue: QueueName) -> bool {
        self.inner
            .queues
            .borrow()
            .as_ref()
            .is_some_and(|queues| queues[queue.index()].is_active())
    }

    /// Number of callbacks buffered in `queue`.
    #[must_use]
    pub fn pending_len(&self, queue: QueueName) -> usize {
        self.inner
            .queues
            .borrow()
            .as_ref()
            .map_or(0, |queues| queues[queue.index()].len())
    }

    /// Whether either queue has unflushed or unsettled work.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.inner.has_pending_work()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let queues: Vec<QueueSnapshot> = self
            .inner
            .queues
            .borrow()
            .as_ref()
            .map(|queues| queues.iter().map(TaskQueue::snapshot).collect())
            .unwrap_or_default();
        SchedulerSnapshot {
            queues,
            frame_pending: self.inner.frames.is_pending(),
            frames_armed: self.inner.frames.frames_armed(),
            torn_down: self.inner.torn_down.get(),
        }
    }

    /// Release every external registration and drop buffered work.
    ///
    /// Idempotent; also runs on drop.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Inner {
    fn connect(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        let starting = this.navigation.subscribe(
            TransitionEvent::Starting,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.reset_queues();
                }
            }),
        );

        let weak = Rc::downgrade(this);
        let settled = this.navigation.subscribe(
            TransitionEvent::Settled,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::on_transition_settled(&inner);
                }
            }),
        );

        this.subscriptions.borrow_mut().extend([starting, settled]);
    }

    fn on_transition_settled(this: &Rc<Self>) {
        trace!("Transition settled; waiting for first paint");
        let weak = Rc::downgrade(this);
        this.frames.after_next_frame().on_resolve(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.flush_queue(QueueName::AfterFirstPaint);

            let weak = Rc::downgrade(&inner);
            inner.frames.after_next_frame().on_resolve(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.flush_queue(QueueName::AfterContentPaint);
                }
            });
        });
    }

    fn reset_queues(&self) {
        if let Some(queues) = self.queues.borrow_mut().as_mut() {
            for queue in queues.iter_mut() {
                queue.reset();
            }
            debug!("Transition starting; queues reset");
        }
    }

    fn schedule_work(&self, name: QueueName, callback: Box<dyn FnOnce()>) -> CancellationToken {
        let token = CancellationToken::new();
        let outcome = {
            let mut queues = self.queues.borrow_mut();
            let Some(queues) = queues.as_mut() else {
                warn!(queue = %name, "Work scheduled after teardown was dropped");
                return CancellationToken::cancelled();
            };
            queues[name.index()].enqueue(callback, token.clone())
        };

        match outcome {
            Enqueue::Buffered => trace!(queue = %name, "Buffered deferred work"),
            Enqueue::RunNow(callback) => {
                trace!(queue = %name, "Queue already flushed; running work immediately");
                callback();
            }
        }
        token
    }

    fn generation_of(&self, name: QueueName) -> Option<u64> {
        self.queues
            .borrow()
            .as_ref()
            .map(|queues| queues[name.index()].generation())
    }

    fn flush_queue(self: &Rc<Self>, name: QueueName) {
        let batch = {
            let mut queues = self.queues.borrow_mut();
            let Some(queues) = queues.as_mut() else {
                return;
            };
            queues[name.index()].begin_flush()
        };

        let total = batch.tasks.len();
        let mut ran = 0usize;
        let mut skipped = 0usize;
        for task in batch.tasks {
            // A callback may have started a new transition.
            if self.generation_of(name) != Some(batch.generation) {
                debug!(
                    queue = %name,
                    abandoned = total - ran - skipped,
                    "Queue reset during flush; abandoning rest of batch"
                );
                return;
            }
            if task.token.is_cancelled() {
                skipped += 1;
                continue;
            }
            (task.callback)();
            ran += 1;
        }
        debug!(queue = %name, generation = batch.generation, ran, skipped, "Flushed queue");

        let weak = Rc::downgrade(self);
        let settled = batch.settled;
        let generation = batch.generation;
        self.frames.after_next_frame().on_resolve(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.generation_of(name) == Some(generation) {
                settled.resolve();
                trace!(queue = %name, generation, "Queue settled");
            }
        });
    }

    fn has_pending_work(&self) -> bool {
        self.queues
            .borrow()
            .as_ref()
            .is_some_and(|queues| queues.iter().any(TaskQueue::has_unsettled_work))
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }

        let queues = self.queues.borrow_mut().take();
        let discarded: usize = queues.as_ref().map_or(0, |q| q.iter().map(TaskQueue::len).sum());
        drop(queues);

        for id in self.subscriptions.borrow_mut().drain(..) {
            self.navigation.unsubscribe(id);
        }

        if let Some((registry, id)) = self.drain.borrow_mut().take() {
            registry.unregister(id);
        }

        self.frames.teardown();
        debug!(discarded, "Scheduler torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ManualFrameSource;
    use crate::navigation::NavigationBus;
    use crate::waiter::Waiters;

    struct Harness {
        bus: Rc<NavigationBus>,
        frames: Rc<ManualFrameSource>,
        waiters: Rc<Waiters>,
        scheduler: Scheduler,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Harness {
        fn new() -> Self {
            let bus = Rc::new(NavigationBus::new());
            let frames = Rc::new(ManualFrameSource::new());
            let waiters = Rc::new(Waiters::new());
            let scheduler = Scheduler::builder(Rc::clone(&bus) as Rc<dyn NavigationEvents>)
                .frame_source(Rc::clone(&frames) as Rc<dyn FrameSource>)
                .drain_registry(Rc::clone(&waiters) as Rc<dyn DrainRegistry>)
                .build();
            Self {
                bus,
                frames,
                waiters,
                scheduler,
                log: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn record(&self, label: &'static str) -> impl FnOnce() + 'static {
            let log = Rc::clone(&self.log);
            move || log.borrow_mut().push(label)
        }

        fn log(&self) -> Vec<&'static str> {
            self.log.borrow().clone()
        }
    }

    #[test]
    fn queues_start_active() {
        let h = Harness::new();
        assert!(h.scheduler.is_active(QueueName::AfterFirstPaint));
        assert!(h.scheduler.is_active(QueueName::AfterContentPaint));
        assert!(h.scheduler.has_pending_work());
        assert_eq!(h.bus.subscriber_count(TransitionEvent::Starting), 1);
        assert_eq!(h.bus.subscriber_count(TransitionEvent::Settled), 1);
        assert_eq!(h.waiters.len(), 1);
    }

    #[test]
    fn manual_flush_runs_non_cancelled_in_order() {
        let h = Harness::new();
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("a"));
        let b = h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("b"));
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("c"));
        h.scheduler.cancel_work(&b);

        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        assert_eq!(h.log(), vec!["a", "c"]);
        assert!(!h.scheduler.is_active(QueueName::AfterFirstPaint));
        assert_eq!(h.scheduler.pending_len(QueueName::AfterFirstPaint), 0);
    }

    #[test]
    fn flush_settles_one_frame_later() {
        let h = Harness::new();
        h.scheduler.flush_queue(QueueName::AfterContentPaint);
        let settled = h.scheduler.settled(QueueName::AfterContentPaint).unwrap();
        assert!(!settled.is_resolved());
        h.frames.fire();
        assert!(settled.is_resolved());
    }

    #[test]
    fn inactive_queue_runs_work_synchronously() {
        let h = Harness::new();
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        let token = h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("now"));
        assert_eq!(h.log(), vec!["now"]);
        h.scheduler.cancel_work(&token);
        assert!(token.is_cancelled());
        assert_eq!(h.log(), vec!["now"]);
    }

    #[test]
    fn cancel_after_run_has_no_effect() {
        let h = Harness::new();
        let token = h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("x"));
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        h.scheduler.cancel_work(&token);
        h.scheduler.cancel_work(&token);
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        assert_eq!(h.log(), vec!["x"]);
    }

    #[test]
    fn callback_scheduling_into_flushing_queue_runs_inline() {
        let h = Harness::new();
        let log = Rc::clone(&h.log);
        let inner = Rc::clone(&h.scheduler.inner);
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, move || {
            log.borrow_mut().push("outer");
            let log = Rc::clone(&log);
            inner.schedule_work(
                QueueName::AfterFirstPaint,
                Box::new(move || log.borrow_mut().push("nested")),
            );
        });
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        assert_eq!(h.log(), vec!["outer", "nested"]);
    }

    #[test]
    fn reset_during_flush_abandons_rest_of_batch() {
        let h = Harness::new();
        let bus = Rc::clone(&h.bus);
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("first"));
        h.scheduler
            .schedule_work(QueueName::AfterFirstPaint, move || {
                bus.transition_starting();
            });
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("never"));
        let old_settled = h.scheduler.settled(QueueName::AfterFirstPaint).unwrap();

        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        assert_eq!(h.log(), vec!["first"]);
        assert!(h.scheduler.is_active(QueueName::AfterFirstPaint));

        h.frames.fire();
        assert!(!old_settled.is_resolved());
        assert!(
            !h.scheduler
                .settled(QueueName::AfterFirstPaint)
                .unwrap()
                .is_resolved()
        );
    }

    #[test]
    fn reset_between_flush_and_frame_leaves_signals_unresolved() {
        let h = Harness::new();
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        let old = h.scheduler.settled(QueueName::AfterFirstPaint).unwrap();
        h.bus.transition_starting();
        let fresh = h.scheduler.settled(QueueName::AfterFirstPaint).unwrap();
        h.frames.fire();
        assert!(!old.is_resolved());
        assert!(!fresh.is_resolved());
    }

    #[test]
    fn settled_transition_drives_both_phases() {
        let h = Harness::new();
        h.scheduler.schedule_work(QueueName::AfterContentPaint, h.record("content"));
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("first"));

        h.bus.transition_settled();
        assert!(h.log().is_empty());

        h.frames.fire();
        assert_eq!(h.log(), vec!["first"]);
        h.frames.fire();
        assert_eq!(h.log(), vec!["first", "content"]);
        assert!(h.waiters.has_pending_work());
        h.frames.fire();
        assert!(!h.scheduler.has_pending_work());
        assert!(!h.waiters.has_pending_work());
    }

    #[test]
    fn teardown_releases_everything_once() {
        let h = Harness::new();
        let captured = Rc::new(());
        let held = Rc::clone(&captured);
        h.scheduler
            .schedule_work(QueueName::AfterContentPaint, move || drop(held));
        h.scheduler.after_next_frame();
        assert_eq!(h.frames.armed(), 1);

        h.scheduler.teardown();
        h.scheduler.teardown();

        assert!(h.scheduler.is_torn_down());
        assert_eq!(Rc::strong_count(&captured), 1);
        assert_eq!(h.bus.subscriber_count(TransitionEvent::Starting), 0);
        assert_eq!(h.bus.subscriber_count(TransitionEvent::Settled), 0);
        assert!(h.waiters.is_empty());
        assert_eq!(h.frames.armed(), 0);
        assert!(h.scheduler.settled(QueueName::AfterFirstPaint).is_none());
        assert!(!h.scheduler.has_pending_work());
    }

    #[test]
    fn schedule_after_teardown_drops_callback() {
        let h = Harness::new();
        h.scheduler.teardown();
        let token = h.scheduler.schedule_work(QueueName::AfterFirstPaint, h.record("late"));
        assert!(token.is_cancelled());
        h.scheduler.flush_queue(QueueName::AfterFirstPaint);
        assert!(h.log().is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "timer frame fallback needs a tokio runtime")]
    fn timer_fallback_outside_runtime_fails_at_build() {
        let bus = Rc::new(NavigationBus::new());
        let _scheduler = Scheduler::builder(bus as Rc<dyn NavigationEvents>).build();
    }

    #[tokio::test]
    async fn timer_fallback_builds_inside_runtime() {
        let bus = Rc::new(NavigationBus::new());
        let scheduler = Scheduler::builder(bus as Rc<dyn NavigationEvents>).build();
        assert!(!scheduler.snapshot().frame_pending);
    }

    #[test]
    fn snapshot_serializes() {
        let h = Harness::new();
        h.scheduler.schedule_work(QueueName::AfterFirstPaint, || {});
        let snap = h.scheduler.snapshot();
        assert_eq!(snap.queues.len(), 2);
        assert_eq!(snap.queues[0].pending, 1);
        assert!(!snap.torn_down);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["queues"][0]["name"], "after-first-paint");
        assert_eq!(json["frames_armed"], 0);
    }
}
