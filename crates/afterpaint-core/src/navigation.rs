//! Navigation lifecycle events.
//!
//! The scheduler only needs two payload-free events from the host router:
//! a transition is starting, and a transition has settled. Any router can
//! provide them by implementing [`NavigationEvents`]; [`NavigationBus`] is a
//! ready-made implementation a router emits into.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Handler invoked for a lifecycle event.
pub type TransitionHandler = Rc<dyn Fn()>;

/// Router lifecycle events the scheduler reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    /// A navigation is about to begin.
    Starting,
    /// The navigation completed and its route has rendered.
    Settled,
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Settled => f.write_str("settled"),
        }
    }
}

/// Identifies a subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Subscribable source of navigation lifecycle events.
pub trait NavigationEvents {
    fn subscribe(&self, event: TransitionEvent, handler: TransitionHandler) -> SubscriptionId;

    /// Returns `false` if the subscription was unknown or already removed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

struct Subscriber {
    id: SubscriptionId,
    event: TransitionEvent,
    handler: TransitionHandler,
}

/// In-process event bus for navigation lifecycle events.
///
/// Handlers run in subscription order. The subscriber list is snapshotted
/// before dispatch, so a handler may subscribe or unsubscribe without
/// affecting the emission in progress.
#[derive(Default)]
pub struct NavigationBus {
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<Subscriber>>,
}

impl NavigationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch `event` to its subscribers. Returns how many handlers ran.
    pub fn emit(&self, event: TransitionEvent) -> usize {
        let handlers: Vec<TransitionHandler> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.event == event)
            .map(|s| Rc::clone(&s.handler))
            .collect();

        tracing::debug!(%event, handlers = handlers.len(), "Navigation event");
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    /// Emit [`TransitionEvent::Starting`].
    pub fn transition_starting(&self) -> usize {
        self.emit(TransitionEvent::Starting)
    }

    /// Emit [`TransitionEvent::Settled`].
    pub fn transition_settled(&self) -> usize {
        self.emit(TransitionEvent::Settled)
    }

    #[must_use]
    pub fn subscriber_count(&self, event: TransitionEvent) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.event == event)
            .count()
    }
}

impl NavigationEvents for NavigationBus {
    fn subscribe(&self, event: TransitionEvent, handler: TransitionHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber { id, event, handler });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

impl fmt::Debug for NavigationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationBus")
            .field("starting", &self.subscriber_count(TransitionEvent::Starting))
            .field("settled", &self.subscriber_count(TransitionEvent::Settled))
            .finish()
    }
}
