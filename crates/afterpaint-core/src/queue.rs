//! Named task queues gated on a flush.
//!
//! A queue is *active* between a reset and the next flush. While active it
//! buffers `(callback, token)` entries in arrival order; once flushed it
//! stops buffering and new work runs straight away, until the next reset
//! reopens it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::deferred::Deferred;
use crate::error::UnknownQueueName;
use crate::token::CancellationToken;

/// Boxed zero-argument callback.
pub type Callback = Box<dyn FnOnce()>;

/// The two fixed phases work can be deferred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Flushed one frame after a transition settles.
    AfterFirstPaint,
    /// Flushed one frame after the first-paint flush.
    AfterContentPaint,
}

impl QueueName {
    pub const ALL: [Self; 2] = [Self::AfterFirstPaint, Self::AfterContentPaint];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AfterFirstPaint => "after-first-paint",
            Self::AfterContentPaint => "after-content-paint",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::AfterFirstPaint => 0,
            Self::AfterContentPaint => 1,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = UnknownQueueName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "after-first-paint" => Ok(Self::AfterFirstPaint),
            "after-content-paint" => Ok(Self::AfterContentPaint),
            other => Err(UnknownQueueName(other.to_string())),
        }
    }
}

/// One buffered unit of work.
pub struct Task {
    pub callback: Callback,
    pub token: CancellationToken,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("token", &self.token).finish()
    }
}

/// Outcome of [`TaskQueue::enqueue`].
pub enum Enqueue {
    /// The entry was buffered until the next flush.
    Buffered,
    /// The queue is inactive; the caller must invoke the callback now.
    RunNow(Callback),
}

impl fmt::Debug for Enqueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered => f.write_str("Buffered"),
            Self::RunNow(_) => f.write_str("RunNow(..)"),
        }
    }
}

/// Everything a flush needs, detached from the queue so callbacks can
/// re-enter the scheduler while the batch drains.
#[derive(Debug)]
pub struct FlushBatch {
    pub tasks: Vec<Task>,
    pub generation: u64,
    pub settled: Deferred,
}

/// Serializable status of a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: QueueName,
    pub active: bool,
    pub pending: usize,
    pub settled: bool,
    pub generation: u64,
}

/// An ordered buffer of deferred work for one phase.
pub struct TaskQueue {
    name: QueueName,
    tasks: Vec<Task>,
    active: bool,
    settled: Deferred,
    generation: u64,
}

impl TaskQueue {
    /// Create a queue in the freshly reset (active) state.
    #[must_use]
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            tasks: Vec::new(),
            active: true,
            settled: Deferred::new(),
            generation: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Drop buffered work unrun, reopen the queue and install a new
    /// settled signal. Holders of the previous signal never see it resolve.
    pub fn reset(&mut self) {
        let discarded = self.tasks.len();
        self.tasks = Vec::new();
        self.active = true;
        self.settled = Deferred::new();
        self.generation += 1;
        tracing::trace!(
            queue = %self.name,
            generation = self.generation,
            discarded,
            "Queue reset"
        );
    }

    /// Buffer the entry while active; otherwise hand the callback back.
    pub fn enqueue(&mut self, callback: Callback, token: CancellationToken) -> Enqueue {
        if self.active {
            self.tasks.push(Task { callback, token });
            Enqueue::Buffered
        } else {
            Enqueue::RunNow(callback)
        }
    }

    /// Close the queue and take the buffered batch.
    pub fn begin_flush(&mut self) -> FlushBatch {
        self.active = false;
        FlushBatch {
            tasks: std::mem::take(&mut self.tasks),
            generation: self.generation,
            settled: self.settled.clone(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The signal resolved one frame after this generation's flush.
    #[must_use]
    pub fn settled(&self) -> Deferred {
        self.settled.clone()
    }

    /// Still active, or flushed but not yet settled.
    #[must_use]
    pub fn has_unsettled_work(&self) -> bool {
        self.active || !self.settled.is_resolved()
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.name,
            active: self.active,
            pending: self.tasks.len(),
            settled: self.settled.is_resolved(),
            generation: self.generation,
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("pending", &self.tasks.len())
            .field("generation", &self.generation)
            .finish()
    }
}
