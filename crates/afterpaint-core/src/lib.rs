//! afterpaint-core: Core library for afterpaint
//!
//! Defers non-critical work until a navigation has visibly settled, and
//! drops it if the user navigates away first.
//!
//! # Architecture
//!
//! ```text
//! Router ──► NavigationEvents ──► Scheduler ──► TaskQueue × 2
//!                                     │             │
//!                                     ▼             ▼
//!                            FrameSynchronizer   CancellationToken
//!                                     │
//!                                     ▼
//!                                FrameSource (render loop / timer fallback)
//! ```
//!
//! # Modules
//!
//! - `scheduler`: the two-phase reset/flush protocol
//! - `queue`: named FIFO task queues and their settled signals
//! - `token`: cancellation handles
//! - `frame`: frame sources and the coalescing frame synchronizer
//! - `deferred`: resolve-once signals (awaitable or continuation-based)
//! - `navigation`: router lifecycle events and an in-process bus
//! - `waiter`: drain predicates for test harnesses
//! - `config`: configuration management
//! - `logging`: tracing subscriber setup
//! - `error`: error types
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod logging;
pub mod navigation;
pub mod queue;
pub mod scheduler;
pub mod token;
pub mod waiter;

pub use config::Config;
pub use deferred::{Deferred, DeferredFuture};
pub use error::{Error, Result};
pub use frame::{FrameSource, FrameSynchronizer, ManualFrameSource, TimerFrameSource};
pub use navigation::{NavigationBus, NavigationEvents, TransitionEvent};
pub use queue::{QueueName, TaskQueue};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerSnapshot};
pub use token::CancellationToken;
pub use waiter::{DrainRegistry, Waiters};
