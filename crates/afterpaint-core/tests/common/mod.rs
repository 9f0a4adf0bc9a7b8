//! Shared fixtures for afterpaint-core integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use afterpaint_core::frame::FrameSource;
use afterpaint_core::navigation::NavigationEvents;
use afterpaint_core::waiter::DrainRegistry;
use afterpaint_core::{ManualFrameSource, NavigationBus, Scheduler, Waiters};

/// A scheduler wired to in-process collaborators that the test drives.
pub struct Rig {
    pub bus: Rc<NavigationBus>,
    pub frames: Rc<ManualFrameSource>,
    pub waiters: Rc<Waiters>,
    pub scheduler: Scheduler,
    pub log: Rc<RefCell<Vec<String>>>,
}

impl Rig {
    pub fn new() -> Self {
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

    /// Callback that appends `label` to the shared log.
    pub fn record(&self, label: impl Into<String>) -> impl FnOnce() + 'static {
        let log = Rc::clone(&self.log);
        let label = label.into();
        move || log.borrow_mut().push(label)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Fire frames until nothing is armed, returning how many fired.
    pub fn run_frames(&self, limit: usize) -> usize {
        let mut fired = 0;
        while self.frames.armed() > 0 && fired < limit {
            self.frames.fire();
            fired += 1;
        }
        fired
    }
}
