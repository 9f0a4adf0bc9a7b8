//! Scripted navigations against a timer-driven scheduler.
//!
//! Every navigation fires "transition starting", schedules a batch of
//! callbacks on both queues, then either settles and waits for the
//! scheduler to drain or is abandoned so the next navigation discards its
//! work.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use afterpaint_core::config::SchedulerConfig;
use afterpaint_core::navigation::NavigationEvents;
use afterpaint_core::waiter::DrainRegistry;
use afterpaint_core::{NavigationBus, QueueName, Scheduler, Waiters};
use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What to simulate. Zero disables `abandon_every` / `cancel_every`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub navigations: usize,
    pub tasks: usize,
    pub abandon_every: usize,
    pub cancel_every: usize,
    pub drain_timeout: Duration,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            navigations: 3,
            tasks: 4,
            abandon_every: 0,
            cancel_every: 0,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a simulation run.
///
/// `scheduled == executed (all queues) + cancelled + discarded`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub navigations: usize,
    pub abandoned_navigations: usize,
    pub scheduled: usize,
    pub executed: BTreeMap<QueueName, usize>,
    pub cancelled: usize,
    /// Live work dropped because its navigation never settled.
    pub discarded: usize,
    pub frames_armed: u64,
}

impl SimulationReport {
    #[must_use]
    pub fn executed_total(&self) -> usize {
        self.executed.values().sum()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "navigations: {} ({} abandoned)",
            self.navigations, self.abandoned_navigations
        )?;
        writeln!(f, "scheduled: {}", self.scheduled)?;
        for (queue, count) in &self.executed {
            writeln!(f, "executed {queue}: {count}")?;
        }
        writeln!(f, "cancelled: {}", self.cancelled)?;
        writeln!(f, "discarded: {}", self.discarded)?;
        write!(f, "frames armed: {}", self.frames_armed)
    }
}

fn is_nth(every: usize, index: usize) -> bool {
    every != 0 && (index + 1) % every == 0
}

/// Run `plan` against a scheduler using the timer frame fallback.
///
/// Must be polled inside a tokio `LocalSet`.
pub async fn run(plan: &Plan, config: SchedulerConfig) -> anyhow::Result<SimulationReport> {
    let bus = Rc::new(NavigationBus::new());
    let waiters = Rc::new(Waiters::new());
    let scheduler = Scheduler::builder(Rc::clone(&bus) as Rc<dyn NavigationEvents>)
        .drain_registry(Rc::clone(&waiters) as Rc<dyn DrainRegistry>)
        .config(config)
        .build();

    let counters: BTreeMap<QueueName, Rc<Cell<usize>>> = QueueName::ALL
        .into_iter()
        .map(|queue| (queue, Rc::default()))
        .collect();
    let mut report = SimulationReport {
        navigations: plan.navigations,
        ..SimulationReport::default()
    };

    for nav in 0..plan.navigations {
        bus.transition_starting();

        let mut live = 0;
        for (&queue, counter) in &counters {
            for task in 0..plan.tasks {
                let counter = Rc::clone(counter);
                let token = scheduler.schedule_work(queue, move || counter.set(counter.get() + 1));
                report.scheduled += 1;
                if is_nth(plan.cancel_every, task) {
                    scheduler.cancel_work(&token);
                    report.cancelled += 1;
                } else {
                    live += 1;
                }
            }
        }

        if is_nth(plan.abandon_every, nav) {
            debug!(navigation = nav, discarded = live, "Abandoning navigation before it settles");
            report.abandoned_navigations += 1;
            report.discarded += live;
            continue;
        }

        bus.transition_settled();
        waiters
            .wait_until_drained(DRAIN_POLL_INTERVAL, plan.drain_timeout)
            .await
            .with_context(|| format!("navigation {nav} never settled"))?;
        debug!(navigation = nav, "Navigation settled");
    }

    report.frames_armed = scheduler.snapshot().frames_armed;
    scheduler.teardown();
    report.executed = counters
        .into_iter()
        .map(|(queue, counter)| (queue, counter.get()))
        .collect();

    info!(
        navigations = report.navigations,
        executed = report.executed_total(),
        cancelled = report.cancelled,
        discarded = report.discarded,
        "Simulation finished"
    );
    Ok(report)
}
