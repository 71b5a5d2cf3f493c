//! Thread scheduler
use super::{ThreadState, ThreadTable, Tid};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] decides which thread runs next whenever the running
/// thread gives up the processor: on a tick, when it sleeps or blocks, and
/// when the idle context looks for work. The scheduler only inspects the
/// thread table; state transitions are made by the kernel.
pub trait Scheduler: Send + Sync {
    /// Peek a next thread to run.
    ///
    /// Returns `None` if no thread is Ready, in which case the kernel idles.
    fn next_to_run(&self, table: &ThreadTable) -> Option<Tid>;

    /// Peek a next thread to run after `current` voluntarily yields.
    ///
    /// `current` has already been marked Ready. The default scans forward
    /// from the slot after `current`, wrapping around the table, so a
    /// yielding thread runs again only when nothing else is Ready.
    fn next_after_yield(&self, table: &ThreadTable, current: Tid) -> Option<Tid> {
        let n = table.len();
        (1..=n)
            .map(|step| (current.index() + step) % n)
            .filter_map(|idx| table.threads.get(idx))
            .find(|th| th.state == ThreadState::Ready)
            .map(|th| th.tid)
    }
}

/// Static-priority scheduling.
///
/// Scans identities in ascending order from 0 and picks the first Ready
/// thread. A thread created earlier therefore always preempts a later one
/// when both are Ready. This is not fair: a thread that never blocks or
/// sleeps starves every thread created after it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPriority;

impl Scheduler for StaticPriority {
    fn next_to_run(&self, table: &ThreadTable) -> Option<Tid> {
        table
            .iter()
            .find(|th| th.state == ThreadState::Ready)
            .map(|th| th.tid)
    }
}

/// Round-robin scheduling.
///
/// Every selection continues the scan after the thread that ran last, so
/// all Ready threads share the processor.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl Scheduler for RoundRobin {
    fn next_to_run(&self, table: &ThreadTable) -> Option<Tid> {
        match table.current() {
            Some(current) => self.next_after_yield(table, current),
            None => StaticPriority.next_to_run(table),
        }
    }
}
