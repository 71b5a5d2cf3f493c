//! Timer interrupt handlers.
//!
//! Two periodic sources drive the kernel. The fast timer tick counts down
//! sleepers and preempts the running thread. The slow uptime tick only
//! advances the uptime counter.
//!
//! A source runs on its own host thread. It does its bookkeeping there as
//! soon as the tick fires, under the thread table lock, so the interrupt
//! count and sleep countdowns advance even while the running thread never
//! enters the kernel. The preemption itself needs the running context, so
//! the source latches [`Irq::TIMER`] and the running thread is preempted at
//! its next kernel safe point: the end of a critical section, thread entry,
//! or an explicit [`Kernel::poll_interrupts`].
use crate::{
    Kernel,
    thread::{ThreadState, ThreadTable},
};
use bedrock::{InterruptGuard, InterruptState, Irq, SpinLockGuard};
use core::sync::atomic::Ordering;

impl Kernel {
    /// Takes pending interrupt lines until none is left, unless preemption
    /// is suppressed.
    ///
    /// A handler that switches away comes back here when its context is
    /// resumed, and lines latched in the meantime are taken by the same
    /// loop. Handlers never poll themselves.
    pub fn poll_interrupts(&self) {
        loop {
            if self.irq.state() == InterruptState::Off {
                return;
            }
            let pending = self.irq.take_pending();
            if pending.is_empty() {
                return;
            }
            if pending.contains(Irq::UPTIME) {
                self.handle_uptime_tick();
            }
            if pending.contains(Irq::TIMER) {
                self.preempt();
            }
        }
    }

    /// The timer tick handler, invoked directly by the running context.
    ///
    /// Counts the interrupt, counts down every Sleeping thread (waking those
    /// that reach zero), then preempts the running thread: it becomes Ready
    /// and the scheduler picks who runs next. Must be called with
    /// preemption enabled.
    pub fn handle_timer_tick(&self) {
        let guard = self.irq.disable();
        let mut table = self.table.lock();
        self.assert_on_cpu(&table);
        self.account_tick(&mut table);
        self.reschedule(guard, table);
        self.poll_interrupts();
    }

    /// The uptime tick handler.
    pub fn handle_uptime_tick(&self) {
        let uptime = self.uptime.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("uptime {uptime}");
    }

    /// A tick from the timer source, on the source's host thread.
    pub(crate) fn timer_interrupt(&self) {
        let mut table = self.table.lock();
        self.account_tick(&mut table);
        table.unlock();
        self.irq.raise(Irq::TIMER);
    }

    fn account_tick(&self, table: &mut ThreadTable) {
        let count = self.interrupts.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("tick {count}");
        table.update_sleepers();
    }

    /// Takes a latched timer line.
    fn preempt(&self) {
        let guard = self.irq.disable();
        let table = self.table.lock();
        self.assert_on_cpu(&table);
        self.reschedule(guard, table);
    }

    /// Marks the running thread Ready and switches to the scheduler's pick.
    ///
    /// Releases `guard` without polling, once the caller runs again.
    fn reschedule(&self, guard: InterruptGuard<'_>, mut table: SpinLockGuard<'_, ThreadTable>) {
        match table.current {
            Some(current) => {
                table.thread_mut(current).state = ThreadState::Ready;
                let next = self.config.scheduler.next_to_run(&table);
                self.switch_to(table, next);
            }
            // The idle loop dispatches once it sees a Ready thread.
            None => table.unlock(),
        }
        drop(guard);
    }
}
