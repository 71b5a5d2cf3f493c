//! Interrupt controller.
//!
//! The controller has two jobs. First, it latches interrupt lines raised by
//! timer sources until the running context is ready to take them. Second, it
//! tracks how deeply preemption is currently suppressed.
//!
//! A pending line is serviced only when the suppression depth is zero. This
//! is the hosted equivalent of a latched interrupt firing on `sei`. The
//! kernel checks for pending lines at the end of every critical section, on
//! thread entry, and from the idle loop.
use crate::spinlock::SpinLock;
use bitflags::bitflags;
use core::sync::atomic::{AtomicIsize, AtomicU8, Ordering};
use std::time::{Duration, Instant};

bitflags! {
    /// Interrupt lines.
    pub struct Irq: u8 {
        /// Fast periodic tick driving preemption and sleep countdowns.
        const TIMER = 0b01;
        /// Slow periodic tick driving the uptime counter.
        const UPTIME = 0b10;
    }
}

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

/// The interrupt controller of a single core.
pub struct InterruptController {
    depth: AtomicIsize,
    pending: AtomicU8,
    waiter: SpinLock<Option<std::thread::Thread>>,
}

impl InterruptController {
    /// Creates a controller with interrupts enabled and no pending lines.
    pub const fn new() -> Self {
        Self {
            depth: AtomicIsize::new(0),
            pending: AtomicU8::new(0),
            waiter: SpinLock::new(None),
        }
    }

    /// Reads the current interrupt state.
    pub fn state(&self) -> InterruptState {
        if self.depth.load(Ordering::SeqCst) == 0 {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Current nesting depth of [`InterruptGuard`]s.
    pub fn depth(&self) -> isize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Disables interrupts until the returned guard is dropped.
    pub fn disable(&self) -> InterruptGuard<'_> {
        InterruptGuard::new(self)
    }

    /// Latches `irq` as pending and wakes a context blocked in
    /// [`wait_for_interrupt`].
    ///
    /// Safe to call from any host thread.
    ///
    /// [`wait_for_interrupt`]: Self::wait_for_interrupt
    pub fn raise(&self, irq: Irq) {
        self.pending.fetch_or(irq.bits(), Ordering::SeqCst);
        let waiter = self.waiter.lock();
        if let Some(th) = waiter.as_ref() {
            th.unpark();
        }
        waiter.unlock();
    }

    /// Lines currently latched.
    pub fn pending(&self) -> Irq {
        Irq::from_bits_truncate(self.pending.load(Ordering::SeqCst))
    }

    /// Clears and returns every latched line.
    pub fn take_pending(&self) -> Irq {
        Irq::from_bits_truncate(self.pending.swap(0, Ordering::SeqCst))
    }

    /// Registers the calling host thread as the one woken by [`raise`].
    ///
    /// [`raise`]: Self::raise
    pub fn set_waiter(&self) {
        self.waiter.with(|w| *w = Some(std::thread::current()));
    }

    /// Halts the calling context until a line is pending or `timeout`
    /// elapses. Returns whether a line is pending.
    ///
    /// The calling thread must have been registered with [`set_waiter`].
    ///
    /// [`set_waiter`]: Self::set_waiter
    pub fn wait_for_interrupt(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if !self.pending().is_empty() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    std::thread::park_timeout(deadline - now);
                }
                None => std::thread::park(),
            }
        }
    }

    /// Drops one suppression level held on behalf of a context that has just
    /// been switched into for the first time.
    ///
    /// # Safety
    /// A context switch always happens with exactly one guard level held by
    /// the switching context. A context resumed from a saved state releases
    /// that level when its own guard drops; a fresh context has no guard and
    /// must call this exactly once before doing anything else.
    pub unsafe fn enable_after_switch(&self) {
        let prev = self.depth.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When the
/// last nested guard is dropped they are enabled again. Pending lines are not
/// serviced by the guard itself; the owner of the controller polls after the
/// drop.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - A guard held across a context switch is released by the context that
///   is resumed, not by the one that created it.
pub struct InterruptGuard<'a> {
    controller: &'a InterruptController,
}

impl<'a> InterruptGuard<'a> {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    pub fn new(controller: &'a InterruptController) -> Self {
        controller.depth.fetch_add(1, Ordering::SeqCst);
        Self { controller }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        let prev = self.controller.depth.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
    }
}
