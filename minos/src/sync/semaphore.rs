//! # Semaphore.
//!
//! A counting semaphore. [`wait`] decrements the counter and blocks the
//! caller when the result is negative; [`signal`] increments it and, when
//! threads are blocked, releases the one with the lowest identity. A
//! negative counter is the number of blocked waiters.
//!
//! A released waiter has already been accounted for by the counter; it does
//! not re-check anything when it resumes.
//!
//! [`wait`]: Semaphore::wait
//! [`signal`]: Semaphore::signal
use super::WaitList;
use crate::{Kernel, ThreadState, Tid};
use bedrock::SpinLock;
use std::sync::Arc;

struct SemaphoreState {
    count: isize,
    waiters: WaitList,
}

/// A counting semaphore.
///
/// # Examples
///
/// ```no_run
/// use minos::{Kernel, KernelConfig, ThreadBuilder, sync::Semaphore};
/// use std::sync::Arc;
///
/// let kernel = Kernel::new(KernelConfig::default());
/// let items = Arc::new(Semaphore::new(&kernel, 0));
///
/// let (consumer_items, k) = (items.clone(), kernel.clone());
/// ThreadBuilder::new("consumer")
///     .spawn(&kernel, move || loop {
///         consumer_items.wait();
///         k.yield_now();
///     })
///     .unwrap();
/// let k = kernel.clone();
/// ThreadBuilder::new("producer")
///     .spawn(&kernel, move || loop {
///         items.signal();
///         k.sleep(5);
///     })
///     .unwrap();
/// kernel.start().unwrap();
/// ```
pub struct Semaphore {
    kernel: Arc<Kernel>,
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    /// Creates a semaphore whose counter starts at `value`.
    pub fn new(kernel: &Arc<Kernel>, value: isize) -> Self {
        Self {
            kernel: kernel.clone(),
            state: SpinLock::new(SemaphoreState {
                count: value,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Decrements the counter, blocking the calling thread if it goes
    /// negative.
    ///
    /// Must be called from a kernel thread.
    pub fn wait(&self) {
        let guard = self.kernel.irq.disable();
        let mut state = self.state.lock();
        state.count -= 1;
        if state.count >= 0 {
            state.unlock();
            self.kernel.enable(guard);
            return;
        }
        let tid = self.kernel.current_thread();
        state.waiters.insert(tid);
        state.unlock();
        self.kernel.suspend(guard, ThreadState::Waiting);
    }

    /// Increments the counter. If a thread was blocked, the one with the
    /// lowest identity becomes Ready.
    pub fn signal(&self) {
        let guard = self.kernel.irq.disable();
        if let Some(tid) = self.release_one() {
            self.kernel.wake(tid);
        }
        self.kernel.enable(guard);
    }

    /// Increments the counter. If a thread was blocked, the one with the
    /// lowest identity runs immediately; the caller becomes Ready.
    ///
    /// Must be called from a kernel thread.
    pub fn signal_handoff(&self) {
        let guard = self.kernel.irq.disable();
        match self.release_one() {
            Some(tid) => self.kernel.hand_off(guard, tid),
            None => self.kernel.enable(guard),
        }
    }

    fn release_one(&self) -> Option<Tid> {
        let mut state = self.state.lock();
        let prev = state.count;
        state.count += 1;
        let released = if prev < 0 {
            state.waiters.pop_lowest()
        } else {
            None
        };
        state.unlock();
        released
    }

    /// Current value of the counter.
    pub fn value(&self) -> isize {
        self.state.with(|state| state.count)
    }
}
