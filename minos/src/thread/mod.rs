//! Threads.
//!
//! Every thread lives in the kernel's [`ThreadTable`] from creation until the
//! kernel stops. There is no exit path: an entry point is expected to loop
//! forever, and returning from it (or panicking) stops the kernel.
//!
//! A thread is identified by its [`Tid`], the index of its slot in the
//! table. Identities are handed out in creation order, which is also the
//! priority order of the default scheduler.
pub mod scheduler;

use crate::{CONTEXT_SAVE_FOOTPRINT, Kernel, KernelError, MAX_THREADS, STACK_BUFFER};
use arrayvec::ArrayVec;
use bedrock::Context;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::{panic::AssertUnwindSafe, sync::Arc};

/// Identity of a thread: its slot in the thread table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tid(u8);

impl Tid {
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index < MAX_THREADS);
        Tid(index as u8)
    }

    /// Slot index of the thread.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is runnable.
    Ready = 0,
    /// Thread is running.
    Running = 1,
    /// Thread is blocked on a mutex or semaphore.
    Waiting = 2,
    /// Thread is sleeping for a number of ticks.
    Sleeping = 3,
}

/// A thread control block.
pub struct Thread {
    pub(crate) tid: Tid,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    pub(crate) sleep_ticks: u32,
    pub(crate) stack_size: usize,
    pub(crate) context: Context,
}

impl Thread {
    /// Identity of the thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Name of the thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduling state of the thread.
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Ticks left before a Sleeping thread becomes Ready.
    pub fn sleep_ticks(&self) -> u32 {
        self.sleep_ticks
    }

    /// Size of the stack region: budget, context-save footprint and buffer.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

/// The fixed-capacity registry of thread control blocks.
///
/// `current` is `None` while the idle context runs.
pub struct ThreadTable {
    pub(crate) threads: ArrayVec<Thread, MAX_THREADS>,
    pub(crate) current: Option<Tid>,
    pub(crate) idle: Option<Context>,
}

impl ThreadTable {
    pub(crate) const fn new() -> Self {
        Self {
            threads: ArrayVec::new_const(),
            current: None,
            idle: None,
        }
    }

    /// Number of threads created so far.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no thread has been created.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// The running thread, or `None` while idle.
    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    /// Looks up a thread.
    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid.index())
    }

    /// Threads in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads.iter()
    }

    pub(crate) fn thread_mut(&mut self, tid: Tid) -> &mut Thread {
        &mut self.threads[tid.index()]
    }

    pub(crate) fn context_of(&self, tid: Option<Tid>) -> Option<Context> {
        match tid {
            Some(tid) => self.get(tid).map(|th| th.context.clone()),
            None => self.idle.clone(),
        }
    }

    /// Counts down every Sleeping thread, waking those that reach zero.
    pub(crate) fn update_sleepers(&mut self) {
        for th in self.threads.iter_mut() {
            if th.state == ThreadState::Sleeping {
                th.sleep_ticks = th.sleep_ticks.saturating_sub(1);
                if th.sleep_ticks == 0 {
                    th.state = ThreadState::Ready;
                }
            }
        }
    }
}

/// Size of the stack region reserved for a thread with `budget` bytes of
/// usable stack.
pub fn stack_region_size(budget: usize) -> usize {
    budget + CONTEXT_SAVE_FOOTPRINT + STACK_BUFFER
}

/// A struct to build a new thread.
///
/// # Examples
///
/// ```no_run
/// use minos::{Kernel, KernelConfig, ThreadBuilder};
///
/// let kernel = Kernel::new(KernelConfig::default());
/// let k = kernel.clone();
/// ThreadBuilder::new("worker")
///     .stack(128)
///     .spawn(&kernel, move || loop {
///         k.sleep(10);
///     })
///     .unwrap();
/// kernel.start().unwrap();
/// ```
pub struct ThreadBuilder {
    name: String,
    budget: usize,
}

impl ThreadBuilder {
    /// Default stack budget of a thread.
    pub const DEFAULT_BUDGET: usize = 128;

    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            budget: Self::DEFAULT_BUDGET,
        }
    }

    /// Sets the stack budget of the thread in bytes.
    pub fn stack(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Creates the thread in the Ready state.
    ///
    /// The thread first runs when the scheduler selects it. Fails with
    /// [`KernelError::CapacityExceeded`] if the thread table is full and
    /// with the fatal [`KernelError::NoMemory`] if its stack cannot be
    /// allocated.
    pub fn spawn<F>(self, kernel: &Arc<Kernel>, thread_fn: F) -> Result<Tid, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Self { name, budget } = self;
        let stack_size = stack_region_size(budget);
        let host_stack = stack_size.max(kernel.config.host_stack_floor);

        let guard = kernel.irq.disable();
        let mut table = kernel.table.lock();
        kernel.assert_on_cpu(&table);
        if table.threads.is_full() {
            table.unlock();
            kernel.enable(guard);
            return Err(KernelError::CapacityExceeded);
        }
        let tid = Tid::new(table.len());
        let k = kernel.clone();
        let context = match Context::spawn(host_stack, name.clone(), move || {
            thread_start(k, tid, thread_fn)
        }) {
            Ok(context) => context,
            Err(e) => {
                table.unlock();
                drop(guard);
                let e = KernelError::from(e);
                log::warn!("cannot allocate a stack for {name}: {e}");
                kernel.record_stop(Some(e));
                return Err(e);
            }
        };
        table.threads.push(Thread {
            tid,
            name,
            state: ThreadState::Ready,
            sleep_ticks: 0,
            stack_size,
            context,
        });
        table.unlock();
        kernel.enable(guard);
        log::debug!("created {tid} with a {stack_size}-byte stack");
        Ok(tid)
    }
}

/// The very beginning of a thread.
///
/// The context switch into a fresh thread happens with one interrupt guard
/// level held by the switching side, which the thread releases here before
/// running its entry point.
fn thread_start<F: FnOnce()>(kernel: Arc<Kernel>, tid: Tid, thread_fn: F) {
    unsafe { kernel.irq.enable_after_switch() };
    kernel.poll_interrupts();
    let error = match std::panic::catch_unwind(AssertUnwindSafe(thread_fn)) {
        Ok(()) => KernelError::ThreadReturned(tid),
        Err(_) => KernelError::ThreadPanicked(tid),
    };
    log::warn!("{error}");
    kernel.record_stop(Some(error));
    core::mem::forget(kernel.irq.disable());
    kernel.retire_current();
}

impl Kernel {
    /// Creates a thread running `entry(arg)` with a stack budget of
    /// `stack_budget` bytes.
    ///
    /// `entry` must never return; if it does, the kernel stops with
    /// [`KernelError::ThreadReturned`].
    pub fn create_thread<A>(
        self: &Arc<Self>,
        entry: fn(A),
        arg: A,
        stack_budget: usize,
    ) -> Result<Tid, KernelError>
    where
        A: Send + 'static,
    {
        ThreadBuilder::new(format!("thread-{}", self.system_info().threads.len()))
            .stack(stack_budget)
            .spawn(self, move || entry(arg))
    }
}
