//! # minos: a tiny hybrid-preemptive thread kernel.
//!
//! minos multiplexes a handful of threads on a single core. Threads are
//! created once at setup time and never destroyed. The kernel is
//! cooperative at explicit [`yield_now`], [`sleep`], mutex lock and
//! semaphore wait call sites, and preemptive on timer ticks.
//!
//! Timer sources run on their own host threads. A tick is counted and
//! sleep countdowns advance the moment it fires. The running thread is
//! preempted at its next kernel safe point: the end of any critical
//! section, or an explicit [`poll_interrupts`]. A thread that computes
//! without entering the kernel keeps the processor until it does.
//!
//! The pieces, from the bottom up:
//!
//! - [`thread`]: the fixed-capacity thread table, thread creation and the
//!   [`Scheduler`] policy seam. The default policy, [`StaticPriority`], always
//!   runs the Ready thread with the lowest identity. Creation order is
//!   priority order.
//! - [`kernel`]: the [`Kernel`] object owning the thread table, the context
//!   switch and the idle loop.
//! - [`interrupt`]: the timer tick and uptime tick handlers.
//! - [`sync`]: [`Mutex`] and [`Semaphore`] built on the scheduler.
//! - [`power`]: stopping the kernel.
//!
//! Shared kernel state is protected only by suppressing preemption. minos
//! assumes a single core throughout.
//!
//! [`yield_now`]: Kernel::yield_now
//! [`sleep`]: Kernel::sleep
//! [`poll_interrupts`]: Kernel::poll_interrupts
//! [`Scheduler`]: thread::scheduler::Scheduler
//! [`StaticPriority`]: thread::scheduler::StaticPriority
//! [`Mutex`]: sync::Mutex
//! [`Semaphore`]: sync::Semaphore

pub mod config;
pub mod interrupt;
pub mod kernel;
pub mod power;
pub mod sync;
pub mod thread;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use kernel::{Kernel, SystemInfo, ThreadInfo};
pub use thread::{ThreadBuilder, ThreadState, Tid};

/// Maximum number of threads the thread table holds.
pub const MAX_THREADS: usize = 8;

/// Bytes of a thread's stack consumed by a saved context: the register
/// file pushed by the switch routine plus the frame pushed on interrupt
/// entry.
pub const CONTEXT_SAVE_FOOTPRINT: usize = 20 + 18;

/// Headroom added to every requested stack budget.
pub const STACK_BUFFER: usize = 64;

/// Errors reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The thread table is full.
    CapacityExceeded,
    /// The stack region of a new thread could not be allocated.
    NoMemory,
    /// A thread whose saved context is invalid was about to be resumed.
    InvalidContext,
    /// The entry point of a thread returned.
    ThreadReturned(Tid),
    /// The entry point of a thread panicked.
    ThreadPanicked(Tid),
    /// Every thread is Waiting; none can ever become Ready again.
    Deadlock,
    /// The kernel idled for longer than the configured idle timeout.
    Stalled,
    /// The kernel was already started.
    AlreadyStarted,
}

impl KernelError {
    /// Whether the error stops the kernel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::NoMemory
                | KernelError::InvalidContext
                | KernelError::ThreadReturned(_)
                | KernelError::ThreadPanicked(_)
                | KernelError::Deadlock
                | KernelError::Stalled
        )
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::CapacityExceeded => write!(f, "thread table is full"),
            KernelError::NoMemory => write!(f, "out of memory for a thread stack"),
            KernelError::InvalidContext => write!(f, "resumed an invalid context"),
            KernelError::ThreadReturned(tid) => write!(f, "entry point of {tid} returned"),
            KernelError::ThreadPanicked(tid) => write!(f, "{tid} panicked"),
            KernelError::Deadlock => write!(f, "every thread is waiting"),
            KernelError::Stalled => write!(f, "no thread became ready before the idle timeout"),
            KernelError::AlreadyStarted => write!(f, "kernel already started"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<bedrock::ContextError> for KernelError {
    fn from(e: bedrock::ContextError) -> Self {
        match e {
            bedrock::ContextError::NoMemory => KernelError::NoMemory,
            bedrock::ContextError::InvalidContext => KernelError::InvalidContext,
        }
    }
}
