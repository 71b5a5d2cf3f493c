//! # Bedrock: the machine underneath minos.
//!
//! Bedrock provides the small set of machine facilities that the minos kernel
//! builds on. On the single-core microcontroller the kernel was designed for,
//! these are a handful of registers and a naked assembly routine; on a hosted
//! build they are emulated with host threads so that the kernel above runs
//! unchanged and can be exercised by ordinary tests.
//!
//! - [`interrupt`]: the interrupt controller. Timer sources latch pending
//!   interrupt lines, and the running thread takes them when interrupts are
//!   enabled again. [`InterruptGuard`] suppresses preemption for a critical
//!   section.
//! - [`context`]: saved execution contexts and the context switch.
//! - [`spinlock`]: a spin lock whose guard must be explicitly unlocked.
//! - [`timer`]: periodic timer sources running a handler on their own host
//!   thread.
//!
//! Everything here assumes a **single core**: at most one context executes
//! kernel code at any instant.
//!
//! [`InterruptGuard`]: interrupt::InterruptGuard

pub mod context;
pub mod interrupt;
pub mod spinlock;
pub mod timer;

pub use context::{Context, ContextError};
pub use interrupt::{InterruptController, InterruptGuard, InterruptState, Irq};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use timer::PeriodicTimer;
