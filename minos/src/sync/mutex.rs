//! # Mutex.
//!
//! A [`Mutex`] lets **only one thread at a time** past [`Mutex::lock`].
//! Unlike the spin lock, a thread that finds the mutex held does not spin:
//! it records itself in the mutex's wait list and blocks, letting other
//! threads run.
//!
//! Unlocking marks the mutex available and makes the pending thread with the
//! lowest identity Ready. The released thread does not own the mutex yet:
//! when it runs it checks availability again, and blocks again if some other
//! thread took the mutex in between.
use super::{WaitList, WouldBlock};
use crate::{Kernel, ThreadState};
use bedrock::SpinLock;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use std::sync::Arc;

struct MutexState {
    held: bool,
    waiters: WaitList,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`], which guarantees that the data is only ever accessed
/// when the mutex is locked.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```no_run
/// use minos::{Kernel, KernelConfig, ThreadBuilder, sync::Mutex};
/// use std::sync::Arc;
///
/// let kernel = Kernel::new(KernelConfig::default());
/// let data = Arc::new(Mutex::new(&kernel, 0));
///
/// for _ in 0..4 {
///     let (data, k) = (data.clone(), kernel.clone());
///     ThreadBuilder::new("work")
///         .spawn(&kernel, move || loop {
///             let mut data = data.lock();
///             *data += 1;
///             // the lock must be "explicitly" unlocked.
///             data.unlock();
///             k.sleep(1);
///         })
///         .unwrap();
/// }
/// kernel.start().unwrap();
/// ```
pub struct Mutex<T> {
    kernel: Arc<Kernel>,
    state: SpinLock<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(kernel: &Arc<Kernel>, t: T) -> Mutex<T> {
        Mutex {
            kernel: kernel.clone(),
            state: SpinLock::new(MutexState {
                held: false,
                waiters: WaitList::new(),
            }),
            data: UnsafeCell::new(t),
        }
    }

    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// Must be called from a kernel thread.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            let guard = self.kernel.irq.disable();
            let mut state = self.state.lock();
            if !state.held {
                state.held = true;
                state.unlock();
                self.kernel.enable(guard);
                return MutexGuard { lock: self };
            }
            let tid = self.kernel.current_thread();
            state.waiters.insert(tid);
            state.unlock();
            self.kernel.suspend(guard, ThreadState::Waiting);
        }
    }

    /// Attempts to acquire this lock without blocking.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        self.kernel.without_preemption(|| {
            let mut state = self.state.lock();
            let acquired = !state.held;
            state.held = true;
            state.unlock();
            if acquired {
                Ok(MutexGuard { lock: self })
            } else {
                Err(WouldBlock)
            }
        })
    }

    /// Whether the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.with(|state| state.held)
    }

    /// Number of threads blocked on the mutex.
    pub fn waiters(&self) -> usize {
        self.state.with(|state| state.waiters.len())
    }

    fn release(&self) {
        self.kernel.without_preemption(|| {
            let mut state = self.state.lock();
            state.held = false;
            let next = state.waiters.pop_lowest();
            state.unlock();
            if let Some(tid) = next {
                self.kernel.wake(tid);
            }
        })
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// An implementation of a "scoped lock" of a mutex. When this structure is
/// dropped (falls out of scope) without unlock, panic occurs.
///
/// The lock must be explicitly unlocked by [`unlock`] method.
///
/// [`unlock`]: Self::unlock
pub struct MutexGuard<'a, T> {
    lock: &'a Mutex<T>,
}

impl<T> MutexGuard<'_, T> {
    /// Releases the underlying [`Mutex`].
    ///
    /// Marks the mutex available and makes the pending thread with the
    /// lowest identity Ready.
    pub fn unlock(self) {
        self.lock.release();
        core::mem::forget(self);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // The owning thread is dying and the kernel stops with it.
            self.lock.state.with(|state| state.held = false);
        } else {
            panic!("`.unlock()` must be explicitly called before dropping MutexGuard.");
        }
    }
}
