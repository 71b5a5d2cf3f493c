//! Synchronization primitives built on the scheduler.
//!
//! Both primitives keep their waiters in a [`WaitList`], one flag per
//! possible thread identity. Waiters are released in ascending identity
//! order, not arrival order, which matches the static-priority policy.
pub mod mutex;
pub mod semaphore;

pub use bedrock::WouldBlock;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;

use crate::{MAX_THREADS, thread::Tid};

/// The set of threads blocked on a primitive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitList {
    pending: [bool; MAX_THREADS],
}

impl WaitList {
    /// An empty wait list.
    pub const fn new() -> Self {
        Self {
            pending: [false; MAX_THREADS],
        }
    }

    /// Records `tid` as pending.
    pub fn insert(&mut self, tid: Tid) {
        self.pending[tid.index()] = true;
    }

    /// Whether `tid` is pending.
    pub fn contains(&self, tid: Tid) -> bool {
        self.pending[tid.index()]
    }

    /// Clears and returns the pending thread with the lowest identity.
    pub fn pop_lowest(&mut self) -> Option<Tid> {
        let idx = self.pending.iter().position(|&p| p)?;
        self.pending[idx] = false;
        Some(Tid::new(idx))
    }

    /// Number of pending threads.
    pub fn len(&self) -> usize {
        self.pending.iter().filter(|&&p| p).count()
    }

    /// Whether no thread is pending.
    pub fn is_empty(&self) -> bool {
        !self.pending.contains(&true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_by_identity_not_arrival() {
        let mut list = WaitList::new();
        list.insert(Tid::new(5));
        list.insert(Tid::new(1));
        list.insert(Tid::new(3));
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_lowest(), Some(Tid::new(1)));
        assert_eq!(list.pop_lowest(), Some(Tid::new(3)));
        assert!(!list.contains(Tid::new(3)));
        assert_eq!(list.pop_lowest(), Some(Tid::new(5)));
        assert_eq!(list.pop_lowest(), None);
        assert!(list.is_empty());
    }
}
