//! Saved execution contexts and the context switch.
//!
//! A [`Context`] is a suspended continuation: a stack plus everything needed
//! to resume execution on it. On the hosted build every context owns a host
//! thread and its stack. A suspended context is a host thread parked on its
//! resume flag. Switching sets the target's flag, wakes it, and parks the
//! caller until its own flag is set again.
//!
//! The baton passes strictly from one context to the next, so at most one
//! context executes at any instant.
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors from the context layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The stack region for a new context could not be allocated.
    NoMemory,
    /// The target context cannot be resumed.
    InvalidContext,
}

struct Baton {
    resume: AtomicBool,
    dead: AtomicBool,
}

impl Baton {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            resume: AtomicBool::new(false),
            dead: AtomicBool::new(false),
        })
    }

    /// Parks the calling host thread until it is handed the baton.
    fn wait(&self) {
        while !self.resume.swap(false, Ordering::AcqRel) {
            std::thread::park();
        }
    }
}

/// A saved execution context.
#[derive(Clone)]
pub struct Context {
    baton: Arc<Baton>,
    thread: std::thread::Thread,
}

impl Context {
    /// Captures the calling host thread as a context.
    ///
    /// Used for the boot context, which becomes the idle context once the
    /// kernel starts dispatching.
    pub fn current() -> Self {
        Self {
            baton: Baton::new(),
            thread: std::thread::current(),
        }
    }

    /// Allocates a stack of `stack_size` bytes and prepares a context that
    /// runs `body` on it when first resumed.
    ///
    /// The fresh context starts suspended; nothing runs until some context
    /// switches into it.
    pub fn spawn<F>(stack_size: usize, name: String, body: F) -> Result<Self, ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        let baton = Baton::new();
        let entry_baton = baton.clone();
        let handle = std::thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || {
                entry_baton.wait();
                body();
            })
            .map_err(|_| ContextError::NoMemory)?;
        Ok(Self {
            baton,
            thread: handle.thread().clone(),
        })
    }

    /// Whether the calling host thread is executing this context.
    pub fn is_current(&self) -> bool {
        self.thread.id() == std::thread::current().id()
    }

    /// Whether this context has finished and cannot be resumed.
    pub fn is_dead(&self) -> bool {
        self.baton.dead.load(Ordering::Acquire)
    }

    /// Saves the running context into `self` and resumes `to`.
    ///
    /// Returns once some other context switches back into `self`.
    ///
    /// # Panics
    /// Panics if the caller is not executing `self`.
    pub fn switch(&self, to: &Context) -> Result<(), ContextError> {
        assert!(self.is_current(), "context switch from a foreign context");
        to.resume()?;
        self.baton.wait();
        Ok(())
    }

    /// Marks `self` finished and resumes `to`. The caller must unwind out of
    /// its host thread without touching shared state afterwards.
    pub fn exit_to(&self, to: &Context) -> Result<(), ContextError> {
        assert!(self.is_current(), "context exit from a foreign context");
        self.baton.dead.store(true, Ordering::Release);
        to.resume()
    }

    fn resume(&self) -> Result<(), ContextError> {
        if self.is_dead() {
            return Err(ContextError::InvalidContext);
        }
        self.baton.resume.store(true, Ordering::Release);
        self.thread.unpark();
        Ok(())
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("thread", &self.thread.name())
            .field("dead", &self.is_dead())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn ping_pong() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let main = Context::current();
        let child_log = log.clone();
        let back = main.clone();
        let child = Arc::new(Mutex::new(None::<Context>));
        let slot = child.clone();
        let ctx = Context::spawn(64 * 1024, "pong".into(), move || {
            let me = slot.lock().unwrap().clone().unwrap();
            child_log.lock().unwrap().push("child 1");
            me.switch(&back).unwrap();
            child_log.lock().unwrap().push("child 2");
            me.exit_to(&back).unwrap();
        })
        .unwrap();
        *child.lock().unwrap() = Some(ctx.clone());

        log.lock().unwrap().push("main 1");
        main.switch(&ctx).unwrap();
        log.lock().unwrap().push("main 2");
        main.switch(&ctx).unwrap();
        log.lock().unwrap().push("main 3");
        assert!(ctx.is_dead());
        assert_eq!(main.switch(&ctx), Err(ContextError::InvalidContext));
        assert_eq!(
            *log.lock().unwrap(),
            ["main 1", "child 1", "main 2", "child 2", "main 3"]
        );
    }
}
