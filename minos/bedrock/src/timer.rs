//! Periodic timer sources.
//!
//! A [`PeriodicTimer`] runs a handler at a fixed period, like the interrupt
//! service routine of a compare-match timer programmed once at boot. The
//! handler runs on the source's own host thread, concurrently with the
//! core, so it may only touch state that is safe to reach from any host
//! thread: atomics, spin locks, and [`InterruptController::raise`]. The
//! source is stopped when the handle drops.
//!
//! [`InterruptController::raise`]: crate::InterruptController::raise
use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// A running periodic timer source.
pub struct PeriodicTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Starts calling `handler` every `period`.
    pub fn start<F>(name: &str, period: Duration, mut handler: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name(format!("timer-{name}"))
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                while !flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < deadline {
                        std::thread::park_timeout(deadline - now);
                        continue;
                    }
                    handler();
                    deadline += period;
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}
