//! Modules for system power operations.
use crate::Kernel;

impl Kernel {
    /// Shutdown the machine.
    ///
    /// Stops dispatching and hands the processor back to the idle context,
    /// whose [`Kernel::start`] then returns `Ok(())`. No thread runs again.
    ///
    /// # Panics
    /// Panics if called outside of a kernel thread.
    pub fn power_off(&self) -> ! {
        let tid = self.current_thread();
        log::info!("minos: power off requested by {tid}");
        self.record_stop(None);
        core::mem::forget(self.irq.disable());
        self.retire_current();
        loop {
            std::thread::park();
        }
    }
}
