//! Kernel configuration.
use crate::thread::scheduler::{Scheduler, StaticPriority};
use std::time::Duration;

/// Settings fixed when the kernel is created.
///
/// Build one with [`KernelConfig::builder`].
pub struct KernelConfig {
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) tick_period: Option<Duration>,
    pub(crate) uptime_period: Option<Duration>,
    pub(crate) host_stack_floor: usize,
    pub(crate) idle_timeout: Option<Duration>,
}

impl KernelConfig {
    /// Default period of the preemption tick.
    pub const TICK_PERIOD: Duration = Duration::from_millis(10);
    /// Default period of the uptime tick.
    pub const UPTIME_PERIOD: Duration = Duration::from_secs(1);
    /// Default minimum size of the host stack backing a thread.
    pub const HOST_STACK_FLOOR: usize = 256 * 1024;

    /// Starts building a configuration from the defaults.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder {
            config: KernelConfig::default(),
        }
    }

    /// Period of the preemption tick, if the tick source is enabled.
    pub fn tick_period(&self) -> Option<Duration> {
        self.tick_period
    }

    /// Period of the uptime tick, if the uptime source is enabled.
    pub fn uptime_period(&self) -> Option<Duration> {
        self.uptime_period
    }

    /// How long the kernel may idle before giving up.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            scheduler: Box::new(StaticPriority),
            tick_period: Some(Self::TICK_PERIOD),
            uptime_period: Some(Self::UPTIME_PERIOD),
            host_stack_floor: Self::HOST_STACK_FLOOR,
            idle_timeout: None,
        }
    }
}

/// A builder for kernel configuration settings.
///
/// # Examples
///
/// ```
/// use minos::{Kernel, KernelConfig};
/// use std::time::Duration;
///
/// let kernel = Kernel::new(
///     KernelConfig::builder()
///         .set_tick_period(None)
///         .set_idle_timeout(Duration::from_secs(1))
///         .build(),
/// );
/// assert_eq!(kernel.system_info().threads.len(), 0);
/// ```
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the scheduling policy.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.config.scheduler = Box::new(scheduler);
        self
    }

    /// Sets the preemption tick period. `None` disables the source; ticks
    /// are then delivered only by calling the tick handler directly.
    pub fn set_tick_period(mut self, period: Option<Duration>) -> Self {
        self.config.tick_period = period;
        self
    }

    /// Sets the uptime tick period. `None` disables the source.
    pub fn set_uptime_period(mut self, period: Option<Duration>) -> Self {
        self.config.uptime_period = period;
        self
    }

    /// Sets the minimum host stack size backing each thread.
    pub fn set_host_stack_floor(mut self, bytes: usize) -> Self {
        self.config.host_stack_floor = bytes;
        self
    }

    /// Stops the kernel with [`KernelError::Stalled`] when no thread is
    /// dispatched for `timeout`.
    ///
    /// [`KernelError::Stalled`]: crate::KernelError::Stalled
    pub fn set_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
