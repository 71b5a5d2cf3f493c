//! The kernel object.
//!
//! [`Kernel`] owns the thread table and performs every scheduling state
//! transition. Each transition runs with preemption suppressed, and each
//! context switch hands exactly one interrupt guard level from the
//! switching context to the resumed one.
//!
//! The host thread that calls [`Kernel::start`] becomes the idle context.
//! It runs whenever no thread is Ready: it services pending interrupts,
//! waits for the next one, and detects when no thread can ever run again.
use crate::{
    KernelConfig, KernelError,
    thread::{ThreadState, ThreadTable, Tid},
};
use bedrock::{
    Context, InterruptController, InterruptGuard, PeriodicTimer, SpinLock, SpinLockGuard,
};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use log::{debug, info, warn};
use std::{sync::Arc, time::Instant};

#[derive(Default)]
struct RunState {
    started: bool,
    fatal: Option<KernelError>,
}

/// A single-core thread kernel.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) table: SpinLock<ThreadTable>,
    pub(crate) irq: Arc<InterruptController>,
    pub(crate) interrupts: AtomicU64,
    pub(crate) uptime: AtomicU64,
    halted: AtomicBool,
    run: SpinLock<RunState>,
}

/// Snapshot of one thread for [`SystemInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub sleep_ticks: u32,
    pub stack_size: usize,
}

/// Snapshot of the kernel statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// Timer ticks delivered since start.
    pub interrupts: u64,
    /// Uptime ticks delivered since start, in seconds at the default period.
    pub uptime: u64,
    /// The running thread, `None` while idle.
    pub current: Option<Tid>,
    /// Every thread in identity order.
    pub threads: Vec<ThreadInfo>,
}

impl SystemInfo {
    /// Average timer ticks per uptime tick.
    pub fn interrupt_rate(&self) -> u64 {
        self.interrupts.checked_div(self.uptime).unwrap_or(0)
    }
}

impl core::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Time: {}", self.uptime)?;
        writeln!(f, "Interrupts: {}", self.interrupt_rate())?;
        writeln!(f, "# threads: {}", self.threads.len())?;
        for th in self.threads.iter() {
            let marker = if Some(th.tid) == self.current { '*' } else { ' ' };
            writeln!(
                f,
                "{marker} {:>2} {:<12} {:?} sleep={} stack={}",
                th.tid.index(),
                th.name,
                th.state,
                th.sleep_ticks,
                th.stack_size
            )?;
        }
        Ok(())
    }
}

impl Kernel {
    /// Creates a kernel with an empty thread table.
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            table: SpinLock::new(ThreadTable::new()),
            irq: Arc::new(InterruptController::new()),
            interrupts: AtomicU64::new(0),
            uptime: AtomicU64::new(0),
            halted: AtomicBool::new(false),
            run: SpinLock::new(RunState::default()),
        })
    }

    /// The interrupt controller of the kernel's core.
    pub fn interrupt_controller(&self) -> &Arc<InterruptController> {
        &self.irq
    }

    /// Starts dispatching threads.
    ///
    /// The calling host thread becomes the idle context. Returns `Ok(())`
    /// once some thread calls [`power_off`], or the fatal error that stopped
    /// the kernel.
    ///
    /// [`power_off`]: Kernel::power_off
    pub fn start(self: &Arc<Self>) -> Result<(), KernelError> {
        let mut run = self.run.lock();
        if run.started {
            run.unlock();
            return Err(KernelError::AlreadyStarted);
        }
        run.started = true;
        run.unlock();

        self.irq.set_waiter();
        self.table.with(|table| table.idle = Some(Context::current()));

        let mut timers = Vec::new();
        if let Some(period) = self.config.tick_period {
            let kernel = self.clone();
            let timer = PeriodicTimer::start("timer", period, move || kernel.timer_interrupt())
                .map_err(|_| KernelError::NoMemory)?;
            timers.push(timer);
        }
        if let Some(period) = self.config.uptime_period {
            let kernel = self.clone();
            let timer = PeriodicTimer::start("uptime", period, move || kernel.handle_uptime_tick())
                .map_err(|_| KernelError::NoMemory)?;
            timers.push(timer);
        }

        info!(
            "minos: starting with {} threads",
            self.table.with(|table| table.len())
        );
        let result = self.idle_loop();
        drop(timers);
        match &result {
            Ok(()) => info!("minos: powered off"),
            Err(e) => warn!("minos: stopped: {e}"),
        }
        result
    }

    fn idle_loop(&self) -> Result<(), KernelError> {
        let mut last_dispatch = Instant::now();
        loop {
            if let Some(result) = self.stop_reason() {
                return result;
            }
            self.poll_interrupts();

            let guard = self.irq.disable();
            let table = self.table.lock();
            if let Some(tid) = self.config.scheduler.next_to_run(&table) {
                self.switch_to(table, Some(tid));
                drop(guard);
                last_dispatch = Instant::now();
                continue;
            }
            let sleeping = table.iter().any(|th| th.state == ThreadState::Sleeping);
            table.unlock();
            drop(guard);

            if !sleeping {
                self.record_stop(Some(KernelError::Deadlock));
                continue;
            }
            let timeout = self
                .config
                .idle_timeout
                .map(|limit| limit.saturating_sub(last_dispatch.elapsed()));
            if !self.irq.wait_for_interrupt(timeout) {
                self.record_stop(Some(KernelError::Stalled));
            }
        }
    }

    fn stop_reason(&self) -> Option<Result<(), KernelError>> {
        if !self.halted.load(Ordering::SeqCst) {
            return None;
        }
        let run = self.run.lock();
        let result = match run.fatal {
            Some(e) => Err(e),
            None => Ok(()),
        };
        run.unlock();
        Some(result)
    }

    /// Marks the kernel halted. The first fatal error recorded wins.
    pub(crate) fn record_stop(&self, fatal: Option<KernelError>) {
        let mut run = self.run.lock();
        if run.fatal.is_none() && !self.halted.load(Ordering::SeqCst) {
            run.fatal = fatal;
        }
        self.halted.store(true, Ordering::SeqCst);
        run.unlock();
    }

    /// Whether the kernel has stopped.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Panics unless the calling host thread executes the running context.
    pub(crate) fn assert_on_cpu(&self, table: &ThreadTable) {
        if table.idle.is_none() {
            // Not started: the boot context owns the kernel.
            return;
        }
        let on_cpu = table
            .context_of(table.current)
            .is_some_and(|context| context.is_current());
        assert!(
            on_cpu,
            "kernel operation from a host thread that is not running on the kernel"
        );
    }

    fn running_thread(&self, table: &ThreadTable) -> Tid {
        self.assert_on_cpu(table);
        match table.current {
            Some(tid) => tid,
            None => panic!("operation requires a running thread, but the kernel is idle"),
        }
    }

    /// Switches from the running context to `next` (`None` = idle).
    ///
    /// The caller holds exactly one interrupt guard level, which the
    /// resumed context releases. Returns once the caller's context is
    /// resumed again.
    pub(crate) fn switch_to(&self, mut table: SpinLockGuard<'_, ThreadTable>, next: Option<Tid>) {
        debug_assert_eq!(self.irq.depth(), 1);
        let prev = table.current;
        if let Some(tid) = next {
            table.thread_mut(tid).state = ThreadState::Running;
        }
        if prev == next {
            table.unlock();
            return;
        }
        table.current = next;
        let from = table.context_of(prev);
        let to = table.context_of(next);
        table.unlock();

        debug!("switch {} -> {}", DisplayTid(prev), DisplayTid(next));
        let (Some(from), Some(to)) = (from, to) else {
            panic!("context switch before the kernel started");
        };
        if let Err(e) = from.switch(&to) {
            warn!("cannot resume {}: {:?}", DisplayTid(next), e);
            self.record_stop(Some(KernelError::from(e)));
            self.retire_current();
            loop {
                std::thread::park();
            }
        }
    }

    /// Hands the processor to the idle context for good.
    ///
    /// One interrupt guard level must be held; it is released by the idle
    /// context.
    pub(crate) fn retire_current(&self) {
        let mut table = self.table.lock();
        let prev = table.current.take();
        if let Some(tid) = prev {
            table.thread_mut(tid).state = ThreadState::Waiting;
        }
        let from = table.context_of(prev);
        let idle = table.idle.clone();
        table.unlock();
        if let (Some(from), Some(idle)) = (from, idle) {
            if let Err(e) = from.exit_to(&idle) {
                warn!("cannot resume the idle context: {e:?}");
            }
        }
    }

    /// Releases `guard` and takes any interrupt that became pending while
    /// preemption was suppressed.
    pub(crate) fn enable(&self, guard: InterruptGuard<'_>) {
        drop(guard);
        self.poll_interrupts();
    }

    /// Runs `f` with preemption suppressed.
    pub fn without_preemption<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = self.irq.disable();
        let result = f();
        self.enable(guard);
        result
    }

    /// Suspends the running thread in `state` and switches to the next
    /// thread the scheduler picks. Returns once the thread runs again.
    pub(crate) fn suspend(&self, guard: InterruptGuard<'_>, state: ThreadState) {
        let mut table = self.table.lock();
        let current = self.running_thread(&table);
        table.thread_mut(current).state = state;
        let next = self.config.scheduler.next_to_run(&table);
        self.switch_to(table, next);
        self.enable(guard);
    }

    /// Marks a Waiting thread Ready. Preemption must be suppressed.
    pub(crate) fn wake(&self, tid: Tid) {
        let mut table = self.table.lock();
        let th = table.thread_mut(tid);
        debug_assert_eq!(th.state, ThreadState::Waiting);
        th.state = ThreadState::Ready;
        table.unlock();
    }

    /// Marks the running thread Ready and switches straight into `tid`.
    pub(crate) fn hand_off(&self, guard: InterruptGuard<'_>, tid: Tid) {
        let mut table = self.table.lock();
        let current = self.running_thread(&table);
        table.thread_mut(current).state = ThreadState::Ready;
        self.switch_to(table, Some(tid));
        self.enable(guard);
    }

    /// Gives up the processor.
    ///
    /// The running thread becomes Ready and the scan for the next Ready
    /// thread starts after it, wrapping around the table. If no other
    /// thread is Ready the caller continues.
    pub fn yield_now(&self) {
        let guard = self.irq.disable();
        let mut table = self.table.lock();
        let current = self.running_thread(&table);
        table.thread_mut(current).state = ThreadState::Ready;
        let next = self.config.scheduler.next_after_yield(&table, current);
        self.switch_to(table, next);
        self.enable(guard);
    }

    /// Puts the running thread to sleep for `ticks` timer ticks.
    ///
    /// The thread becomes Ready on exactly the `ticks`-th tick after the
    /// call. `sleep(0)` is a [`yield_now`].
    ///
    /// [`yield_now`]: Kernel::yield_now
    pub fn sleep(&self, ticks: u32) {
        if ticks == 0 {
            return self.yield_now();
        }
        let guard = self.irq.disable();
        let mut table = self.table.lock();
        let current = self.running_thread(&table);
        let th = table.thread_mut(current);
        th.state = ThreadState::Sleeping;
        th.sleep_ticks = ticks;
        let next = self.config.scheduler.next_to_run(&table);
        self.switch_to(table, next);
        self.enable(guard);
    }

    /// Marks the running thread Waiting and switches away without making
    /// it Ready again. Someone else must wake it.
    pub fn block(&self) {
        let guard = self.irq.disable();
        self.suspend(guard, ThreadState::Waiting);
    }

    /// The running thread, or `None` while idle.
    pub fn current(&self) -> Option<Tid> {
        self.table.with(|table| table.current)
    }

    /// The running thread.
    ///
    /// # Panics
    /// Panics if called outside of a kernel thread.
    pub(crate) fn current_thread(&self) -> Tid {
        let table = self.table.lock();
        let tid = self.running_thread(&table);
        table.unlock();
        tid
    }

    /// Scheduling state of `tid`.
    pub fn thread_state(&self, tid: Tid) -> Option<ThreadState> {
        self.table
            .with(|table| table.get(tid).map(|th| th.state))
    }

    /// Takes a snapshot of the kernel statistics.
    pub fn system_info(&self) -> SystemInfo {
        let table = self.table.lock();
        let threads = table
            .iter()
            .map(|th| ThreadInfo {
                tid: th.tid,
                name: th.name.clone(),
                state: th.state,
                sleep_ticks: th.sleep_ticks,
                stack_size: th.stack_size,
            })
            .collect();
        let current = table.current;
        table.unlock();
        SystemInfo {
            interrupts: self.interrupts.load(Ordering::SeqCst),
            uptime: self.uptime.load(Ordering::SeqCst),
            current,
            threads,
        }
    }
}

struct DisplayTid(Option<Tid>);

impl core::fmt::Display for DisplayTid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Some(tid) => write!(f, "{tid}"),
            None => write!(f, "idle"),
        }
    }
}
