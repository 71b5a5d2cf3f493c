use minos::{
    Kernel, KernelConfig, ThreadBuilder, ThreadState,
    sync::{Mutex, Semaphore, WouldBlock},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicIsize, AtomicUsize, Ordering},
    },
    time::Duration,
};

fn manual_kernel() -> Arc<Kernel> {
    Kernel::new(
        KernelConfig::builder()
            .set_tick_period(None)
            .set_uptime_period(None)
            .set_idle_timeout(Duration::from_secs(5))
            .build(),
    )
}

type Log = Arc<std::sync::Mutex<Vec<&'static str>>>;

fn push(log: &Log, s: &'static str) {
    log.lock().unwrap().push(s);
}

/// Never more than one thread between a completed `lock` and its `unlock`,
/// even when the holder yields and is preempted inside the critical section.
#[test]
fn mutex_excludes() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 20;
    let kernel = manual_kernel();
    let counter = Arc::new(Mutex::new(&kernel, 0usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..THREADS {
        let (k, counter, inside, finished) = (
            kernel.clone(),
            counter.clone(),
            inside.clone(),
            finished.clone(),
        );
        ThreadBuilder::new("worker")
            .spawn(&kernel, move || {
                for round in 0..ROUNDS {
                    let mut guard = counter.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    let seen = *guard;
                    if round % 2 == 0 {
                        k.yield_now();
                    } else {
                        k.handle_timer_tick();
                    }
                    *guard = seen + 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.unlock();
                    k.yield_now();
                }
                if finished.fetch_add(1, Ordering::SeqCst) + 1 == THREADS {
                    let guard = counter.lock();
                    assert_eq!(*guard, THREADS * ROUNDS);
                    guard.unlock();
                    k.power_off();
                }
                k.block();
            })
            .unwrap();
    }

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(finished.load(Ordering::SeqCst), THREADS);
    assert!(!counter.is_locked());
}

/// Unlock releases the pending thread with the lowest identity, even if a
/// higher identity started waiting first.
#[test]
fn mutex_releases_lowest_identity_first() {
    let kernel = manual_kernel();
    let mutex = Arc::new(Mutex::new(&kernel, ()));
    let gate = Arc::new(Semaphore::new(&kernel, 0));
    let log: Log = Default::default();

    let (k, m, g) = (kernel.clone(), mutex.clone(), gate.clone());
    ThreadBuilder::new("holder")
        .spawn(&kernel, move || {
            let guard = m.lock();
            // "late" parks on the gate, then "early" blocks on the mutex.
            k.yield_now();
            k.yield_now();
            assert_eq!(m.waiters(), 1);
            // Now let "late" block on the mutex behind "early".
            g.signal();
            k.yield_now();
            assert_eq!(m.waiters(), 2);
            guard.unlock();
            k.block();
        })
        .unwrap();
    let (k, m, g, l) = (kernel.clone(), mutex.clone(), gate.clone(), log.clone());
    ThreadBuilder::new("late")
        .spawn(&kernel, move || {
            g.wait();
            let guard = m.lock();
            push(&l, "late");
            guard.unlock();
            k.block();
        })
        .unwrap();
    let (k, m, l) = (kernel.clone(), mutex.clone(), log.clone());
    ThreadBuilder::new("early")
        .spawn(&kernel, move || {
            let guard = m.lock();
            push(&l, "early");
            guard.unlock();
            k.power_off();
        })
        .unwrap();

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(*log.lock().unwrap(), ["late", "early"]);
}

#[test]
fn try_lock_would_block_while_held() {
    let kernel = manual_kernel();
    let mutex = Arc::new(Mutex::new(&kernel, 7));
    let (k, m) = (kernel.clone(), mutex.clone());
    ThreadBuilder::new("trier")
        .spawn(&kernel, move || {
            let guard = m.try_lock().unwrap();
            assert_eq!(*guard, 7);
            assert!(matches!(m.try_lock(), Err(WouldBlock)));
            guard.unlock();
            m.try_lock().unwrap().unlock();
            k.power_off();
        })
        .unwrap();
    assert_eq!(kernel.start(), Ok(()));
}

/// The number of threads past `wait` never exceeds the initial value.
#[test]
fn semaphore_bounds_holders() {
    const THREADS: usize = 5;
    const PERMITS: isize = 2;
    let kernel = manual_kernel();
    let sem = Arc::new(Semaphore::new(&kernel, PERMITS));
    let inside = Arc::new(AtomicIsize::new(0));
    let peak = Arc::new(AtomicIsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..THREADS {
        let (k, sem, inside, peak, finished) = (
            kernel.clone(),
            sem.clone(),
            inside.clone(),
            peak.clone(),
            finished.clone(),
        );
        ThreadBuilder::new("holder")
            .spawn(&kernel, move || {
                for _ in 0..10 {
                    sem.wait();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= PERMITS);
                    peak.fetch_max(now, Ordering::SeqCst);
                    k.yield_now();
                    k.handle_timer_tick();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.signal();
                    k.yield_now();
                }
                if finished.fetch_add(1, Ordering::SeqCst) + 1 == THREADS {
                    assert_eq!(sem.value(), PERMITS);
                    k.power_off();
                }
                k.block();
            })
            .unwrap();
    }

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(peak.load(Ordering::SeqCst), PERMITS);
}

/// A negative counter equals the number of blocked waiters, and a signal
/// releases exactly one of them.
#[test]
fn semaphore_counts_waiters() {
    let kernel = manual_kernel();
    let sem = Arc::new(Semaphore::new(&kernel, 0));

    let (k, s) = (kernel.clone(), sem.clone());
    let main = ThreadBuilder::new("main")
        .spawn(&kernel, move || {
            k.yield_now();
            k.yield_now();
            assert_eq!(s.value(), -2);
            s.signal();
            assert_eq!(s.value(), -1);
            let info = k.system_info();
            assert_eq!(info.threads[1].state, ThreadState::Ready);
            assert_eq!(info.threads[2].state, ThreadState::Waiting);
            k.power_off();
        })
        .unwrap();
    for name in ["w1", "w2"] {
        let (k, s) = (kernel.clone(), sem.clone());
        ThreadBuilder::new(name)
            .spawn(&kernel, move || {
                s.wait();
                k.block();
            })
            .unwrap();
    }

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(kernel.thread_state(main), Some(ThreadState::Waiting));
    assert_eq!(sem.value(), -1);
}

/// A direct hand-off runs the released waiter before the signaller
/// continues; a plain signal does not.
#[test]
fn handoff_runs_waiter_immediately() {
    for handoff in [false, true] {
        let kernel = manual_kernel();
        let sem = Arc::new(Semaphore::new(&kernel, 0));
        let log: Log = Default::default();

        let (k, s, l) = (kernel.clone(), sem.clone(), log.clone());
        ThreadBuilder::new("producer")
            .spawn(&kernel, move || {
                k.yield_now();
                if handoff {
                    s.signal_handoff();
                } else {
                    s.signal();
                }
                push(&l, "producer");
                k.yield_now();
                k.power_off();
            })
            .unwrap();
        let (k, s, l) = (kernel.clone(), sem.clone(), log.clone());
        ThreadBuilder::new("consumer")
            .spawn(&kernel, move || {
                s.wait();
                push(&l, "consumer");
                k.block();
            })
            .unwrap();

        assert_eq!(kernel.start(), Ok(()));
        let expected = if handoff {
            ["consumer", "producer"]
        } else {
            ["producer", "consumer"]
        };
        assert_eq!(*log.lock().unwrap(), expected);
    }
}
