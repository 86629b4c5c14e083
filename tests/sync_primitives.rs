/*!
 * Synchronization Primitives Integration Tests
 *
 * Cross-primitive behaviour under real thread contention: mutex fairness,
 * reader/writer exclusion, condition variables over both lock flavours,
 * wait groups and once.
 */

use kernel_sync::{
    Cond, Locker, Mutex, Once, RawMutex, RawRwMutex, RwLock, Semaphore, QueueMode, WaitGroup,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_mutex_counter_contention() {
    let counter = Arc::new(Mutex::new(0u64));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*counter.lock(), 80_000);
}

#[test]
fn test_mutex_fairness_against_hog() {
    let mu = Arc::new(RawMutex::new());
    let stop = Arc::new(AtomicBool::new(false));

    let hog = {
        let (mu, stop) = (mu.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                mu.lock();
                thread::sleep(Duration::from_micros(100));
                mu.unlock();
            }
        })
    };

    let waiter = {
        let mu = mu.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                thread::sleep(Duration::from_micros(100));
                mu.lock();
                mu.unlock();
            }
        })
    };

    // Starvation mode must let the waiter in long before this
    let deadline = Instant::now() + Duration::from_secs(10);
    while !waiter.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let finished = waiter.is_finished();
    stop.store(true, Ordering::Relaxed);
    hog.join().unwrap();
    waiter.join().unwrap();
    assert!(finished, "waiter starved behind the hog");
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_micros(200));
    }
}

/// A holds the lock past the starvation threshold while B waits, then barges
/// back in after waking B. Returns how many times a late arrival C got the
/// lock before B, or `None` if B won the wake-up race and starvation never
/// engaged.
fn run_starvation_handoff() -> Option<usize> {
    let mu = Arc::new(RawMutex::new());
    let c_acquired = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    mu.lock();
    let b = {
        let (mu, c_acquired) = (mu.clone(), c_acquired.clone());
        thread::spawn(move || {
            mu.lock();
            let seen = c_acquired.load(Ordering::SeqCst);
            mu.unlock();
            seen
        })
    };
    wait_until("B to queue", || mu.waiters() == 1);
    thread::sleep(Duration::from_millis(2));

    // Wake B and take the lock back before it runs
    mu.unlock();
    mu.lock();
    wait_until("B to react", || mu.is_starving() || b.is_finished());
    if !mu.is_starving() {
        mu.unlock();
        b.join().unwrap();
        return None;
    }
    // Let B settle at the head of the queue
    thread::sleep(Duration::from_millis(10));

    let c = {
        let (mu, c_acquired, stop) = (mu.clone(), c_acquired.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                mu.lock();
                c_acquired.fetch_add(1, Ordering::SeqCst);
                mu.unlock();
            }
        })
    };
    wait_until("C to queue", || mu.waiters() >= 2);
    assert!(mu.is_starving());

    mu.unlock();
    let seen = b.join().unwrap();
    stop.store(true, Ordering::SeqCst);
    c.join().unwrap();

    assert!(!mu.is_starving(), "starvation mode never left");
    assert!(!mu.is_locked());
    Some(seen)
}

#[test]
fn test_mutex_starvation_handoff_beats_late_arrival() {
    let mut engaged = 0;
    for _ in 0..20 {
        if let Some(c_before_b) = run_starvation_handoff() {
            assert_eq!(c_before_b, 0, "late arrival acquired the lock before the starving waiter");
            engaged += 1;
            if engaged == 3 {
                break;
            }
        }
    }
    assert!(engaged > 0, "starvation mode never engaged");
}

#[test]
fn test_mutex_unlock_from_other_thread() {
    let mu = Arc::new(RawMutex::new());
    mu.lock();

    let mu_clone = mu.clone();
    thread::spawn(move || mu_clone.unlock()).join().unwrap();

    assert!(mu.try_lock());
    mu.unlock();
}

#[test]
fn test_rwmutex_writer_excludes_readers() {
    let rw = Arc::new(RawRwMutex::new());
    let active_readers = Arc::new(AtomicI32::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let (rw, active_readers, violations) =
                (rw.clone(), active_readers.clone(), violations.clone());
            thread::spawn(move || {
                for _ in 0..2_000 {
                    if i % 3 == 0 {
                        rw.write_lock();
                        if active_readers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        rw.write_unlock();
                    } else {
                        rw.read_lock();
                        active_readers.fetch_add(1, Ordering::SeqCst);
                        thread::yield_now();
                        active_readers.fetch_sub(1, Ordering::SeqCst);
                        rw.read_unlock();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rwmutex_pending_writer_blocks_new_readers() {
    let rw = Arc::new(RawRwMutex::new());
    rw.read_lock();

    let writer = {
        let rw = rw.clone();
        thread::spawn(move || {
            rw.write_lock();
            rw.write_unlock();
        })
    };

    // Wait for the writer to announce itself
    let deadline = Instant::now() + Duration::from_secs(5);
    while rw.try_read_lock() {
        rw.read_unlock();
        assert!(Instant::now() < deadline, "writer never became pending");
        thread::sleep(Duration::from_millis(1));
    }

    rw.read_unlock();
    writer.join().unwrap();
    assert!(rw.try_read_lock());
    rw.read_unlock();
}

#[test]
fn test_rwlock_guards() {
    let lock = RwLock::new(vec![1, 2, 3]);
    {
        let a = lock.read();
        let b = lock.read();
        assert_eq!(a.len() + b.len(), 6);
    }
    lock.write().push(4);
    assert_eq!(*lock.read(), vec![1, 2, 3, 4]);
}

#[test]
fn test_cond_over_read_locker() {
    let rw = RawRwMutex::new();
    let cond = Cond::new(rw.read_locker());
    let ready = AtomicBool::new(false);
    let woke = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                rw.read_lock();
                while !ready.load(Ordering::SeqCst) {
                    cond.wait();
                }
                woke.fetch_add(1, Ordering::SeqCst);
                rw.read_unlock();
            });
        }

        thread::sleep(Duration::from_millis(20));
        rw.write_lock();
        ready.store(true, Ordering::SeqCst);
        rw.write_unlock();
        cond.broadcast();
    });

    assert_eq!(woke.load(Ordering::SeqCst), 3);
    assert_eq!(cond.waiters(), 0);
}

#[test]
fn test_cond_producer_consumer() {
    struct Queue {
        m: Arc<RawMutex>,
        cond: Cond<Arc<RawMutex>>,
        items: std::cell::UnsafeCell<Vec<u32>>,
    }
    // items is only touched while `m` is held
    unsafe impl Sync for Queue {}

    let m = Arc::new(RawMutex::new());
    let queue = Arc::new(Queue {
        cond: Cond::new(Arc::clone(&m)),
        m,
        items: std::cell::UnsafeCell::new(Vec::new()),
    });

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut received = Vec::new();
            queue.m.lock();
            while received.len() < 100 {
                // SAFETY: `m` is held
                let items = unsafe { &mut *queue.items.get() };
                if items.is_empty() {
                    queue.cond.wait();
                    continue;
                }
                received.append(items);
            }
            queue.m.unlock();
            received
        })
    };

    for i in 0..100 {
        queue.m.lock();
        // SAFETY: `m` is held
        unsafe { (*queue.items.get()).push(i) };
        queue.m.unlock();
        queue.cond.signal();
    }

    let received = consumer.join().unwrap();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_waitgroup_joins_workers() {
    let wg = Arc::new(WaitGroup::new());
    let sum = Arc::new(AtomicUsize::new(0));

    wg.add(16);
    for i in 0..16 {
        let (wg, sum) = (wg.clone(), sum.clone());
        thread::spawn(move || {
            sum.fetch_add(i, Ordering::SeqCst);
            wg.done();
        });
    }
    wg.wait();

    assert_eq!(sum.load(Ordering::SeqCst), (0..16).sum::<usize>());
    assert_eq!(wg.count(), 0);
}

#[test]
fn test_once_under_contention() {
    let once = Arc::new(Once::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(WaitGroup::new());
    start.add(1);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let (once, runs, start) = (once.clone(), runs.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                once.call_once(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                });
                assert!(once.is_completed());
            })
        })
        .collect();

    start.done();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_locker_is_object_safe() {
    let mu = RawMutex::new();
    let rw = RawRwMutex::new();
    let lockers: [&dyn Locker; 2] = [&mu, &rw];
    for locker in lockers {
        locker.lock();
        locker.unlock();
    }
    assert!(!mu.is_locked());
    assert!(!rw.is_locked());
}

#[test]
fn test_semaphore_handoff() {
    let sema = Arc::new(Semaphore::new());

    let waiter = {
        let sema = sema.clone();
        thread::spawn(move || sema.acquire(QueueMode::Fifo))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while sema.waiters() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    sema.release(true);
    waiter.join().unwrap();
    assert!(!sema.try_acquire());
}
