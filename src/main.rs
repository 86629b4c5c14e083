/*!
 * Sync Stress - Main Entry Point
 *
 * Drives every primitive under contention and reports what happened:
 * - Mutex fairness against a lock hog (starvation mode)
 * - Reader/writer mix with invariant checks
 * - Pool get/put cycles with a background sweeper
 * - ConcurrentMap mixed workload
 * - Cond-based barrier rounds
 *
 * Tuning comes from the SYNC_* environment variables; SYNC_STRESS_THREADS
 * overrides the worker count (default: CPU count).
 */

use kernel_sync::monitoring::{init_tracing, span_scenario};
use kernel_sync::{
    ConcurrentMap, Cond, Once, Pool, PoolRegistry, RawMutex, RawRwMutex, ShardManager, Sweeper,
    SyncConfig, WaitGroup,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

const OPS_PER_THREAD: u64 = 20_000;

static READY: Once = Once::new();

fn main() -> miette::Result<()> {
    init_tracing();

    SyncConfig::from_env()?.install()?;
    let config = SyncConfig::global();
    let threads = stress_threads();

    info!("Sync stress starting...");
    info!("================================================");
    info!(
        threads,
        procs = ShardManager::procs(),
        starvation_threshold_us = config.starvation_threshold.as_micros() as u64,
        active_spin = config.active_spin,
        sweep_interval_ms = config.sweep_interval.as_millis() as u64,
        "Configuration loaded"
    );

    READY.call_once(|| info!("Primitives ready"));

    let mut ok = true;
    ok &= mutex_fairness();
    ok &= rw_mix(threads);
    ok &= pool_cycle(threads);
    ok &= map_workload(threads);
    ok &= cond_barrier(threads);

    info!("================================================");
    if ok {
        info!("All scenarios passed");
        Ok(())
    } else {
        error!("One or more scenarios failed");
        Err(miette::miette!("sync stress failed"))
    }
}

fn stress_threads() -> usize {
    std::env::var("SYNC_STRESS_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(ShardManager::cpu_count)
}

/// A hog that re-locks immediately must not starve a waiter
fn mutex_fairness() -> bool {
    let span = span_scenario("mutex_fairness", 10_000);
    let _entered = span.enter();

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

    let acquired = {
        let mu = mu.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                thread::sleep(Duration::from_micros(100));
                mu.lock();
                mu.unlock();
            }
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while !acquired.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let fair = acquired.is_finished();
    stop.store(true, Ordering::Relaxed);
    let _ = hog.join();
    let _ = acquired.join();

    span.record_operations(10);
    span.record_result(fair);
    if fair {
        info!("mutex_fairness: waiter acquired the lock 10 times");
    } else {
        error!("mutex_fairness: waiter starved for 10s");
    }
    fair
}

/// Writers keep two counters equal; readers must never see them differ
fn rw_mix(threads: usize) -> bool {
    let span = span_scenario("rw_mix", 30_000);
    let _entered = span.enter();

    let rw = Arc::new(RawRwMutex::new());
    let a = Arc::new(AtomicU64::new(0));
    let b = Arc::new(AtomicU64::new(0));
    let torn = Arc::new(AtomicUsize::new(0));
    let wg = Arc::new(WaitGroup::new());

    for worker in 0..threads.max(2) {
        wg.add(1);
        let (rw, a, b, torn, wg) = (rw.clone(), a.clone(), b.clone(), torn.clone(), wg.clone());
        thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if (worker as u64 + i) % 10 == 0 {
                    rw.write_lock();
                    a.fetch_add(1, Ordering::Relaxed);
                    b.fetch_add(1, Ordering::Relaxed);
                    rw.write_unlock();
                } else {
                    rw.read_lock();
                    if a.load(Ordering::Relaxed) != b.load(Ordering::Relaxed) {
                        torn.fetch_add(1, Ordering::Relaxed);
                    }
                    rw.read_unlock();
                }
            }
            wg.done();
        });
    }
    wg.wait();

    let torn = torn.load(Ordering::Relaxed);
    let writes = a.load(Ordering::Relaxed);
    span.record_operations(OPS_PER_THREAD * threads.max(2) as u64);
    span.record_result(torn == 0);
    info!(writes, torn, "rw_mix finished");
    torn == 0
}

/// Concurrent get/put while a sweeper ages the pool
fn pool_cycle(threads: usize) -> bool {
    let span = span_scenario("pool_cycle", 30_000);
    let _entered = span.enter();

    let registry = Arc::new(PoolRegistry::new());
    let created = Arc::new(AtomicUsize::new(0));
    let pool = {
        let created = created.clone();
        Arc::new(Pool::with_registry_and_factory(
            Arc::clone(&registry),
            move || {
                created.fetch_add(1, Ordering::Relaxed);
                Vec::<u8>::with_capacity(4096)
            },
        ))
    };

    let sweeper = match Sweeper::spawn(Arc::clone(&registry), Duration::from_millis(20)) {
        Ok(sweeper) => sweeper,
        Err(e) => {
            error!(error = %e, "pool_cycle: sweeper unavailable");
            return false;
        }
    };

    let wg = Arc::new(WaitGroup::new());
    let dirty = Arc::new(AtomicUsize::new(0));
    for _ in 0..threads {
        wg.add(1);
        let (pool, wg, dirty) = (pool.clone(), wg.clone(), dirty.clone());
        thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let mut buf = pool.get().unwrap_or_default();
                if !buf.is_empty() {
                    dirty.fetch_add(1, Ordering::Relaxed);
                }
                buf.push(i as u8);
                buf.clear();
                pool.put(buf);
            }
            wg.done();
        });
    }
    wg.wait();
    drop(sweeper);

    let created = created.load(Ordering::Relaxed);
    let dirty = dirty.load(Ordering::Relaxed);
    let total = OPS_PER_THREAD * threads as u64;
    span.record_operations(total);
    span.record_result(dirty == 0);
    info!(
        gets = total,
        created,
        reuse_pct = 100.0 - (created as f64 * 100.0 / total as f64),
        sweeps = registry.sweeps(),
        "pool_cycle finished"
    );
    dirty == 0
}

/// Mixed map operations against disjoint and shared keys
fn map_workload(threads: usize) -> bool {
    let span = span_scenario("map_workload", 30_000);
    let _entered = span.enter();

    let map: Arc<ConcurrentMap<u64, u64>> = Arc::new((0..1024).map(|k| (k, 0)).collect());
    let increments = Arc::new(AtomicU64::new(0));
    let wg = Arc::new(WaitGroup::new());

    for worker in 0..threads {
        wg.add(1);
        let (map, increments, wg) = (map.clone(), increments.clone(), wg.clone());
        thread::spawn(move || {
            let own = 1_000_000 + worker as u64 * OPS_PER_THREAD;
            for i in 0..OPS_PER_THREAD {
                // Shared keys: CAS increments
                let key = i % 1024;
                loop {
                    let current = map.load(&key).unwrap_or(0);
                    if map.compare_and_swap(&key, &current, current + 1) {
                        increments.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
                // Disjoint keys: insert then delete
                map.store(own + i, i);
                if i % 2 == 0 {
                    map.delete(&(own + i));
                }
            }
            wg.done();
        });
    }
    wg.wait();

    let mut sum = 0;
    map.range(|k, v| {
        if *k < 1024 {
            sum += *v;
        }
        true
    });
    let expected = increments.load(Ordering::Relaxed);
    let consistent = sum == expected;
    span.record_operations(OPS_PER_THREAD * threads as u64 * 2);
    span.record_result(consistent);
    info!(sum, expected, keys = map.len(), "map_workload finished");
    consistent
}

/// Threads meet at a generation barrier built from Cond
fn cond_barrier(threads: usize) -> bool {
    let span = span_scenario("cond_barrier", 10_000);
    let _entered = span.enter();

    struct Barrier {
        m: Arc<RawMutex>,
        cond: Cond<Arc<RawMutex>>,
        arrived: AtomicUsize,
        generation: AtomicUsize,
    }

    let m = Arc::new(RawMutex::new());
    let barrier = Arc::new(Barrier {
        cond: Cond::new(Arc::clone(&m)),
        m,
        arrived: AtomicUsize::new(0),
        generation: AtomicUsize::new(0),
    });

    const ROUNDS: usize = 100;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    barrier.m.lock();
                    let generation = barrier.generation.load(Ordering::Relaxed);
                    if barrier.arrived.fetch_add(1, Ordering::Relaxed) + 1 == threads {
                        barrier.arrived.store(0, Ordering::Relaxed);
                        barrier.generation.fetch_add(1, Ordering::Relaxed);
                        barrier.cond.broadcast();
                    } else {
                        barrier.cond.wait_while(|| {
                            barrier.generation.load(Ordering::Relaxed) == generation
                        });
                    }
                    barrier.m.unlock();
                }
            })
        })
        .collect();

    let passed = handles.into_iter().all(|h| h.join().is_ok())
        && barrier.generation.load(Ordering::Relaxed) == ROUNDS;
    span.record_operations((ROUNDS * threads) as u64);
    span.record_result(passed);
    info!(rounds = ROUNDS, threads, "cond_barrier finished");
    passed
}
