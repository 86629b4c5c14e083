/*!
 * Background Sweeper
 *
 * Periodically sweeps a `PoolRegistry` from a dedicated thread. Dropping the
 * handle disconnects the stop channel and joins the thread.
 */

use super::registry::PoolRegistry;
use crate::core::config::SyncConfig;
use crate::core::errors::{SyncError, SyncResult};
use flume::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running sweeper thread
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Sweeper {
    /// Sweep `registry` every `interval` until the handle is dropped
    pub fn spawn(registry: Arc<PoolRegistry>, interval: Duration) -> SyncResult<Self> {
        let (stop, stopped) = flume::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("pool-sweeper".into())
            .spawn(move || {
                tracing::debug!(?interval, "pool sweeper started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            registry.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("pool sweeper stopped");
            })
            .map_err(|e| SyncError::SpawnFailed("pool sweeper", e.to_string()))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
            interval,
        })
    }

    /// Sweep the global registry at the configured interval
    pub fn spawn_global() -> SyncResult<Self> {
        Self::spawn(
            Arc::clone(PoolRegistry::global()),
            SyncConfig::global().sweep_interval,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting wakes the thread immediately
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("pool sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::pool::Pool;
    use std::time::Instant;

    #[test]
    fn test_sweeps_periodically() {
        let registry = Arc::new(PoolRegistry::new());
        let sweeper = Sweeper::spawn(Arc::clone(&registry), Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.sweeps() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();
        assert!(registry.sweeps() >= 2);
    }

    #[test]
    fn test_drop_stops_promptly() {
        let registry = Arc::new(PoolRegistry::new());
        let started = Instant::now();
        {
            let _sweeper = Sweeper::spawn(Arc::clone(&registry), Duration::from_secs(60)).unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(registry.sweeps(), 0);
    }

    #[test]
    fn test_unused_items_eventually_dropped() {
        let registry = Arc::new(PoolRegistry::new());
        let pool = Pool::with_registry(Arc::clone(&registry));
        pool.put(vec![0u8; 64]);

        let sweeper = Sweeper::spawn(Arc::clone(&registry), Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.sweeps() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(sweeper);

        assert_eq!(pool.cached(), 0);
    }
}
