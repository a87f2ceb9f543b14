//! Post-processor worker pool.
//!
//! Maintains up to `maxParallel` isolated workers. Workers start on
//! first demand, are reused across requests, may be killed mid-run, and
//! superfluous idle workers are evicted after a timeout. Post-processing
//! runs beside the compiler and never counts against the build
//! parallelism cap.

mod worker;

pub use worker::{PostprocessOutcome, Worker, WorkerRequest};

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Environment override for the idle-eviction timeout.
pub const WORKER_TIMEOUT_ENV: &str = "WORKER_LIMIT_TIMEOUT_MS";

const DEFAULT_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Structured failure of a post-process request.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    #[error("script not found: {path}")]
    MissingScript { path: String },
    #[error("failed to import script: {message}")]
    ImportError { message: String },
    #[error("script's default export is not a function")]
    DefaultExportNotFunction,
    #[error("script threw: {message}")]
    RunError { message: String },
    #[error("script returned {found}, expected text")]
    BadReturnValue { found: String },
}

/// Bounded pool of reusable workers, owned by the supervisor.
#[derive(Debug)]
pub struct WorkerPool {
    idle: Vec<Worker>,
    busy: usize,
    max: usize,
    idle_timeout: Duration,
}

impl WorkerPool {
    /// `max` is the worker cap (the project's `maxParallel`); the idle
    /// timeout comes from `WORKER_LIMIT_TIMEOUT_MS`.
    pub fn new(max: usize) -> Self {
        Self {
            idle: Vec::new(),
            busy: 0,
            max: max.max(1),
            idle_timeout: idle_timeout_from_env(),
        }
    }

    /// Validate the script path before dispatch; a missing script never
    /// reaches a worker.
    pub fn check_script(script: &Path) -> Result<(), WorkerFailure> {
        if script.is_file() {
            Ok(())
        } else {
            Err(WorkerFailure::MissingScript {
                path: script.display().to_string(),
            })
        }
    }

    /// Take an idle worker or spawn a new one under the cap.
    ///
    /// `Ok(None)` means the pool is saturated: the caller leaves the
    /// target in `QueuedForPostprocess` and retries when a worker frees.
    pub fn checkout(&mut self) -> std::io::Result<Option<Worker>> {
        if let Some(worker) = self.idle.pop() {
            self.busy += 1;
            return Ok(Some(worker));
        }
        if self.busy < self.max {
            let worker = Worker::spawn()?;
            crate::debug!("worker"; "spawned (busy: {})", self.busy + 1);
            self.busy += 1;
            return Ok(Some(worker));
        }
        Ok(None)
    }

    /// Return a worker after a request. `None` means the worker was
    /// killed or died and is not reusable.
    pub fn release(&mut self, worker: Option<Worker>) {
        self.busy = self.busy.saturating_sub(1);
        if let Some(worker) = worker {
            self.idle.push(worker);
        }
    }

    /// Evict idle workers past the timeout, always keeping one warm.
    /// Returns the number of terminated superfluous workers.
    pub fn evict_idle(&mut self) -> usize {
        let mut terminated = 0;
        while self.idle.len() > 1 {
            let Some(stalest) = self
                .idle
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.last_used)
                .map(|(i, _)| i)
            else {
                break;
            };
            if self.idle[stalest].last_used.elapsed() < self.idle_timeout {
                break;
            }
            self.idle.swap_remove(stalest).terminate();
            terminated += 1;
        }
        terminated
    }

    /// Terminate every idle worker (shutdown and project restart).
    pub fn shutdown(&mut self) {
        for worker in self.idle.drain(..) {
            worker.terminate();
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy
    }
}

/// `WORKER_LIMIT_TIMEOUT_MS` override; non-negative, default 10 s.
/// Zero means "evict superfluous workers immediately".
fn idle_timeout_from_env() -> Duration {
    let ms = std::env::var(WORKER_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_script_missing() {
        let err = WorkerPool::check_script(Path::new("/no/such/script.js")).unwrap_err();
        assert!(matches!(err, WorkerFailure::MissingScript { .. }));
    }

    #[test]
    fn test_check_script_present() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("postprocess.js");
        std::fs::write(&script, "export default ([code]) => code;").unwrap();
        assert!(WorkerPool::check_script(&script).is_ok());
    }

    #[test]
    fn test_release_without_worker_frees_slot() {
        let mut pool = WorkerPool::new(1);
        pool.busy = 1;
        pool.release(None);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_pool_cap_is_at_least_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.max, 1);
    }

    #[test]
    fn test_failure_messages() {
        let f = WorkerFailure::BadReturnValue {
            found: "number".into(),
        };
        assert_eq!(f.to_string(), "script returned number, expected text");
    }
}
