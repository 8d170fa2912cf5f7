//! CleanupScheduler: deferred deletion of consumed scratch files.
//!
//! A single `scratch-cleanup` thread holds the pending deletions and sleeps
//! until the earliest deadline. A file that still feeds an engine channel
//! when its deadline comes round is pushed back by another delay.

use crate::engine::CrossfadeEngine;
use crate::error::Result;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Pending {
    jobs: Vec<(Instant, PathBuf)>,
    running: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Condvar,
    engine: CrossfadeEngine,
    delay: Duration,
}

pub struct CleanupScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn start(engine: CrossfadeEngine, delay: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                jobs: Vec::new(),
                running: true,
            }),
            wake: Condvar::new(),
            engine,
            delay,
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("scratch-cleanup".into())
            .spawn(move || run_worker(&worker_shared))?;
        Ok(CleanupScheduler {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Delete `path` once the configured delay has passed.
    pub fn schedule(&self, path: PathBuf) {
        let deadline = Instant::now() + self.shared.delay;
        let mut pending = self.shared.pending.lock();
        if !pending.running {
            drop(pending);
            remove_scratch(&path);
            return;
        }
        debug!(path = %path.display(), delay_ms = self.shared.delay.as_millis() as u64, "cleanup scheduled");
        pending.jobs.push((deadline, path));
        drop(pending);
        self.shared.wake.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.lock().jobs.len()
    }

    /// Delete everything still pending right away and join the worker.
    pub fn shutdown(&self) {
        self.shared.pending.lock().running = false;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &Shared) {
    let mut pending = shared.pending.lock();
    loop {
        if !pending.running {
            let remaining: Vec<_> = pending.jobs.drain(..).collect();
            drop(pending);
            for (_, path) in remaining {
                remove_scratch(&path);
            }
            return;
        }

        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) =
            pending.jobs.drain(..).partition(|(deadline, _)| *deadline <= now);
        pending.jobs = later;

        if !due.is_empty() {
            let retry = MutexGuard::unlocked(&mut pending, || process_due(shared, due));
            pending.jobs.extend(retry);
            continue;
        }

        match pending.jobs.iter().map(|(deadline, _)| *deadline).min() {
            Some(next) => {
                shared.wake.wait_until(&mut pending, next);
            }
            None => shared.wake.wait(&mut pending),
        }
    }
}

/// Delete due files; returns the ones still in use, with a new deadline.
fn process_due(shared: &Shared, due: Vec<(Instant, PathBuf)>) -> Vec<(Instant, PathBuf)> {
    let mut retry = Vec::new();
    for (_, path) in due {
        if shared.engine.is_source_in_use(&path) {
            debug!(path = %path.display(), "still playing, deferring cleanup");
            retry.push((Instant::now() + shared.delay, path));
        } else {
            remove_scratch(&path);
        }
    }
    retry
}

/// Remove a scratch file, tolerating one that is already gone.
pub fn remove_scratch(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "scratch file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove scratch file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::fs;

    fn engine() -> (Arc<MemoryBackend>, CrossfadeEngine) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = CrossfadeEngine::new(backend.clone());
        (backend, engine)
    }

    #[test]
    fn file_survives_until_delay_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.wav");
        fs::write(&path, b"RIFF").unwrap();

        let (_backend, engine) = engine();
        let cleanup = CleanupScheduler::start(engine, Duration::from_millis(200)).unwrap();
        cleanup.schedule(path.clone());
        std::thread::sleep(Duration::from_millis(80));
        assert!(path.exists());
        std::thread::sleep(Duration::from_millis(300));
        assert!(!path.exists());
        assert_eq!(cleanup.pending(), 0);
        cleanup.shutdown();
    }

    #[test]
    fn file_in_use_is_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.wav");
        fs::write(&path, b"RIFF").unwrap();

        let (backend, engine) = engine();
        backend.set_duration(path.clone(), Duration::from_millis(400));
        engine.play(&path, Duration::ZERO).unwrap();

        let cleanup = CleanupScheduler::start(engine.clone(), Duration::from_millis(100)).unwrap();
        cleanup.schedule(path.clone());
        std::thread::sleep(Duration::from_millis(250));
        assert!(path.exists(), "deleted while still playing");
        std::thread::sleep(Duration::from_millis(600));
        assert!(!path.exists());
        cleanup.shutdown();
        engine.shutdown();
    }

    #[test]
    fn shutdown_flushes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.wav");
        fs::write(&path, b"RIFF").unwrap();

        let (_backend, engine) = engine();
        let cleanup = CleanupScheduler::start(engine, Duration::from_secs(60)).unwrap();
        cleanup.schedule(path.clone());
        cleanup.shutdown();
        assert!(!path.exists());

        // After shutdown, scheduling deletes immediately.
        fs::write(&path, b"RIFF").unwrap();
        cleanup.schedule(path.clone());
        assert!(!path.exists());
    }

    #[test]
    fn remove_scratch_tolerates_missing_file() {
        remove_scratch(Path::new("__definitely_missing__.wav"));
    }
}
