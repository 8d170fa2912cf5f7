//! MemoryBackend: simulated channels that "play" in wall-clock time.
//!
//! Nothing is decoded: a channel is busy from the moment it is opened until
//! its configured duration has elapsed or it is stopped. Every volume change
//! is recorded so envelopes can be inspected afterwards. Used by the headless
//! tests and by `autodj run --dry-run`.

use crate::channel::{clamp_volume, AudioBackend, Channel};
use crate::error::{Result, StationError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_DURATION: Duration = Duration::from_secs(180);

struct MemoryState {
    default_duration: Duration,
    durations: HashMap<PathBuf, Duration>,
    broken: HashSet<PathBuf>,
    flaky: HashMap<PathBuf, usize>,
    unprobeable: HashSet<PathBuf>,
    volume_faults: HashMap<PathBuf, usize>,
    opened: Vec<Arc<MemoryChannel>>,
    history_limit: Option<usize>,
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: Mutex::new(MemoryState {
                default_duration: DEFAULT_DURATION,
                durations: HashMap::new(),
                broken: HashSet::new(),
                flaky: HashMap::new(),
                unprobeable: HashSet::new(),
                volume_faults: HashMap::new(),
                opened: Vec::new(),
                history_limit: None,
            }),
        }
    }

    /// Length used for any source without an explicit duration.
    pub fn with_default_duration(self, duration: Duration) -> Self {
        self.state.lock().default_duration = duration;
        self
    }

    /// Keep at most `limit` finished channels in `opened`. Channels still
    /// sounding are never dropped.
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.state.lock().history_limit = Some(limit);
        self
    }

    pub fn set_duration(&self, source: impl Into<PathBuf>, duration: Duration) {
        self.state.lock().durations.insert(source.into(), duration);
    }

    /// Every open of `source` fails.
    pub fn fail_open(&self, source: impl Into<PathBuf>) {
        self.state.lock().broken.insert(source.into());
    }

    /// The next `times` opens of `source` fail, later ones succeed.
    pub fn fail_open_times(&self, source: impl Into<PathBuf>, times: usize) {
        self.state.lock().flaky.insert(source.into(), times);
    }

    pub fn fail_probe(&self, source: impl Into<PathBuf>) {
        self.state.lock().unprobeable.insert(source.into());
    }

    /// Channels opened on `source` reject volume changes after `calls` successes.
    pub fn fail_volume_after(&self, source: impl Into<PathBuf>, calls: usize) {
        self.state.lock().volume_faults.insert(source.into(), calls);
    }

    /// Channels opened so far, in open order. Unbounded unless a history
    /// limit is set.
    pub fn opened(&self) -> Vec<Arc<MemoryChannel>> {
        self.state.lock().opened.clone()
    }

    pub fn channels_for(&self, source: &Path) -> Vec<Arc<MemoryChannel>> {
        self.state
            .lock()
            .opened
            .iter()
            .filter(|c| c.source == source)
            .cloned()
            .collect()
    }

    /// Sources that currently have a busy channel.
    pub fn sounding(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .opened
            .iter()
            .filter(|c| c.is_busy())
            .map(|c| c.source.clone())
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MemoryBackend {
    fn open(&self, source: &Path, volume: f32) -> Result<Arc<dyn Channel>> {
        let mut state = self.state.lock();
        if state.broken.contains(source) {
            return Err(StationError::playback(source, "simulated decode error"));
        }
        if let Some(remaining) = state.flaky.get_mut(source) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StationError::playback(source, "simulated transient error"));
            }
        }
        let duration = state
            .durations
            .get(source)
            .copied()
            .unwrap_or(state.default_duration);
        let channel = Arc::new(MemoryChannel {
            source: source.to_path_buf(),
            duration,
            started: Instant::now(),
            volume: Mutex::new(clamp_volume(volume)),
            history: Mutex::new(vec![(Duration::ZERO, clamp_volume(volume))]),
            stopped: AtomicBool::new(false),
            volume_calls: AtomicUsize::new(0),
            volume_fault_after: state.volume_faults.get(source).copied(),
        });
        if let Some(limit) = state.history_limit {
            prune_finished(&mut state.opened, limit);
        }
        state.opened.push(channel.clone());
        Ok(channel)
    }

    fn probe_duration(&self, source: &Path) -> Result<Duration> {
        let state = self.state.lock();
        if state.unprobeable.contains(source) {
            return Err(StationError::timing(source, "simulated probe error"));
        }
        Ok(state
            .durations
            .get(source)
            .copied()
            .unwrap_or(state.default_duration))
    }
}

/// Drop the oldest finished channels until at most `limit` remain.
fn prune_finished(opened: &mut Vec<Arc<MemoryChannel>>, limit: usize) {
    let finished = opened.iter().filter(|c| !c.is_busy()).count();
    let mut excess = finished.saturating_sub(limit);
    if excess == 0 {
        return;
    }
    opened.retain(|c| {
        if excess > 0 && !c.is_busy() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

pub struct MemoryChannel {
    source: PathBuf,
    duration: Duration,
    started: Instant,
    volume: Mutex<f32>,
    history: Mutex<Vec<(Duration, f32)>>,
    stopped: AtomicBool,
    volume_calls: AtomicUsize,
    volume_fault_after: Option<usize>,
}

impl MemoryChannel {
    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Every volume this channel has had, starting with its open volume.
    pub fn volume_history(&self) -> Vec<f32> {
        self.history.lock().iter().map(|(_, v)| *v).collect()
    }

    /// Volume changes with their offset from open.
    pub fn timed_history(&self) -> Vec<(Duration, f32)> {
        self.history.lock().clone()
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Channel for MemoryChannel {
    fn source(&self) -> &Path {
        &self.source
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        let calls = self.volume_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.volume_fault_after {
            if calls >= limit {
                return Err(StationError::playback(&self.source, "simulated volume fault"));
            }
        }
        let volume = clamp_volume(volume);
        *self.volume.lock() = volume;
        self.history.lock().push((self.started.elapsed(), volume));
        Ok(())
    }

    fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    fn is_busy(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.started.elapsed() < self.duration
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_busy_until_duration_elapses() {
        let backend = MemoryBackend::new();
        backend.set_duration("short.wav", Duration::from_millis(60));
        let ch = backend.open(Path::new("short.wav"), 1.0).unwrap();
        assert!(ch.is_busy());
        std::thread::sleep(Duration::from_millis(100));
        assert!(!ch.is_busy());
    }

    #[test]
    fn stop_ends_channel() {
        let backend = MemoryBackend::new();
        let ch = backend.open(Path::new("a.mp3"), 1.0).unwrap();
        ch.stop();
        assert!(!ch.is_busy());
        assert!(backend.opened()[0].was_stopped());
    }

    #[test]
    fn broken_and_flaky_sources() {
        let backend = MemoryBackend::new();
        backend.fail_open("bad.mp3");
        backend.fail_open_times("flaky.mp3", 1);
        assert!(backend.open(Path::new("bad.mp3"), 1.0).is_err());
        assert!(backend.open(Path::new("flaky.mp3"), 1.0).is_err());
        assert!(backend.open(Path::new("flaky.mp3"), 1.0).is_ok());
    }

    #[test]
    fn volume_history_and_faults() {
        let backend = MemoryBackend::new();
        backend.fail_volume_after("v.mp3", 2);
        let ch = backend.open(Path::new("v.mp3"), 0.0).unwrap();
        ch.set_volume(0.5).unwrap();
        ch.set_volume(2.0).unwrap();
        assert!(ch.set_volume(0.1).is_err());
        assert_eq!(backend.opened()[0].volume_history(), vec![0.0, 0.5, 1.0]);
        assert_eq!(ch.volume(), 1.0);
    }

    #[test]
    fn history_limit_drops_oldest_finished_channels() {
        let backend = MemoryBackend::new().with_history_limit(2);
        backend.set_duration("long.mp3", Duration::from_secs(60));
        let long = backend.open(Path::new("long.mp3"), 1.0).unwrap();
        for i in 0..10 {
            let ch = backend.open(Path::new(&format!("{}.wav", i)), 1.0).unwrap();
            ch.stop();
        }
        backend.open(Path::new("last.mp3"), 1.0).unwrap();

        let names: Vec<PathBuf> = backend
            .opened()
            .iter()
            .map(|c| c.source().to_path_buf())
            .collect();
        assert_eq!(
            names,
            ["long.mp3", "8.wav", "9.wav", "last.mp3"].map(PathBuf::from).to_vec()
        );
        assert!(long.is_busy());
        assert_eq!(backend.sounding().len(), 2);
    }

    #[test]
    fn opened_is_unbounded_by_default() {
        let backend = MemoryBackend::new();
        for i in 0..50 {
            backend.open(Path::new(&format!("{}.wav", i)), 1.0).unwrap().stop();
        }
        assert_eq!(backend.opened().len(), 50);
    }

    #[test]
    fn probe_uses_configured_duration() {
        let backend = MemoryBackend::new().with_default_duration(Duration::from_secs(7));
        backend.set_duration("x.mp3", Duration::from_secs(200));
        backend.fail_probe("y.mp3");
        assert_eq!(backend.probe_duration(Path::new("x.mp3")).unwrap(), Duration::from_secs(200));
        assert_eq!(backend.probe_duration(Path::new("z.mp3")).unwrap(), Duration::from_secs(7));
        assert!(matches!(
            backend.probe_duration(Path::new("y.mp3")),
            Err(StationError::TimingFailure(_))
        ));
    }
}
