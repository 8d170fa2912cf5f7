//! CrossfadeEngine: one logical "now playing" stream over two channels.
//!
//! A transition opens the incoming channel silently and hands both channels
//! to a ramp thread that moves their volumes in opposite directions. Each
//! `play` bumps the generation counter; every background task (ramp,
//! completion monitor) captures the generation it was started under and only
//! touches shared state while that generation is still current.

use crate::channel::{AudioBackend, Channel};
use crate::error::{Result, StationError};
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Volume steps per crossfade.
pub const RAMP_STEPS: u32 = 50;

/// Length of the fade applied by `stop`.
pub const STOP_FADE: Duration = Duration::from_secs(1);

const STOP_FADE_STEPS: u32 = 20;

/// Poll granularity for completion monitors and waits.
pub(crate) const TICK: Duration = Duration::from_millis(100);

struct PlaybackState {
    generation: u64,
    is_playing: bool,
    /// Full-volume channel, or the outgoing one while a ramp runs.
    active: Option<Arc<dyn Channel>>,
    /// Channel being faded in. Only set while a ramp runs.
    incoming: Option<Arc<dyn Channel>>,
    started_at: Option<Instant>,
}

impl PlaybackState {
    /// The channel that carries the current item.
    fn current(&self) -> Option<&Arc<dyn Channel>> {
        self.incoming.as_ref().or(self.active.as_ref())
    }
}

struct Shared {
    backend: Arc<dyn AudioBackend>,
    state: Mutex<PlaybackState>,
    idle: Condvar,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheap to clone; all clones drive the same output.
#[derive(Clone)]
pub struct CrossfadeEngine {
    shared: Arc<Shared>,
}

enum RampEnd {
    Completed,
    Superseded,
}

impl CrossfadeEngine {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        CrossfadeEngine {
            shared: Arc::new(Shared {
                backend,
                state: Mutex::new(PlaybackState {
                    generation: 0,
                    is_playing: false,
                    active: None,
                    incoming: None,
                    started_at: None,
                }),
                idle: Condvar::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start `source`. Crossfades over `crossfade` when something is already
    /// playing; otherwise (or with a zero duration) starts at full volume.
    ///
    /// A failed crossfade start degrades to a hard cut. The error is only
    /// returned when the hard cut fails too, in which case whatever was
    /// playing keeps playing.
    pub fn play(&self, source: &Path, crossfade: Duration) -> Result<()> {
        if self.is_playing() && !crossfade.is_zero() {
            match self.start_crossfade(source, crossfade) {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    source = %source.display(),
                    error = %e,
                    "crossfade failed, falling back to direct play"
                ),
            }
        }
        self.start_direct(source).inspect_err(|e| {
            error!(source = %source.display(), error = %e, "playback failed");
        })
    }

    fn start_direct(&self, source: &Path) -> Result<()> {
        let channel = self.shared.backend.open(source, 1.0)?;

        let mut st = self.shared.state.lock();
        st.generation += 1;
        let generation = st.generation;
        let replaced: Vec<_> = st
            .active
            .replace(channel.clone())
            .into_iter()
            .chain(st.incoming.take())
            .collect();
        st.is_playing = true;
        st.started_at = Some(Instant::now());
        drop(st);

        for old in replaced {
            old.stop();
        }
        info!(source = %source.display(), generation, "playing (direct)");
        self.spawn_monitor(generation, channel)
    }

    fn start_crossfade(&self, source: &Path, duration: Duration) -> Result<()> {
        self.cut_ramp_outgoing();
        let incoming = self.shared.backend.open(source, 0.0)?;

        let mut st = self.shared.state.lock();
        if st.active.is_none() {
            // Went idle while the new file was being decoded.
            drop(st);
            incoming.stop();
            return self.start_direct(source);
        }
        st.generation += 1;
        let generation = st.generation;
        if let Some(previous_incoming) = st.incoming.take() {
            // A ramp is still running: its outgoing channel is cut and its
            // incoming channel becomes ours to fade out.
            if let Some(cut) = st.active.replace(previous_incoming) {
                cut.stop();
            }
        }
        let outgoing = st.active.clone();
        st.incoming = Some(incoming.clone());
        st.is_playing = true;
        st.started_at = Some(Instant::now());
        drop(st);

        info!(
            source = %source.display(),
            generation,
            crossfade_ms = duration.as_millis() as u64,
            "crossfading"
        );

        let engine = self.clone();
        let ramp_in = incoming.clone();
        let ramp_out = outgoing.clone();
        if let Err(e) = self.spawn_task("crossfade-ramp", move || {
            engine.run_ramp(generation, ramp_out, ramp_in, duration)
        }) {
            error!(error = %e, "could not start ramp, cutting over");
            self.finish_ramp(generation, outgoing.as_ref(), &incoming);
        }
        self.spawn_monitor(generation, incoming)
    }

    /// If a ramp is running, stop its outgoing channel and promote its
    /// incoming one. Keeps a third channel from sounding while the next
    /// source opens. The running ramp still brings its incoming channel up.
    fn cut_ramp_outgoing(&self) {
        let mut st = self.shared.state.lock();
        if let Some(previous_incoming) = st.incoming.take() {
            if let Some(cut) = st.active.replace(previous_incoming) {
                cut.stop();
            }
        }
    }

    fn run_ramp(
        &self,
        generation: u64,
        outgoing: Option<Arc<dyn Channel>>,
        incoming: Arc<dyn Channel>,
        duration: Duration,
    ) {
        let start_level = outgoing.as_ref().map(|o| o.volume()).unwrap_or(0.0);
        match self.ramp_steps(generation, outgoing.as_ref(), &incoming, duration, start_level) {
            Ok(RampEnd::Superseded) => {
                debug!(generation, "ramp superseded");
            }
            Ok(RampEnd::Completed) => {
                self.finish_ramp(generation, outgoing.as_ref(), &incoming);
                debug!(generation, "crossfade complete");
            }
            Err(e) => {
                error!(generation, error = %e, "ramp failed, forcing terminal state");
                self.finish_ramp(generation, outgoing.as_ref(), &incoming);
            }
        }
    }

    fn ramp_steps(
        &self,
        generation: u64,
        outgoing: Option<&Arc<dyn Channel>>,
        incoming: &Arc<dyn Channel>,
        duration: Duration,
        start_level: f32,
    ) -> Result<RampEnd> {
        let step = duration / RAMP_STEPS;
        for i in 1..=RAMP_STEPS {
            std::thread::sleep(step);
            let st = self.shared.state.lock();
            if st.generation != generation {
                return Ok(RampEnd::Superseded);
            }
            if !incoming.is_busy() {
                warn!(generation, "incoming channel ended during crossfade");
                return Ok(RampEnd::Completed);
            }
            let fraction = i as f32 / RAMP_STEPS as f32;
            if let Some(out) = outgoing {
                out.set_volume(start_level * (1.0 - fraction))?;
            }
            incoming.set_volume(fraction)?;
        }
        Ok(RampEnd::Completed)
    }

    /// Outgoing stopped, incoming at full volume. No-op once superseded.
    fn finish_ramp(
        &self,
        generation: u64,
        outgoing: Option<&Arc<dyn Channel>>,
        incoming: &Arc<dyn Channel>,
    ) {
        let mut st = self.shared.state.lock();
        if st.generation != generation {
            return;
        }
        if let Some(out) = outgoing {
            out.stop();
        }
        if st
            .incoming
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, incoming))
        {
            st.incoming = None;
            st.active = Some(incoming.clone());
        }
        if let Err(e) = incoming.set_volume(1.0) {
            error!(error = %e, "could not restore incoming volume");
        }
    }

    fn spawn_monitor(&self, generation: u64, channel: Arc<dyn Channel>) -> Result<()> {
        let engine = self.clone();
        let watched = channel.clone();
        self.spawn_task("playback-monitor", move || {
            engine.run_monitor(generation, watched)
        })
        .inspect_err(|_| {
            channel.stop();
            self.mark_idle(generation);
        })
    }

    fn run_monitor(&self, generation: u64, channel: Arc<dyn Channel>) {
        loop {
            std::thread::sleep(TICK);
            if !channel.is_busy() {
                if self.mark_idle(generation) {
                    debug!(generation, source = %channel.source().display(), "playback finished");
                }
                return;
            }
            if self.shared.state.lock().generation != generation {
                return;
            }
        }
    }

    /// Flip to idle if `generation` is still current. Returns whether it was.
    fn mark_idle(&self, generation: u64) -> bool {
        let mut st = self.shared.state.lock();
        if st.generation != generation {
            return false;
        }
        let leftovers: Vec<_> = st.active.take().into_iter().chain(st.incoming.take()).collect();
        st.is_playing = false;
        st.started_at = None;
        drop(st);
        for ch in leftovers {
            ch.stop();
        }
        self.shared.idle.notify_all();
        true
    }

    /// Fade out over `STOP_FADE` and release the channels. No-op when idle.
    pub fn stop(&self) {
        let mut st = self.shared.state.lock();
        if !st.is_playing {
            return;
        }
        st.generation += 1;
        let fading: Vec<_> = st.active.take().into_iter().chain(st.incoming.take()).collect();
        st.is_playing = false;
        st.started_at = None;
        drop(st);
        self.shared.idle.notify_all();
        info!("stopping playback");

        let levels: Vec<f32> = fading.iter().map(|c| c.volume()).collect();
        let faders = fading.clone();
        let spawned = self.spawn_task("stop-fade", move || {
            let step = STOP_FADE / STOP_FADE_STEPS;
            for i in 1..=STOP_FADE_STEPS {
                std::thread::sleep(step);
                let remaining = 1.0 - i as f32 / STOP_FADE_STEPS as f32;
                for (ch, level) in faders.iter().zip(&levels) {
                    let _ = ch.set_volume(level * remaining);
                }
            }
            for ch in &faders {
                ch.stop();
            }
        });
        if spawned.is_err() {
            for ch in fading {
                ch.stop();
            }
        }
    }

    /// Stop, invalidate every background task and join them all.
    pub fn shutdown(&self) {
        self.stop();
        self.shared.state.lock().generation += 1;
        self.shared.idle.notify_all();
        let handles: Vec<_> = self.shared.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("engine shut down");
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing
    }

    /// Time since the current item started; zero when idle.
    pub fn elapsed_position(&self) -> Duration {
        self.shared
            .state
            .lock()
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Block until the engine is idle (true) or `timeout` passes (false).
    ///
    /// Idle means the item ended on its own or `stop` was called. The two
    /// are not told apart: callers that care check `Session` for shutdown.
    pub fn wait_until_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.shared.state.lock();
        while st.is_playing {
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    (d - now).min(TICK)
                }
                None => TICK,
            };
            self.shared.idle.wait_for(&mut st, wait);
        }
        true
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Source of the channel carrying the current item.
    pub fn current_source(&self) -> Option<PathBuf> {
        self.shared
            .state
            .lock()
            .current()
            .map(|c| c.source().to_path_buf())
    }

    /// True while `source` feeds the active or incoming channel.
    pub fn is_source_in_use(&self, source: &Path) -> bool {
        let st = self.shared.state.lock();
        st.active
            .iter()
            .chain(st.incoming.iter())
            .any(|c| c.source() == source)
    }

    pub fn probe_duration(&self, source: &Path) -> Result<Duration> {
        self.shared.backend.probe_duration(source)
    }

    fn spawn_task<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .map_err(StationError::Io)?;
        let mut tasks = self.shared.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn setup() -> (Arc<MemoryBackend>, CrossfadeEngine) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = CrossfadeEngine::new(backend.clone());
        (backend, engine)
    }

    fn only_channel(backend: &MemoryBackend, name: &str) -> Arc<crate::memory::MemoryChannel> {
        let mut chans = backend.channels_for(Path::new(name));
        assert_eq!(chans.len(), 1, "expected one channel for {}", name);
        chans.remove(0)
    }

    #[test]
    fn idle_play_starts_at_full_volume() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::from_secs(3)).unwrap();
        assert!(engine.is_playing());
        let a = only_channel(&backend, "a.mp3");
        assert_eq!(a.volume_history(), vec![1.0]);
        assert_eq!(engine.current_source(), Some(PathBuf::from("a.mp3")));
        engine.shutdown();
    }

    #[test]
    fn crossfade_envelope_sums_to_one_and_is_monotonic() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::from_millis(400)).unwrap();
        std::thread::sleep(Duration::from_millis(700));

        let a = only_channel(&backend, "a.mp3").volume_history();
        let b = only_channel(&backend, "b.mp3").volume_history();
        assert_eq!(b[0], 0.0, "incoming must start silent");

        let a_ramp = &a[1..];
        let b_ramp = &b[1..];
        assert_eq!(a_ramp.len(), RAMP_STEPS as usize);
        let resolution = 1.0 / RAMP_STEPS as f32;
        for (out, inc) in a_ramp.iter().zip(b_ramp) {
            assert!((out + inc - 1.0).abs() <= resolution + 1e-4);
        }
        assert!(a.windows(2).all(|w| w[1] <= w[0]));
        assert!(b.windows(2).all(|w| w[1] >= w[0]));
        engine.shutdown();
    }

    #[test]
    fn crossfade_terminal_state() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::from_millis(300)).unwrap();
        assert!(engine.is_source_in_use(Path::new("a.mp3")));
        std::thread::sleep(Duration::from_millis(600));

        let a = only_channel(&backend, "a.mp3");
        let b = only_channel(&backend, "b.mp3");
        assert!(a.was_stopped());
        assert!(!b.was_stopped());
        assert_eq!(b.volume(), 1.0);
        assert!(!engine.is_source_in_use(Path::new("a.mp3")));
        assert_eq!(engine.current_source(), Some(PathBuf::from("b.mp3")));
        engine.shutdown();
    }

    #[test]
    fn superseded_crossfade_keeps_two_channels_at_most() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::from_millis(400)).unwrap();

        let deadline = Instant::now() + Duration::from_millis(150);
        while Instant::now() < deadline {
            assert!(backend.sounding().len() <= 2);
            std::thread::sleep(Duration::from_millis(5));
        }
        engine.play(Path::new("c.mp3"), Duration::from_millis(400)).unwrap();
        let deadline = Instant::now() + Duration::from_millis(700);
        while Instant::now() < deadline {
            let sounding = backend.sounding();
            assert!(sounding.len() <= 2, "sounding: {:?}", sounding);
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(only_channel(&backend, "a.mp3").was_stopped());
        assert!(only_channel(&backend, "b.mp3").was_stopped());
        let c = only_channel(&backend, "c.mp3");
        assert!(!c.was_stopped());
        assert_eq!(c.volume_history().last(), Some(&1.0));
        assert_eq!(backend.sounding(), vec![PathBuf::from("c.mp3")]);
        assert_eq!(engine.current_source(), Some(PathBuf::from("c.mp3")));
        engine.shutdown();
    }

    #[test]
    fn zero_crossfade_is_a_hard_cut() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::ZERO).unwrap();
        assert!(only_channel(&backend, "a.mp3").was_stopped());
        assert_eq!(only_channel(&backend, "b.mp3").volume(), 1.0);
        engine.shutdown();
    }

    #[test]
    fn stale_monitor_does_not_clobber_newer_playback() {
        let (backend, engine) = setup();
        backend.set_duration("short.wav", Duration::from_millis(250));
        engine.play(Path::new("short.wav"), Duration::ZERO).unwrap();
        engine.play(Path::new("long.mp3"), Duration::from_millis(100)).unwrap();
        // short.wav's natural end passes while long.mp3 is current.
        std::thread::sleep(Duration::from_millis(500));
        assert!(engine.is_playing());
        assert_eq!(engine.current_source(), Some(PathBuf::from("long.mp3")));
        engine.shutdown();
    }

    #[test]
    fn wait_until_idle_reports_natural_end_and_timeout() {
        let (backend, engine) = setup();
        backend.set_duration("a.wav", Duration::from_millis(200));
        engine.play(Path::new("a.wav"), Duration::ZERO).unwrap();
        assert!(!engine.wait_until_idle(Some(Duration::from_millis(50))));
        assert!(engine.wait_until_idle(Some(Duration::from_secs(2))));
        assert!(!engine.is_playing());
        assert_eq!(engine.elapsed_position(), Duration::ZERO);
        engine.shutdown();
    }

    #[test]
    fn ramp_fault_forces_safe_terminal_state() {
        let (backend, engine) = setup();
        backend.fail_volume_after("a.mp3", 5);
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::from_millis(500)).unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let a = only_channel(&backend, "a.mp3");
        let b = only_channel(&backend, "b.mp3");
        assert!(a.was_stopped());
        assert_eq!(b.volume(), 1.0);
        assert!(engine.is_playing());
        engine.shutdown();
    }

    #[test]
    fn failed_crossfade_falls_back_to_direct_play() {
        let (backend, engine) = setup();
        backend.fail_open_times("b.mp3", 1);
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.play(Path::new("b.mp3"), Duration::from_millis(300)).unwrap();

        assert!(only_channel(&backend, "a.mp3").was_stopped());
        let b = only_channel(&backend, "b.mp3");
        assert_eq!(b.volume_history(), vec![1.0]);
        engine.shutdown();
    }

    #[test]
    fn unplayable_source_keeps_current_audio() {
        let (backend, engine) = setup();
        backend.fail_open("bad.mp3");
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        let result = engine.play(Path::new("bad.mp3"), Duration::from_millis(300));
        assert!(matches!(result, Err(StationError::PlaybackFailure(_))));
        assert!(engine.is_playing());
        assert!(!only_channel(&backend, "a.mp3").was_stopped());
        engine.shutdown();
    }

    #[test]
    fn stop_fades_out_and_releases() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        engine.stop();
        assert!(!engine.is_playing());
        assert!(engine.wait_until_idle(Some(Duration::from_millis(10))));
        std::thread::sleep(STOP_FADE + Duration::from_millis(300));

        let a = only_channel(&backend, "a.mp3");
        assert!(a.was_stopped());
        let history = a.volume_history();
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(history.last().copied().unwrap_or(1.0) < 0.01);
        engine.shutdown();
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let (_backend, engine) = setup();
        let before = engine.generation();
        engine.stop();
        assert_eq!(engine.generation(), before);
    }

    #[test]
    fn wait_until_idle_returns_true_after_stop() {
        let (backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        let waiter = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.wait_until_idle(Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(50));
        let asked = Instant::now();
        engine.stop();
        assert!(waiter.join().unwrap());
        assert!(asked.elapsed() < STOP_FADE);
        // The fade is still running when the waiter wakes.
        assert!(!only_channel(&backend, "a.mp3").was_stopped());
        engine.shutdown();
        assert!(only_channel(&backend, "a.mp3").was_stopped());
    }

    #[test]
    fn generation_only_increases() {
        let (_backend, engine) = setup();
        let mut last = engine.generation();
        for (i, fade) in [0u64, 100, 0, 50].iter().enumerate() {
            engine
                .play(Path::new(&format!("{}.mp3", i)), Duration::from_millis(*fade))
                .unwrap();
            let now = engine.generation();
            assert!(now > last);
            last = now;
        }
        engine.shutdown();
    }

    #[test]
    fn elapsed_position_tracks_current_item() {
        let (_backend, engine) = setup();
        engine.play(Path::new("a.mp3"), Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert!(engine.elapsed_position() >= Duration::from_millis(100));
        engine.play(Path::new("b.mp3"), Duration::from_millis(50)).unwrap();
        assert!(engine.elapsed_position() < Duration::from_millis(100));
        engine.shutdown();
    }
}
